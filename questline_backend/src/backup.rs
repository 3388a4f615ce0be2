use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{EpicMission, Goal, Profile, Skill};
use crate::progression::AppState;

/// On-disk backup format. `profile`, `metas`, `missions` and `skills` are
/// required; anything else is optional and defaults on import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupFile {
    pub profile: Profile,
    pub metas: Vec<Goal>,
    pub missions: Vec<EpicMission>,
    pub skills: Vec<Skill>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routine: Option<serde_json::Value>,
    #[serde(
        default,
        rename = "routineTemplates",
        skip_serializing_if = "Option::is_none"
    )]
    pub routine_templates: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_date: Option<DateTime<Utc>>,
}

impl BackupFile {
    /// Parse an uploaded backup. Rejects payloads missing any required key
    /// before anything destructive happens downstream.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(raw).context("Backup is not valid JSON")?;
        for key in ["profile", "metas", "missions", "skills"] {
            if value.get(key).is_none() {
                bail!("Backup is missing required key '{}'", key);
            }
        }
        serde_json::from_value(value).context("Backup has an invalid shape")
    }

    pub fn from_state(state: &AppState) -> Self {
        Self {
            profile: state.profile.clone(),
            metas: state.metas.clone(),
            missions: state.missions.clone(),
            skills: state.skills.clone(),
            routine: (!state.routine.is_null()).then(|| state.routine.clone()),
            routine_templates: (!state.routine_templates.is_null())
                .then(|| state.routine_templates.clone()),
            export_date: Some(Utc::now()),
        }
    }

    pub fn into_state(self) -> AppState {
        AppState {
            profile: self.profile,
            metas: self.metas,
            missions: self.missions,
            skills: self.skills,
            routine: self.routine.unwrap_or(serde_json::Value::Null),
            routine_templates: self.routine_templates.unwrap_or(serde_json::Value::Null),
            guilds: Vec::new(),
            users: Vec::new(),
        }
    }
}
