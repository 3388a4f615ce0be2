use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;

use crate::model::{Rank, UserSettings};

/// Discrete notification events emitted by the engine. Every event is
/// delivered in-app over the engine channel; `Notification::push_mirrored`
/// says whether it would also go to the push channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    LevelUp {
        new_level: u32,
    },
    NewEpicMission {
        epic_name: String,
        goal_name: String,
        rank: Rank,
    },
    SkillUp {
        skill_name: String,
        new_level: u32,
    },
    SkillDecay {
        skill_name: String,
        xp_lost: u64,
    },
    SkillAtRisk {
        skill_name: String,
        idle_days: i64,
    },
    DailyBriefing {
        title: String,
        pending_goals: Vec<String>,
        caution: Option<String>,
    },
    GoalCompleted {
        goal_name: String,
    },
    AchievementUnlocked {
        name: String,
        description: String,
    },
    StreakBonus {
        streak: u32,
        xp: u64,
        fragments: u64,
    },
    SyncError {
        collection: String,
        message: String,
    },
    GeneratorError {
        message: String,
        quota: bool,
    },
}

impl EngineEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::LevelUp { .. } => "level_up",
            EngineEvent::NewEpicMission { .. } => "new_epic_mission",
            EngineEvent::SkillUp { .. } => "skill_up",
            EngineEvent::SkillDecay { .. } => "skill_decay",
            EngineEvent::SkillAtRisk { .. } => "skill_at_risk",
            EngineEvent::DailyBriefing { .. } => "daily_briefing",
            EngineEvent::GoalCompleted { .. } => "goal_completed",
            EngineEvent::AchievementUnlocked { .. } => "achievement_unlocked",
            EngineEvent::StreakBonus { .. } => "streak_bonus",
            EngineEvent::SyncError { .. } => "sync_error",
            EngineEvent::GeneratorError { .. } => "generator_error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    #[serde(flatten)]
    pub event: EngineEvent,
    pub push_mirrored: bool,
    pub emitted_at: DateTime<Utc>,
}

/// Fan-out point for engine events. Holds the sending half of the engine
/// channel; dropped receivers are ignored (notifications are best-effort).
#[derive(Clone)]
pub struct Notifier {
    tx: flume::Sender<Notification>,
}

impl Notifier {
    pub fn new(tx: flume::Sender<Notification>) -> Self {
        Self { tx }
    }

    /// Channel with a detached receiver, for callers that do not listen.
    pub fn disconnected() -> Self {
        let (tx, _rx) = flume::unbounded();
        Self { tx }
    }

    pub fn emit(&self, event: EngineEvent, settings: &UserSettings) {
        self.emit_at(event, settings, Utc::now());
    }

    pub fn emit_at(&self, event: EngineEvent, settings: &UserSettings, now: DateTime<Utc>) {
        let push_mirrored = should_push(event.event_type(), settings, now);
        tracing::debug!(event_type = event.event_type(), push_mirrored, "engine event");
        let _ = self.tx.send(Notification {
            event,
            push_mirrored,
            emitted_at: now,
        });
    }
}

/// Push mirroring requires opt-in and survives per-type suppression and
/// quiet hours. In-app delivery is unconditional.
fn should_push(event_type: &str, settings: &UserSettings, now: DateTime<Utc>) -> bool {
    if !settings.notifications_enabled || !settings.push_enabled {
        return false;
    }
    if settings.suppressed_events.iter().any(|t| t == event_type) {
        return false;
    }
    if let Some(quiet) = settings.quiet_hours {
        if quiet.contains(now.hour()) {
            return false;
        }
    }
    true
}
