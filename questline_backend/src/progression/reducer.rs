use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{DailyMission, EpicMission, Goal, Profile, Skill};

/// The full in-memory player state. Owned by a single `PlayerData`
/// controller; everything else sees snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppState {
    pub profile: Profile,
    pub metas: Vec<Goal>,
    pub missions: Vec<EpicMission>,
    pub skills: Vec<Skill>,
    pub routine: serde_json::Value,
    pub routine_templates: serde_json::Value,
    pub guilds: Vec<serde_json::Value>,
    pub users: Vec<serde_json::Value>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            profile: crate::seed::default_profile(),
            metas: Vec::new(),
            missions: Vec::new(),
            skills: Vec::new(),
            routine: serde_json::Value::Null,
            routine_templates: serde_json::Value::Null,
            guilds: Vec::new(),
            users: Vec::new(),
        }
    }
}

/// State transitions. Every variant is total: unmatched ids leave the state
/// untouched, and no variant panics.
#[derive(Debug, Clone)]
pub enum Action {
    UpdateSubTaskProgress {
        epic_mission_id: String,
        daily_mission_id: String,
        sub_task_name: String,
        amount: f64,
    },
    CompleteDailyMission {
        epic_mission_id: String,
        daily_mission_id: String,
        completed_at: DateTime<Utc>,
        next_mission: Option<DailyMission>,
    },
    AddDailyMission {
        epic_mission_id: String,
        mission: DailyMission,
    },
    CompleteEpicMission {
        epic_mission_id: String,
        completed_at: DateTime<Utc>,
    },
    UpdateSkill {
        skill: Skill,
    },
    SetProfile {
        profile: Profile,
    },
    SetMetas {
        metas: Vec<Goal>,
    },
    SetMissions {
        missions: Vec<EpicMission>,
    },
    SetSkills {
        skills: Vec<Skill>,
    },
    SetInitialData {
        state: Box<AppState>,
    },
}

/// Pure transition function: `(state, action) -> state'`.
pub fn reduce(mut state: AppState, action: Action) -> AppState {
    match action {
        Action::UpdateSubTaskProgress {
            epic_mission_id,
            daily_mission_id,
            sub_task_name,
            amount,
        } => {
            if let Some(epic) = find_epic_mut(&mut state, &epic_mission_id) {
                if let Some(daily) = epic
                    .daily_missions
                    .iter_mut()
                    .find(|d| d.id == daily_mission_id)
                {
                    if let Some(sub) = daily.sub_tasks.iter_mut().find(|s| s.name == sub_task_name)
                    {
                        // Monotone and clamped: over-contribution saturates at target.
                        sub.current = (sub.current + amount.max(0.0)).min(sub.target);
                    }
                }
            }
            state
        }
        Action::CompleteDailyMission {
            epic_mission_id,
            daily_mission_id,
            completed_at,
            next_mission,
        } => {
            if let Some(epic) = find_epic_mut(&mut state, &epic_mission_id) {
                if let Some(daily) = epic
                    .daily_missions
                    .iter_mut()
                    .find(|d| d.id == daily_mission_id)
                {
                    daily.completed = true;
                    daily.completed_at = Some(completed_at);
                    epic.last_completed_at = Some(completed_at);
                    if let Some(next) = next_mission {
                        epic.daily_missions.push(next);
                    }
                }
            }
            state
        }
        Action::AddDailyMission {
            epic_mission_id,
            mission,
        } => {
            if let Some(epic) = find_epic_mut(&mut state, &epic_mission_id) {
                epic.daily_missions.push(mission);
            }
            state
        }
        Action::CompleteEpicMission {
            epic_mission_id,
            completed_at,
        } => {
            if let Some(epic) = find_epic_mut(&mut state, &epic_mission_id) {
                epic.completed = true;
                epic.last_completed_at = Some(completed_at);
            }
            state
        }
        Action::UpdateSkill { skill } => {
            if let Some(existing) = state.skills.iter_mut().find(|s| s.id == skill.id) {
                *existing = skill;
            } else {
                state.skills.push(skill);
            }
            state
        }
        Action::SetProfile { profile } => {
            state.profile = profile;
            state
        }
        Action::SetMetas { metas } => {
            state.metas = metas;
            state
        }
        Action::SetMissions { missions } => {
            state.missions = missions;
            state
        }
        Action::SetSkills { skills } => {
            state.skills = skills;
            state
        }
        Action::SetInitialData { state: initial } => *initial,
    }
}

fn find_epic_mut<'a>(state: &'a mut AppState, id: &str) -> Option<&'a mut EpicMission> {
    state.missions.iter_mut().find(|m| m.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Rank, SubTask};

    fn state_with_mission() -> AppState {
        let daily = DailyMission {
            id: "d1".into(),
            name: "Read one chapter".into(),
            description: "Read and take notes".into(),
            xp_reward: 50,
            fragment_reward: 5,
            completed: false,
            sub_tasks: vec![
                SubTask {
                    name: "pages".into(),
                    target: 20.0,
                    unit: "pages".into(),
                    current: 0.0,
                },
                SubTask {
                    name: "notes".into(),
                    target: 1.0,
                    unit: "summary".into(),
                    current: 0.0,
                },
            ],
            learning_resources: vec![],
            completed_at: None,
        };
        let epic = EpicMission {
            id: "e1".into(),
            name: "Foundations".into(),
            description: "First steps".into(),
            rank: Rank::F,
            level_requirement: 1,
            goal_name: "Learn Rust".into(),
            total_daily_target: 2,
            completed: false,
            last_completed_at: None,
            daily_missions: vec![daily],
        };
        AppState {
            missions: vec![epic],
            ..AppState::default()
        }
    }

    #[test]
    fn sub_task_progress_clamps_to_target() {
        let mut state = state_with_mission();
        for _ in 0..5 {
            state = reduce(
                state,
                Action::UpdateSubTaskProgress {
                    epic_mission_id: "e1".into(),
                    daily_mission_id: "d1".into(),
                    sub_task_name: "pages".into(),
                    amount: 9.0,
                },
            );
        }
        let sub = &state.missions[0].daily_missions[0].sub_tasks[0];
        assert_eq!(sub.current, 20.0);
    }

    #[test]
    fn negative_contributions_never_regress_progress() {
        let mut state = state_with_mission();
        state = reduce(
            state,
            Action::UpdateSubTaskProgress {
                epic_mission_id: "e1".into(),
                daily_mission_id: "d1".into(),
                sub_task_name: "pages".into(),
                amount: 5.0,
            },
        );
        state = reduce(
            state,
            Action::UpdateSubTaskProgress {
                epic_mission_id: "e1".into(),
                daily_mission_id: "d1".into(),
                sub_task_name: "pages".into(),
                amount: -3.0,
            },
        );
        assert_eq!(state.missions[0].daily_missions[0].sub_tasks[0].current, 5.0);
    }

    #[test]
    fn daily_completion_requires_every_sub_task_at_target() {
        let mut state = state_with_mission();
        state = reduce(
            state,
            Action::UpdateSubTaskProgress {
                epic_mission_id: "e1".into(),
                daily_mission_id: "d1".into(),
                sub_task_name: "pages".into(),
                amount: 20.0,
            },
        );
        assert!(!state.missions[0].daily_missions[0].all_sub_tasks_met());
        state = reduce(
            state,
            Action::UpdateSubTaskProgress {
                epic_mission_id: "e1".into(),
                daily_mission_id: "d1".into(),
                sub_task_name: "notes".into(),
                amount: 1.0,
            },
        );
        assert!(state.missions[0].daily_missions[0].all_sub_tasks_met());
    }

    #[test]
    fn complete_daily_appends_next_mission_and_stamps_epic() {
        let state = state_with_mission();
        let now = chrono::Utc::now();
        let next = DailyMission {
            id: "d2".into(),
            name: "Read chapter two".into(),
            description: String::new(),
            xp_reward: 60,
            fragment_reward: 6,
            completed: false,
            sub_tasks: vec![],
            learning_resources: vec![],
            completed_at: None,
        };
        let state = reduce(
            state,
            Action::CompleteDailyMission {
                epic_mission_id: "e1".into(),
                daily_mission_id: "d1".into(),
                completed_at: now,
                next_mission: Some(next),
            },
        );
        let epic = &state.missions[0];
        assert!(epic.daily_missions[0].completed);
        assert_eq!(epic.daily_missions[0].completed_at, Some(now));
        assert_eq!(epic.last_completed_at, Some(now));
        assert_eq!(epic.daily_missions.len(), 2);
        assert_eq!(epic.daily_missions[1].id, "d2");
    }

    #[test]
    fn unmatched_ids_pass_state_through() {
        let state = state_with_mission();
        let before = state.clone();
        let state = reduce(
            state,
            Action::UpdateSubTaskProgress {
                epic_mission_id: "nope".into(),
                daily_mission_id: "d1".into(),
                sub_task_name: "pages".into(),
                amount: 10.0,
            },
        );
        assert_eq!(state, before);
    }

    #[test]
    fn update_skill_overwrites_by_id() {
        let mut state = state_with_mission();
        state.skills.push(crate::model::Skill {
            id: "s1".into(),
            name: "Rust".into(),
            category: crate::model::SkillCategory::Intellectual,
            level: 1,
            max_level: 10,
            xp: 0,
            xp_to_next_level: 100,
        });
        let mut updated = state.skills[0].clone();
        updated.level = 3;
        let state = reduce(state, Action::UpdateSkill { skill: updated });
        assert_eq!(state.skills.len(), 1);
        assert_eq!(state.skills[0].level, 3);
    }
}
