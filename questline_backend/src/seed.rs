use serde_json::json;
use uuid::Uuid;

use crate::model::{
    DailyMission, EpicMission, Goal, Profile, Rank, Skill, SkillCategory, SmartDetail, Stats,
    SubTask, UserSettings,
};
use crate::progression::AppState;

pub const BASE_XP_TO_NEXT_LEVEL: u64 = 100;
pub const DEFAULT_SKILL_MAX_LEVEL: u32 = 10;

pub fn default_profile() -> Profile {
    Profile {
        level: 1,
        xp: 0,
        xp_to_next_level: BASE_XP_TO_NEXT_LEVEL,
        fragments: 0,
        stats: Stats::default(),
        total_missions_completed: 0,
        current_streak: 0,
        best_streak: 0,
        last_mission_completion_date: None,
        active_effects: Vec::new(),
        achievements: Vec::new(),
        user_settings: UserSettings::default(),
        offline_seed: false,
    }
}

/// Minimal goal used by quick-create and tests.
pub fn quick_goal(name: &str, category: SkillCategory) -> Goal {
    Goal {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        category,
        deadline: None,
        completed: false,
        detail: SmartDetail::default(),
        linked_skill_id: None,
    }
}

/// The fixed template dataset a fresh (or reset) account starts from: one
/// starter goal with a linked skill and a rank-F epic holding its first
/// daily mission.
pub fn default_state() -> AppState {
    let skill = Skill {
        id: Uuid::new_v4().to_string(),
        name: "Self-Discipline".to_string(),
        category: SkillCategory::Wellness,
        level: 1,
        max_level: DEFAULT_SKILL_MAX_LEVEL,
        xp: 0,
        xp_to_next_level: BASE_XP_TO_NEXT_LEVEL,
    };

    let mut goal = quick_goal("Build a daily routine", SkillCategory::Wellness);
    goal.detail = SmartDetail {
        specific: "Establish one small daily habit and keep it".to_string(),
        measurable: "One completed mission per day".to_string(),
        achievable: "Missions start at five minutes".to_string(),
        relevant: "Foundation for every other goal".to_string(),
        time_bound: "First rank within two weeks".to_string(),
    };
    goal.linked_skill_id = Some(skill.id.clone());

    let first_daily = DailyMission {
        id: Uuid::new_v4().to_string(),
        name: "Plan tomorrow in five minutes".to_string(),
        description: "Write down the three things that matter most tomorrow.".to_string(),
        xp_reward: 50,
        fragment_reward: 5,
        completed: false,
        sub_tasks: vec![SubTask {
            name: "priorities written".to_string(),
            target: 3.0,
            unit: "items".to_string(),
            current: 0.0,
        }],
        learning_resources: Vec::new(),
        completed_at: None,
    };

    let epic = EpicMission {
        id: Uuid::new_v4().to_string(),
        name: "The First Seven Days".to_string(),
        description: "Seven small daily missions to prove the habit.".to_string(),
        rank: Rank::F,
        level_requirement: 1,
        goal_name: goal.name.clone(),
        total_daily_target: 7,
        completed: false,
        last_completed_at: None,
        daily_missions: vec![first_daily],
    };

    AppState {
        profile: default_profile(),
        metas: vec![goal],
        missions: vec![epic],
        skills: vec![skill],
        routine: default_routine(),
        routine_templates: json!({ "templates": [] }),
        guilds: Vec::new(),
        users: Vec::new(),
    }
}

/// Offline fallback used when the store cannot be read in time: same
/// template, marked so the UI can tell the data never came from the store.
pub fn offline_state() -> AppState {
    let mut state = default_state();
    state.profile.offline_seed = true;
    state
}

fn default_routine() -> serde_json::Value {
    json!({
        "entries": [
            { "time": "07:00", "label": "Morning review" },
            { "time": "21:30", "label": "Plan tomorrow" }
        ]
    })
}
