use crate::model::{Achievement, AchievementCriteria, EpicMission, Goal, Profile, SkillCategory};

/// The generated achievement set every fresh account starts with.
pub fn default_achievements() -> Vec<Achievement> {
    fn entry(id: &str, name: &str, description: &str, criteria: AchievementCriteria) -> Achievement {
        Achievement {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            criteria,
        }
    }

    vec![
        entry(
            "first-blood",
            "First Steps",
            "Complete your first mission.",
            AchievementCriteria::TotalMissionsCompleted { count: 1 },
        ),
        entry(
            "ten-missions",
            "Getting Serious",
            "Complete ten missions.",
            AchievementCriteria::TotalMissionsCompleted { count: 10 },
        ),
        entry(
            "fifty-missions",
            "Relentless",
            "Complete fifty missions.",
            AchievementCriteria::TotalMissionsCompleted { count: 50 },
        ),
        entry(
            "level-five",
            "Rising Hunter",
            "Reach level five.",
            AchievementCriteria::LevelReached { level: 5 },
        ),
        entry(
            "level-ten",
            "Seasoned Hunter",
            "Reach level ten.",
            AchievementCriteria::LevelReached { level: 10 },
        ),
        entry(
            "first-goal",
            "Promise Kept",
            "Complete a long-term goal.",
            AchievementCriteria::GoalsCompleted { count: 1 },
        ),
        entry(
            "week-streak",
            "Unbroken Week",
            "Keep a seven-day streak.",
            AchievementCriteria::StreakReached { days: 7 },
        ),
        entry(
            "month-streak",
            "Iron Month",
            "Keep a thirty-day streak.",
            AchievementCriteria::StreakReached { days: 30 },
        ),
        entry(
            "scholar",
            "Scholar",
            "Complete ten intellectual missions.",
            AchievementCriteria::CategoryMissions {
                category: SkillCategory::Intellectual,
                count: 10,
            },
        ),
        entry(
            "athlete",
            "Athlete",
            "Complete ten physical missions.",
            AchievementCriteria::CategoryMissions {
                category: SkillCategory::Physical,
                count: 10,
            },
        ),
    ]
}

/// Scan `all` for achievements whose criteria are now satisfied and that the
/// profile has not unlocked yet. Returns the newly unlocked entries; the
/// caller records their ids on the profile.
pub fn check_unlocks(
    all: &[Achievement],
    profile: &Profile,
    metas: &[Goal],
    missions: &[EpicMission],
) -> Vec<Achievement> {
    all.iter()
        .filter(|a| !profile.achievements.iter().any(|id| id == &a.id))
        .filter(|a| criteria_met(&a.criteria, profile, metas, missions))
        .cloned()
        .collect()
}

fn criteria_met(
    criteria: &AchievementCriteria,
    profile: &Profile,
    metas: &[Goal],
    missions: &[EpicMission],
) -> bool {
    match criteria {
        AchievementCriteria::TotalMissionsCompleted { count } => {
            profile.total_missions_completed >= *count
        }
        AchievementCriteria::LevelReached { level } => profile.level >= *level,
        AchievementCriteria::GoalsCompleted { count } => {
            metas.iter().filter(|g| g.completed).count() as u32 >= *count
        }
        AchievementCriteria::StreakReached { days } => profile.current_streak >= *days,
        AchievementCriteria::CategoryMissions { category, count } => {
            completed_in_category(*category, metas, missions) >= *count
        }
    }
}

/// Completed daily missions whose epic belongs to a goal of `category`.
fn completed_in_category(
    category: SkillCategory,
    metas: &[Goal],
    missions: &[EpicMission],
) -> u32 {
    missions
        .iter()
        .filter(|epic| {
            metas
                .iter()
                .any(|g| g.name == epic.goal_name && g.category == category)
        })
        .map(|epic| epic.completed_daily_count())
        .sum()
}
