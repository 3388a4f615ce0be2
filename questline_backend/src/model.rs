use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Multiplicative growth applied to an XP threshold on every level-up,
/// for both the profile and individual skills.
pub const XP_GROWTH_FACTOR: f64 = 1.5;

pub fn next_threshold(current: u64) -> u64 {
    (current as f64 * XP_GROWTH_FACTOR).round() as u64
}

/// The six fixed profile attributes. Skill level-ups raise one or more of
/// these depending on the skill's category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub strength: u32,
    pub vitality: u32,
    pub intelligence: u32,
    pub creativity: u32,
    pub charisma: u32,
    pub discipline: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillCategory {
    Physical,
    Intellectual,
    Creative,
    Social,
    Professional,
    Wellness,
}

impl SkillCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            SkillCategory::Physical => "physical",
            SkillCategory::Intellectual => "intellectual",
            SkillCategory::Creative => "creative",
            SkillCategory::Social => "social",
            SkillCategory::Professional => "professional",
            SkillCategory::Wellness => "wellness",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "physical" => SkillCategory::Physical,
            "creative" => SkillCategory::Creative,
            "social" => SkillCategory::Social,
            "professional" => SkillCategory::Professional,
            "wellness" => SkillCategory::Wellness,
            _ => SkillCategory::Intellectual,
        }
    }

    /// Bump every profile stat mapped to this category by one.
    pub fn apply_level_up(self, stats: &mut Stats) {
        match self {
            SkillCategory::Physical => {
                stats.strength += 1;
                stats.vitality += 1;
            }
            SkillCategory::Intellectual => stats.intelligence += 1,
            SkillCategory::Creative => stats.creativity += 1,
            SkillCategory::Social => stats.charisma += 1,
            SkillCategory::Professional => {
                stats.discipline += 1;
                stats.intelligence += 1;
            }
            SkillCategory::Wellness => {
                stats.vitality += 1;
                stats.discipline += 1;
            }
        }
    }
}

/// Time-boxed profile modifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum ActiveEffect {
    XpBoost {
        multiplier: f64,
        expires_at: DateTime<Utc>,
    },
    StreakRecovery {
        expires_at: DateTime<Utc>,
    },
}

impl ActiveEffect {
    pub fn expires_at(&self) -> DateTime<Utc> {
        match self {
            ActiveEffect::XpBoost { expires_at, .. } => *expires_at,
            ActiveEffect::StreakRecovery { expires_at } => *expires_at,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() > now
    }
}

/// Hours during which push mirroring is muted (wraps midnight when
/// `start_hour > end_hour`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl QuietHours {
    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
    #[serde(default)]
    pub push_enabled: bool,
    #[serde(default)]
    pub quiet_hours: Option<QuietHours>,
    /// Event-type names the user muted for the push mirror.
    #[serde(default)]
    pub suppressed_events: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            notifications_enabled: true,
            push_enabled: false,
            quiet_hours: None,
            suppressed_events: Vec::new(),
        }
    }
}

/// Single per-user aggregate tracking level, currency, streaks and unlocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub level: u32,
    pub xp: u64,
    pub xp_to_next_level: u64,
    pub fragments: u64,
    pub stats: Stats,
    pub total_missions_completed: u32,
    pub current_streak: u32,
    pub best_streak: u32,
    pub last_mission_completion_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub active_effects: Vec<ActiveEffect>,
    /// Ids of unlocked achievements.
    #[serde(default)]
    pub achievements: Vec<String>,
    #[serde(default)]
    pub user_settings: UserSettings,
    /// Set when this profile came from the offline seed instead of the store.
    #[serde(default)]
    pub offline_seed: bool,
}

impl Profile {
    /// Multiplier from the strongest active, unexpired xp-boost effect.
    pub fn xp_multiplier(&self, now: DateTime<Utc>) -> f64 {
        self.active_effects
            .iter()
            .filter(|e| e.is_active(now))
            .filter_map(|e| match e {
                ActiveEffect::XpBoost { multiplier, .. } => Some(*multiplier),
                _ => None,
            })
            .fold(1.0, f64::max)
    }

    pub fn has_streak_recovery(&self, now: DateTime<Utc>) -> bool {
        self.active_effects
            .iter()
            .any(|e| matches!(e, ActiveEffect::StreakRecovery { .. }) && e.is_active(now))
    }

    /// Drop one active streak-recovery effect, if present.
    pub fn consume_streak_recovery(&mut self, now: DateTime<Utc>) {
        if let Some(pos) = self
            .active_effects
            .iter()
            .position(|e| matches!(e, ActiveEffect::StreakRecovery { .. }) && e.is_active(now))
        {
            self.active_effects.remove(pos);
        }
    }
}

/// SMART breakdown captured by the goal wizard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmartDetail {
    #[serde(default)]
    pub specific: String,
    #[serde(default)]
    pub measurable: String,
    #[serde(default)]
    pub achievable: String,
    #[serde(default)]
    pub relevant: String,
    #[serde(default)]
    pub time_bound: String,
}

/// Long-term objective ("meta"). Epic missions reference it by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub name: String,
    pub category: SkillCategory,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub detail: SmartDetail,
    #[serde(default)]
    pub linked_skill_id: Option<String>,
}

/// Rank ladder, lowest to highest. Ord follows declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Rank {
    F,
    E,
    D,
    C,
    B,
    A,
    S,
    SS,
    SSS,
}

impl Rank {
    pub const LADDER: [Rank; 9] = [
        Rank::F,
        Rank::E,
        Rank::D,
        Rank::C,
        Rank::B,
        Rank::A,
        Rank::S,
        Rank::SS,
        Rank::SSS,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Rank::F => "F",
            Rank::E => "E",
            Rank::D => "D",
            Rank::C => "C",
            Rank::B => "B",
            Rank::A => "A",
            Rank::S => "S",
            Rank::SS => "SS",
            Rank::SSS => "SSS",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "F" => Some(Rank::F),
            "E" => Some(Rank::E),
            "D" => Some(Rank::D),
            "C" => Some(Rank::C),
            "B" => Some(Rank::B),
            "A" => Some(Rank::A),
            "S" => Some(Rank::S),
            "SS" => Some(Rank::SS),
            "SSS" => Some(Rank::SSS),
            _ => None,
        }
    }
}

/// Quantified unit of progress inside a daily mission. `current` only ever
/// grows and never passes `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    pub name: String,
    pub target: f64,
    pub unit: String,
    #[serde(default)]
    pub current: f64,
}

impl SubTask {
    pub fn is_met(&self) -> bool {
        self.current >= self.target
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMission {
    pub id: String,
    pub name: String,
    pub description: String,
    pub xp_reward: u64,
    pub fragment_reward: u64,
    #[serde(default)]
    pub completed: bool,
    pub sub_tasks: Vec<SubTask>,
    #[serde(default)]
    pub learning_resources: Vec<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl DailyMission {
    pub fn all_sub_tasks_met(&self) -> bool {
        self.sub_tasks.iter().all(SubTask::is_met)
    }
}

/// Multi-day quest tied to one goal. Complete once enough of its daily
/// missions are done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpicMission {
    pub id: String,
    pub name: String,
    pub description: String,
    pub rank: Rank,
    pub level_requirement: u32,
    /// By-name reference to the owning goal. Renaming a goal must cascade
    /// here (see PlayerData::rename_goal).
    pub goal_name: String,
    pub total_daily_target: u32,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub last_completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub daily_missions: Vec<DailyMission>,
}

impl EpicMission {
    pub fn completed_daily_count(&self) -> u32 {
        self.daily_missions.iter().filter(|d| d.completed).count() as u32
    }

    pub fn target_met(&self) -> bool {
        self.completed_daily_count() >= self.total_daily_target
    }
}

/// Leveling capability linked 1:1 to a goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub name: String,
    pub category: SkillCategory,
    pub level: u32,
    pub max_level: u32,
    pub xp: u64,
    pub xp_to_next_level: u64,
}

impl Skill {
    pub fn at_max_level(&self) -> bool {
        self.level >= self.max_level
    }

    /// Add xp, levelling up as many times as the amount allows. Thresholds
    /// carry over (xp is reduced by the consumed threshold, not zeroed) and
    /// grow by [`XP_GROWTH_FACTOR`]. Each level gained raises the profile
    /// stats mapped to this skill's category. Returns levels gained.
    pub fn grant_xp(&mut self, amount: u64, stats: &mut Stats) -> u32 {
        if self.at_max_level() {
            return 0;
        }
        self.xp += amount;
        let mut gained = 0;
        while self.xp >= self.xp_to_next_level && !self.at_max_level() {
            self.xp -= self.xp_to_next_level;
            self.xp_to_next_level = next_threshold(self.xp_to_next_level);
            self.level += 1;
            self.category.apply_level_up(stats);
            gained += 1;
        }
        gained
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: String,
    pub name: String,
    pub description: String,
    pub criteria: AchievementCriteria,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AchievementCriteria {
    TotalMissionsCompleted { count: u32 },
    LevelReached { level: u32 },
    GoalsCompleted { count: u32 },
    StreakReached { days: u32 },
    CategoryMissions { category: SkillCategory, count: u32 },
}
