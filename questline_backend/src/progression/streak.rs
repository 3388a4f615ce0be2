use chrono::{DateTime, Utc};

/// Flat bonus granted when the streak hits a milestone day count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakBonus {
    pub xp: u64,
    pub fragments: u64,
}

pub const STREAK_MILESTONES: [(u32, StreakBonus); 4] = [
    (3, StreakBonus { xp: 50, fragments: 10 }),
    (7, StreakBonus { xp: 150, fragments: 25 }),
    (14, StreakBonus { xp: 400, fragments: 60 }),
    (30, StreakBonus { xp: 1000, fragments: 150 }),
];

pub fn milestone_bonus(streak: u32) -> Option<StreakBonus> {
    STREAK_MILESTONES
        .iter()
        .find(|(days, _)| *days == streak)
        .map(|(_, bonus)| *bonus)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakOutcome {
    pub new_streak: u32,
    /// True when a streak-recovery effect bridged a gap and must be consumed.
    pub used_recovery: bool,
    /// False when the completion landed on the same calendar day as the last
    /// one and the streak is untouched.
    pub changed: bool,
}

/// Advance the streak for a completion at `now`, given the previous
/// completion timestamp. Calendar days, not 24h windows: a completion at
/// 23:59 followed by one at 00:01 counts as consecutive days.
pub fn advance_streak(
    current_streak: u32,
    last_completion: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    recovery_available: bool,
) -> StreakOutcome {
    let Some(last) = last_completion else {
        return StreakOutcome {
            new_streak: 1,
            used_recovery: false,
            changed: true,
        };
    };

    let elapsed_days = (now.date_naive() - last.date_naive()).num_days();
    if elapsed_days <= 0 {
        return StreakOutcome {
            new_streak: current_streak,
            used_recovery: false,
            changed: false,
        };
    }
    if elapsed_days == 1 {
        return StreakOutcome {
            new_streak: current_streak + 1,
            used_recovery: false,
            changed: true,
        };
    }
    if recovery_available {
        StreakOutcome {
            new_streak: current_streak + 1,
            used_recovery: true,
            changed: true,
        }
    } else {
        StreakOutcome {
            new_streak: 1,
            used_recovery: false,
            changed: true,
        }
    }
}
