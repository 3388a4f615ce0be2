use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::events::EngineEvent;
use crate::generator::{is_quota_error, MissionGenerator, NextMissionRequest};
use crate::model::{next_threshold, DailyMission, EpicMission, SubTask};
use crate::progression::{achievements, reduce, streak, Action, AppState};
use crate::store::CollectionKey;
use crate::sync::PlayerData;

/// Sequences the complete-mission cascade around the pure reducer:
/// contribute progress, and when that finishes the daily mission, apply
/// streak / xp / level / skill / achievement effects, ask the generator for
/// the next mission, check epic completion, and persist.
pub struct CompletionOrchestrator {
    generator: Arc<dyn MissionGenerator>,
}

impl CompletionOrchestrator {
    pub fn new(generator: Arc<dyn MissionGenerator>) -> Self {
        Self { generator }
    }

    /// Void on the caller side: every failure is caught here and surfaced
    /// as a notification. Progress already applied is never rolled back.
    pub async fn complete_mission(
        &self,
        player: &mut PlayerData,
        epic_mission_id: &str,
        daily_mission_id: &str,
        sub_task_name: &str,
        amount: f64,
        feedback_text: Option<String>,
    ) {
        self.complete_mission_at(
            player,
            epic_mission_id,
            daily_mission_id,
            sub_task_name,
            amount,
            feedback_text,
            Utc::now(),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn complete_mission_at(
        &self,
        player: &mut PlayerData,
        epic_mission_id: &str,
        daily_mission_id: &str,
        sub_task_name: &str,
        amount: f64,
        feedback_text: Option<String>,
        now: DateTime<Utc>,
    ) {
        let contribution = Action::UpdateSubTaskProgress {
            epic_mission_id: epic_mission_id.to_string(),
            daily_mission_id: daily_mission_id.to_string(),
            sub_task_name: sub_task_name.to_string(),
            amount,
        };

        // Tentative projection: test completion without committing.
        let projected = reduce(player.snapshot(), contribution.clone());
        let Some((epic, daily)) = find_daily(&projected, epic_mission_id, daily_mission_id) else {
            tracing::warn!(
                epic_mission_id,
                daily_mission_id,
                "contribution targets an unknown mission"
            );
            return;
        };
        let epic = epic.clone();
        let daily = daily.clone();

        player.dispatch(contribution);

        if !daily.all_sub_tasks_met() {
            // Partial contribution only; no cascade.
            player.persist(CollectionKey::Missions);
            return;
        }

        let notifier = player.notifier().clone();
        let mut profile = player.state().profile.clone();
        let settings = profile.user_settings.clone();

        // a. Streak.
        let outcome = streak::advance_streak(
            profile.current_streak,
            profile.last_mission_completion_date,
            now,
            profile.has_streak_recovery(now),
        );
        let mut bonus_xp = 0;
        let mut bonus_fragments = 0;
        if outcome.changed {
            profile.current_streak = outcome.new_streak;
            profile.best_streak = profile.best_streak.max(outcome.new_streak);
            if outcome.used_recovery {
                profile.consume_streak_recovery(now);
            }
            if let Some(bonus) = streak::milestone_bonus(outcome.new_streak) {
                bonus_xp = bonus.xp;
                bonus_fragments = bonus.fragments;
                notifier.emit(
                    EngineEvent::StreakBonus {
                        streak: outcome.new_streak,
                        xp: bonus.xp,
                        fragments: bonus.fragments,
                    },
                    &settings,
                );
            }
        }
        profile.last_mission_completion_date = Some(now);

        // b. XP and fragments: base xp through the boost multiplier,
        // milestone bonus added on top.
        let boosted = (daily.xp_reward as f64 * profile.xp_multiplier(now)).round() as u64;
        profile.xp += boosted + bonus_xp;
        profile.fragments += daily.fragment_reward + bonus_fragments;
        profile.total_missions_completed += 1;

        // c. Level-up: one large award can cross several thresholds.
        let mut leveled = false;
        while profile.xp >= profile.xp_to_next_level {
            profile.xp -= profile.xp_to_next_level;
            profile.xp_to_next_level = next_threshold(profile.xp_to_next_level);
            profile.level += 1;
            leveled = true;
        }
        if leveled {
            notifier.emit(
                EngineEvent::LevelUp {
                    new_level: profile.level,
                },
                &settings,
            );
        }

        // d. Skill xp via the generator. Failure skips the skill step only.
        let linked_skill = player
            .state()
            .metas
            .iter()
            .find(|g| g.name == epic.goal_name)
            .and_then(|g| g.linked_skill_id.clone())
            .and_then(|skill_id| {
                player
                    .state()
                    .skills
                    .iter()
                    .find(|s| s.id == skill_id)
                    .cloned()
            });
        if let Some(mut skill) = linked_skill {
            if !skill.at_max_level() {
                match self.generator.skill_xp(&daily.name, skill.level).await {
                    Ok(amount) => {
                        let gained = skill.grant_xp(amount, &mut profile.stats);
                        if gained > 0 {
                            notifier.emit(
                                EngineEvent::SkillUp {
                                    skill_name: skill.name.clone(),
                                    new_level: skill.level,
                                },
                                &settings,
                            );
                        }
                        player.dispatch(Action::UpdateSkill { skill });
                    }
                    Err(e) => {
                        tracing::warn!("skill xp request failed, skipping: {:#}", e);
                    }
                }
            }
        }

        // e. Achievements, against the post-completion view of the world.
        let completed_view = project_completed(player.snapshot(), &epic.id, &daily.id, now);
        let unlocked = achievements::check_unlocks(
            &achievements::default_achievements(),
            &profile,
            &completed_view.metas,
            &completed_view.missions,
        );
        for achievement in unlocked {
            profile.achievements.push(achievement.id.clone());
            notifier.emit(
                EngineEvent::AchievementUnlocked {
                    name: achievement.name,
                    description: achievement.description,
                },
                &settings,
            );
        }

        player.dispatch(Action::SetProfile {
            profile: profile.clone(),
        });

        // f. Next mission from the generator. A failure is surfaced and the
        // completion proceeds without a follow-up mission.
        let goal_deadline = player
            .state()
            .metas
            .iter()
            .find(|g| g.name == epic.goal_name)
            .and_then(|g| g.deadline);
        let history = epic
            .daily_missions
            .iter()
            .filter(|d| d.completed || d.id == daily.id)
            .map(|d| d.name.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let request = NextMissionRequest {
            current_mission_name: daily.name.clone(),
            goal_name: epic.goal_name.clone(),
            goal_deadline,
            completion_history: history,
            user_level: profile.level,
            feedback_text,
        };
        let next_mission = match self.generator.next_mission(&request).await {
            Ok(generated) => Some(DailyMission {
                id: Uuid::new_v4().to_string(),
                name: generated.next_mission_name,
                description: generated.next_mission_description,
                xp_reward: generated.xp_reward,
                fragment_reward: generated.fragment_reward,
                completed: false,
                sub_tasks: generated
                    .sub_tasks
                    .into_iter()
                    .map(|s| SubTask {
                        name: s.name,
                        target: s.target,
                        unit: s.unit,
                        current: 0.0,
                    })
                    .collect(),
                learning_resources: generated.learning_resource_links,
                completed_at: None,
            }),
            Err(e) => {
                let quota = is_quota_error(&e);
                tracing::error!(quota, "next-mission generation failed: {:#}", e);
                notifier.emit(
                    EngineEvent::GeneratorError {
                        message: format!("{e:#}"),
                        quota,
                    },
                    &settings,
                );
                None
            }
        };
        player.dispatch(Action::CompleteDailyMission {
            epic_mission_id: epic.id.clone(),
            daily_mission_id: daily.id.clone(),
            completed_at: now,
            next_mission,
        });

        // g. Epic completion: exactly one of "next epic available" or
        // "goal completed".
        let epic_done = player
            .state()
            .missions
            .iter()
            .find(|m| m.id == epic.id)
            .map(|m| m.target_met())
            .unwrap_or(false);
        let mut goal_completed = false;
        if epic_done {
            player.dispatch(Action::CompleteEpicMission {
                epic_mission_id: epic.id.clone(),
                completed_at: now,
            });
            match next_epic_for_goal(player.state(), &epic.goal_name, &epic.id) {
                Some(next) => {
                    notifier.emit(
                        EngineEvent::NewEpicMission {
                            epic_name: next.name.clone(),
                            goal_name: next.goal_name.clone(),
                            rank: next.rank,
                        },
                        &settings,
                    );
                }
                None => {
                    let mut metas = player.state().metas.clone();
                    for goal in &mut metas {
                        if goal.name == epic.goal_name {
                            goal.completed = true;
                        }
                    }
                    player.dispatch(Action::SetMetas { metas });
                    goal_completed = true;
                    notifier.emit(
                        EngineEvent::GoalCompleted {
                            goal_name: epic.goal_name.clone(),
                        },
                        &settings,
                    );
                }
            }
        }

        // Persist. Profile, missions and skills commit as one batch.
        player.persist_completion_batch();
        if goal_completed {
            player.persist(CollectionKey::Metas);
        }
    }

    /// Inactivity sweep for skills: a goal with no completion for three days
    /// puts its skill at risk; seven days decays it (half its accumulated
    /// xp within the current level).
    pub fn sweep_skill_decay(&self, player: &mut PlayerData, now: DateTime<Utc>) {
        let settings = player.state().profile.user_settings.clone();
        let notifier = player.notifier().clone();
        let mut updates = Vec::new();

        for goal in player.state().metas.iter().filter(|g| !g.completed) {
            let Some(skill_id) = goal.linked_skill_id.as_deref() else {
                continue;
            };
            let Some(skill) = player.state().skills.iter().find(|s| s.id == skill_id) else {
                continue;
            };
            let last_activity = player
                .state()
                .missions
                .iter()
                .filter(|m| m.goal_name == goal.name)
                .filter_map(|m| m.last_completed_at)
                .max();
            let Some(last) = last_activity else {
                continue;
            };
            let idle_days = (now.date_naive() - last.date_naive()).num_days();
            if idle_days >= 7 {
                let mut decayed = skill.clone();
                let xp_lost = decayed.xp / 2;
                decayed.xp -= xp_lost;
                if xp_lost > 0 {
                    notifier.emit(
                        EngineEvent::SkillDecay {
                            skill_name: decayed.name.clone(),
                            xp_lost,
                        },
                        &settings,
                    );
                    updates.push(decayed);
                }
            } else if idle_days >= 3 {
                notifier.emit(
                    EngineEvent::SkillAtRisk {
                        skill_name: skill.name.clone(),
                        idle_days,
                    },
                    &settings,
                );
            }
        }

        let any = !updates.is_empty();
        for skill in updates {
            player.dispatch(Action::UpdateSkill { skill });
        }
        if any {
            player.persist(CollectionKey::Skills);
        }
    }
}

/// Proactive session tip: open goals plus a caution when the streak is one
/// missed day away from breaking.
pub fn daily_briefing(state: &AppState, now: DateTime<Utc>) -> EngineEvent {
    let pending_goals: Vec<String> = state
        .metas
        .iter()
        .filter(|g| !g.completed)
        .map(|g| g.name.clone())
        .collect();
    let caution = state.profile.last_mission_completion_date.and_then(|last| {
        let idle = (now.date_naive() - last.date_naive()).num_days();
        (idle >= 1 && state.profile.current_streak > 0).then(|| {
            format!(
                "No mission completed today; a {}-day streak is on the line.",
                state.profile.current_streak
            )
        })
    });
    EngineEvent::DailyBriefing {
        title: "Today's briefing".to_string(),
        pending_goals,
        caution,
    }
}

fn find_daily<'a>(
    state: &'a AppState,
    epic_id: &str,
    daily_id: &str,
) -> Option<(&'a EpicMission, &'a DailyMission)> {
    let epic = state.missions.iter().find(|m| m.id == epic_id)?;
    let daily = epic.daily_missions.iter().find(|d| d.id == daily_id)?;
    Some((epic, daily))
}

/// View of the state with the current daily marked complete, used for the
/// achievement scan before the completion action is dispatched.
fn project_completed(
    state: AppState,
    epic_id: &str,
    daily_id: &str,
    now: DateTime<Utc>,
) -> AppState {
    reduce(
        state,
        Action::CompleteDailyMission {
            epic_mission_id: epic_id.to_string(),
            daily_mission_id: daily_id.to_string(),
            completed_at: now,
            next_mission: None,
        },
    )
}

/// The lowest-ranked remaining epic for the goal, by rank-ladder order.
fn next_epic_for_goal<'a>(
    state: &'a AppState,
    goal_name: &str,
    completed_epic_id: &str,
) -> Option<&'a EpicMission> {
    state
        .missions
        .iter()
        .filter(|m| m.goal_name == goal_name && !m.completed && m.id != completed_epic_id)
        .min_by_key(|m| m.rank)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Notifier;
    use crate::generator::{GeneratedMission, GeneratedSubTask};
    use crate::model::{Goal, Rank, Skill, SkillCategory};
    use crate::store::DocumentStore;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::TimeZone;

    /// Scripted generator: configurable skill-xp amount and next-mission
    /// behavior, counting calls.
    struct ScriptedGenerator {
        skill_xp: Result<u64, String>,
        next_mission: Result<GeneratedMission, String>,
        calls: std::sync::Mutex<Vec<&'static str>>,
    }

    impl ScriptedGenerator {
        fn working() -> Self {
            Self {
                skill_xp: Ok(30),
                next_mission: Ok(GeneratedMission {
                    next_mission_name: "Generated follow-up".to_string(),
                    next_mission_description: "Keep going".to_string(),
                    xp_reward: 60,
                    fragment_reward: 6,
                    sub_tasks: vec![GeneratedSubTask {
                        name: "the thing".to_string(),
                        target: 1.0,
                        unit: "time".to_string(),
                    }],
                    learning_resource_links: vec![],
                }),
                calls: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn failing_next_mission(message: &str) -> Self {
            let mut g = Self::working();
            g.next_mission = Err(message.to_string());
            g
        }
    }

    #[async_trait]
    impl MissionGenerator for ScriptedGenerator {
        async fn next_mission(&self, _request: &NextMissionRequest) -> Result<GeneratedMission> {
            self.calls.lock().unwrap().push("next_mission");
            self.next_mission
                .clone()
                .map_err(|m| anyhow::anyhow!("{}", m))
        }

        async fn skill_xp(&self, _mission_text: &str, _skill_level: u32) -> Result<u64> {
            self.calls.lock().unwrap().push("skill_xp");
            self.skill_xp.clone().map_err(|m| anyhow::anyhow!("{}", m))
        }
    }

    struct Fixture {
        player: PlayerData,
        orchestrator: CompletionOrchestrator,
        rx: flume::Receiver<crate::events::Notification>,
        store: std::sync::Arc<DocumentStore>,
    }

    /// One goal, one rank-F epic with a single-sub-task daily, linked skill.
    fn fixture(generator: ScriptedGenerator) -> Fixture {
        let (tx, rx) = flume::unbounded();
        let store = std::sync::Arc::new(DocumentStore::in_memory().expect("store"));
        let mut player = PlayerData::new(Some(store.clone()), Notifier::new(tx));

        let skill = Skill {
            id: "skill-1".to_string(),
            name: "Rust".to_string(),
            category: SkillCategory::Intellectual,
            level: 1,
            max_level: 10,
            xp: 0,
            xp_to_next_level: 100,
        };
        let goal = Goal {
            linked_skill_id: Some(skill.id.clone()),
            ..crate::seed::quick_goal("Learn Rust", SkillCategory::Intellectual)
        };
        let daily = DailyMission {
            id: "d1".to_string(),
            name: "Read the ownership chapter".to_string(),
            description: String::new(),
            xp_reward: 30,
            fragment_reward: 5,
            completed: false,
            sub_tasks: vec![SubTask {
                name: "pages".to_string(),
                target: 10.0,
                unit: "pages".to_string(),
                current: 0.0,
            }],
            learning_resources: vec![],
            completed_at: None,
        };
        let epic = EpicMission {
            id: "e1".to_string(),
            name: "Foundations".to_string(),
            description: String::new(),
            rank: Rank::F,
            level_requirement: 1,
            goal_name: goal.name.clone(),
            total_daily_target: 3,
            completed: false,
            last_completed_at: None,
            daily_missions: vec![daily],
        };

        player.dispatch(Action::SetMetas { metas: vec![goal] });
        player.dispatch(Action::SetMissions {
            missions: vec![epic],
        });
        player.dispatch(Action::SetSkills {
            skills: vec![skill],
        });

        Fixture {
            player,
            orchestrator: CompletionOrchestrator::new(Arc::new(generator)),
            rx,
            store,
        }
    }

    fn events(rx: &flume::Receiver<crate::events::Notification>) -> Vec<String> {
        rx.try_iter()
            .map(|n| n.event.event_type().to_string())
            .collect()
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn partial_contribution_persists_progress_without_cascade() {
        let mut f = fixture(ScriptedGenerator::working());
        f.orchestrator
            .complete_mission(&mut f.player, "e1", "d1", "pages", 4.0, None)
            .await;

        let daily = &f.player.state().missions[0].daily_missions[0];
        assert_eq!(daily.sub_tasks[0].current, 4.0);
        assert!(!daily.completed);
        assert_eq!(f.player.state().profile.xp, 0);
        assert_eq!(f.player.state().profile.total_missions_completed, 0);
        assert!(events(&f.rx).is_empty());
    }

    #[tokio::test]
    async fn full_completion_awards_xp_and_appends_generated_mission() {
        let mut f = fixture(ScriptedGenerator::working());
        f.orchestrator
            .complete_mission(&mut f.player, "e1", "d1", "pages", 10.0, None)
            .await;

        let state = f.player.state();
        assert_eq!(state.profile.xp, 30);
        assert_eq!(state.profile.fragments, 5);
        assert_eq!(state.profile.total_missions_completed, 1);
        assert_eq!(state.profile.current_streak, 1);

        let epic = &state.missions[0];
        assert!(epic.daily_missions[0].completed);
        assert_eq!(epic.daily_missions.len(), 2);
        let next = &epic.daily_missions[1];
        assert_eq!(next.name, "Generated follow-up");
        assert!(!next.completed);
        assert_eq!(next.sub_tasks[0].current, 0.0);

        // First completion unlocks the first-mission achievement.
        assert!(state
            .profile
            .achievements
            .contains(&"first-blood".to_string()));
        let emitted = events(&f.rx);
        assert!(emitted.contains(&"achievement_unlocked".to_string()));
    }

    #[tokio::test]
    async fn level_up_consumes_threshold_exactly_once() {
        let mut f = fixture(ScriptedGenerator::working());
        let mut profile = f.player.state().profile.clone();
        profile.xp = 90;
        profile.xp_to_next_level = 100;
        f.player.dispatch(Action::SetProfile { profile });

        f.orchestrator
            .complete_mission(&mut f.player, "e1", "d1", "pages", 10.0, None)
            .await;

        let profile = &f.player.state().profile;
        assert_eq!(profile.level, 2);
        assert_eq!(profile.xp, 20);
        assert_eq!(profile.xp_to_next_level, 150);
        assert!(events(&f.rx).contains(&"level_up".to_string()));
    }

    #[tokio::test]
    async fn one_large_award_can_cross_several_thresholds() {
        let mut f = fixture(ScriptedGenerator::working());
        let mut profile = f.player.state().profile.clone();
        profile.xp = 95;
        profile.xp_to_next_level = 100;
        f.player.dispatch(Action::SetProfile { profile });

        let mut missions = f.player.state().missions.clone();
        missions[0].daily_missions[0].xp_reward = 200;
        f.player.dispatch(Action::SetMissions { missions });

        f.orchestrator
            .complete_mission(&mut f.player, "e1", "d1", "pages", 10.0, None)
            .await;

        // 295 total: -100 (level 2), -150 (level 3), 45 left toward 225.
        let profile = &f.player.state().profile;
        assert_eq!(profile.level, 3);
        assert_eq!(profile.xp, 45);
        assert_eq!(profile.xp_to_next_level, 225);
    }

    #[tokio::test]
    async fn second_completion_on_the_same_day_leaves_streak_alone() {
        let mut f = fixture(ScriptedGenerator::working());
        let day = at(2026, 3, 2, 9);
        f.orchestrator
            .complete_mission_at(&mut f.player, "e1", "d1", "pages", 10.0, None, day)
            .await;
        assert_eq!(f.player.state().profile.current_streak, 1);

        // The generator appended a follow-up; finish it later the same day.
        let next_id = f.player.state().missions[0].daily_missions[1].id.clone();
        f.orchestrator
            .complete_mission_at(
                &mut f.player,
                "e1",
                &next_id,
                "the thing",
                1.0,
                None,
                at(2026, 3, 2, 20),
            )
            .await;
        assert_eq!(f.player.state().profile.current_streak, 1);

        // Next calendar day advances it.
        let next_id = f.player.state().missions[0].daily_missions[2].id.clone();
        f.orchestrator
            .complete_mission_at(
                &mut f.player,
                "e1",
                &next_id,
                "the thing",
                1.0,
                None,
                at(2026, 3, 3, 8),
            )
            .await;
        assert_eq!(f.player.state().profile.current_streak, 2);
    }

    #[tokio::test]
    async fn skill_xp_levels_skill_and_raises_mapped_stats() {
        let mut f = fixture(ScriptedGenerator {
            skill_xp: Ok(120),
            ..ScriptedGenerator::working()
        });
        f.orchestrator
            .complete_mission(&mut f.player, "e1", "d1", "pages", 10.0, None)
            .await;

        let state = f.player.state();
        let skill = &state.skills[0];
        assert_eq!(skill.level, 2);
        assert_eq!(skill.xp, 20);
        assert_eq!(state.profile.stats.intelligence, 1);
        assert!(events(&f.rx).contains(&"skill_up".to_string()));
    }

    #[tokio::test]
    async fn skill_xp_failure_skips_the_skill_step_only() {
        let mut f = fixture(ScriptedGenerator {
            skill_xp: Err("boom".to_string()),
            ..ScriptedGenerator::working()
        });
        f.orchestrator
            .complete_mission(&mut f.player, "e1", "d1", "pages", 10.0, None)
            .await;

        let state = f.player.state();
        assert_eq!(state.skills[0].xp, 0);
        assert_eq!(state.profile.xp, 30);
        assert!(state.missions[0].daily_missions[0].completed);
    }

    #[tokio::test]
    async fn generator_failure_still_persists_progress() {
        let mut f = fixture(ScriptedGenerator::failing_next_mission(
            "Generator API returned error 500: internal",
        ));
        f.orchestrator
            .complete_mission(&mut f.player, "e1", "d1", "pages", 10.0, None)
            .await;

        let state = f.player.state();
        assert!(state.missions[0].daily_missions[0].completed);
        assert_eq!(state.missions[0].daily_missions.len(), 1);
        assert_eq!(state.profile.xp, 30);
        assert_eq!(state.profile.current_streak, 1);

        // XP/streak survived the failure and reached the store.
        let stored = f
            .store
            .read_singleton(crate::store::CollectionKey::Profile)
            .expect("read profile")
            .expect("profile persisted");
        assert_eq!(stored["total_missions_completed"], 1);
        assert_eq!(stored["xp"], 30);

        let emitted: Vec<_> = f.rx.try_iter().collect();
        let generator_error = emitted
            .iter()
            .find(|n| n.event.event_type() == "generator_error")
            .expect("generator error surfaced");
        match &generator_error.event {
            EngineEvent::GeneratorError { quota, .. } => assert!(!quota),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn quota_failures_are_flagged_distinctly() {
        let mut f = fixture(ScriptedGenerator::failing_next_mission(
            "Generator API returned error 429: rate limit exceeded",
        ));
        f.orchestrator
            .complete_mission(&mut f.player, "e1", "d1", "pages", 10.0, None)
            .await;
        let quota_flag = f.rx.try_iter().find_map(|n| match n.event {
            EngineEvent::GeneratorError { quota, .. } => Some(quota),
            _ => None,
        });
        assert_eq!(quota_flag, Some(true));
    }

    #[tokio::test]
    async fn final_daily_completes_epic_and_signals_next_rank() {
        let mut f = fixture(ScriptedGenerator::working());
        let mut missions = f.player.state().missions.clone();
        missions[0].total_daily_target = 1;
        // A higher-rank epic waits for the same goal.
        let mut follow_up = missions[0].clone();
        follow_up.id = "e2".to_string();
        follow_up.name = "Deeper Waters".to_string();
        follow_up.rank = Rank::E;
        follow_up.daily_missions = vec![];
        missions.push(follow_up);
        f.player.dispatch(Action::SetMissions { missions });

        f.orchestrator
            .complete_mission(&mut f.player, "e1", "d1", "pages", 10.0, None)
            .await;

        let state = f.player.state();
        assert!(state.missions[0].completed);
        assert!(!state.metas[0].completed);
        let emitted = events(&f.rx);
        assert!(emitted.contains(&"new_epic_mission".to_string()));
        assert!(!emitted.contains(&"goal_completed".to_string()));
    }

    #[tokio::test]
    async fn last_epic_of_a_goal_completes_the_goal_instead() {
        let mut f = fixture(ScriptedGenerator::working());
        let mut missions = f.player.state().missions.clone();
        missions[0].total_daily_target = 1;
        f.player.dispatch(Action::SetMissions { missions });

        f.orchestrator
            .complete_mission(&mut f.player, "e1", "d1", "pages", 10.0, None)
            .await;

        let state = f.player.state();
        assert!(state.missions[0].completed);
        assert!(state.metas[0].completed);
        let emitted = events(&f.rx);
        assert!(emitted.contains(&"goal_completed".to_string()));
        assert!(!emitted.contains(&"new_epic_mission".to_string()));
    }

    #[tokio::test]
    async fn xp_boost_effect_multiplies_base_reward_only() {
        let mut f = fixture(ScriptedGenerator::working());
        let now = Utc::now();
        let mut profile = f.player.state().profile.clone();
        profile.active_effects.push(crate::model::ActiveEffect::XpBoost {
            multiplier: 2.0,
            expires_at: now + chrono::Duration::hours(1),
        });
        f.player.dispatch(Action::SetProfile { profile });

        f.orchestrator
            .complete_mission(&mut f.player, "e1", "d1", "pages", 10.0, None)
            .await;
        assert_eq!(f.player.state().profile.xp, 60);
    }

    #[tokio::test]
    async fn streak_recovery_effect_bridges_a_gap_and_is_consumed() {
        let mut f = fixture(ScriptedGenerator::working());
        let mut profile = f.player.state().profile.clone();
        profile.current_streak = 5;
        profile.last_mission_completion_date = Some(at(2026, 3, 1, 10));
        profile.active_effects.push(crate::model::ActiveEffect::StreakRecovery {
            expires_at: at(2026, 3, 10, 0),
        });
        f.player.dispatch(Action::SetProfile { profile });

        f.orchestrator
            .complete_mission_at(&mut f.player, "e1", "d1", "pages", 10.0, None, at(2026, 3, 5, 10))
            .await;

        let profile = &f.player.state().profile;
        assert_eq!(profile.current_streak, 6);
        assert!(profile.active_effects.is_empty());
    }

    #[tokio::test]
    async fn streak_milestone_grants_flat_bonus() {
        let mut f = fixture(ScriptedGenerator::working());
        let mut profile = f.player.state().profile.clone();
        profile.current_streak = 2;
        profile.last_mission_completion_date = Some(at(2026, 3, 1, 10));
        f.player.dispatch(Action::SetProfile { profile });

        f.orchestrator
            .complete_mission_at(&mut f.player, "e1", "d1", "pages", 10.0, None, at(2026, 3, 2, 10))
            .await;

        let profile = &f.player.state().profile;
        assert_eq!(profile.current_streak, 3);
        // 30 base + 50 milestone xp; 5 + 10 milestone fragments.
        assert_eq!(profile.xp, 80);
        assert_eq!(profile.fragments, 15);
        assert!(events(&f.rx).contains(&"streak_bonus".to_string()));
    }

    #[test]
    fn skill_decay_sweep_flags_then_decays_idle_skills() {
        let (tx, rx) = flume::unbounded();
        let mut player = PlayerData::new(None, Notifier::new(tx));
        let skill = Skill {
            id: "skill-1".to_string(),
            name: "Rust".to_string(),
            category: SkillCategory::Intellectual,
            level: 2,
            max_level: 10,
            xp: 40,
            xp_to_next_level: 150,
        };
        let goal = Goal {
            linked_skill_id: Some(skill.id.clone()),
            ..crate::seed::quick_goal("Learn Rust", SkillCategory::Intellectual)
        };
        let epic = EpicMission {
            id: "e1".to_string(),
            name: "Foundations".to_string(),
            description: String::new(),
            rank: Rank::F,
            level_requirement: 1,
            goal_name: goal.name.clone(),
            total_daily_target: 3,
            completed: false,
            last_completed_at: Some(at(2026, 3, 1, 10)),
            daily_missions: vec![],
        };
        player.dispatch(Action::SetMetas { metas: vec![goal] });
        player.dispatch(Action::SetMissions { missions: vec![epic] });
        player.dispatch(Action::SetSkills { skills: vec![skill] });

        let orchestrator =
            CompletionOrchestrator::new(Arc::new(ScriptedGenerator::working()));

        orchestrator.sweep_skill_decay(&mut player, at(2026, 3, 5, 10));
        let emitted: Vec<_> = rx.try_iter().map(|n| n.event.event_type().to_string()).collect();
        assert_eq!(emitted, vec!["skill_at_risk"]);
        assert_eq!(player.state().skills[0].xp, 40);

        orchestrator.sweep_skill_decay(&mut player, at(2026, 3, 9, 10));
        let emitted: Vec<_> = rx.try_iter().map(|n| n.event.event_type().to_string()).collect();
        assert_eq!(emitted, vec!["skill_decay"]);
        assert_eq!(player.state().skills[0].xp, 20);
    }

    #[test]
    fn briefing_lists_open_goals_and_warns_about_streaks() {
        let mut state = crate::seed::default_state();
        state.profile.current_streak = 4;
        state.profile.last_mission_completion_date = Some(at(2026, 3, 1, 22));
        let event = daily_briefing(&state, at(2026, 3, 2, 12));
        match event {
            EngineEvent::DailyBriefing {
                pending_goals,
                caution,
                ..
            } => {
                assert_eq!(pending_goals, vec!["Build a daily routine".to_string()]);
                assert!(caution.unwrap().contains("4-day"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
