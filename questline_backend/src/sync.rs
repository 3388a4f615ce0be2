use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::backup::BackupFile;
use crate::events::{EngineEvent, Notifier};
use crate::model::{EpicMission, Goal, Profile, Skill};
use crate::progression::{reduce, Action, AppState};
use crate::seed;
use crate::store::{CollectionKey, DocumentStore};

pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(15);

/// Bootstrap / reset / import lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Uninitialized,
    Loading,
    Loaded,
    Resetting,
    Importing,
}

/// Owns the in-memory state and mirrors it to the document store.
///
/// Writes are optimistic: the in-memory state advances first, then the store
/// write is attempted. Failures are surfaced as a sync-error event with no
/// retry and no rollback; local and remote diverge until the next fetch.
/// Without a store (unauthenticated session) every persistence call is a
/// silent no-op.
pub struct PlayerData {
    state: AppState,
    phase: LoadPhase,
    store: Option<Arc<DocumentStore>>,
    notifier: Notifier,
    load_timeout: Duration,
}

impl PlayerData {
    pub fn new(store: Option<Arc<DocumentStore>>, notifier: Notifier) -> Self {
        Self {
            state: AppState::default(),
            phase: LoadPhase::Uninitialized,
            store,
            notifier,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
        }
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn snapshot(&self) -> AppState {
        self.state.clone()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Synchronous in-memory transition. Does not touch the store.
    pub fn dispatch(&mut self, action: Action) {
        let state = std::mem::take(&mut self.state);
        self.state = reduce(state, action);
    }

    /// Mirror one collection to the store: singletons are overwritten whole,
    /// multi-document collections are reconciled by id diff (absence from
    /// the in-memory array is the only way deletion is expressed).
    pub fn persist(&self, key: CollectionKey) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let result = if key.is_singleton() {
            self.singleton_value(key)
                .and_then(|value| store.write_singleton(key, &value))
        } else {
            self.collection_docs(key)
                .and_then(|docs| store.reconcile(key, &docs).map(|_| ()))
        };
        if let Err(e) = result {
            tracing::error!(collection = key.as_str(), "sync write failed: {:#}", e);
            self.notifier.emit(
                EngineEvent::SyncError {
                    collection: key.as_str().to_string(),
                    message: format!("{e:#}"),
                },
                &self.state.profile.user_settings,
            );
        }
    }

    /// Atomic profile+missions+skills write for the completion cascade.
    pub fn persist_completion_batch(&self) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let result = (|| -> Result<()> {
            let profile = serde_json::to_value(&self.state.profile)?;
            let missions = self.collection_docs(CollectionKey::Missions)?;
            let skills = self.collection_docs(CollectionKey::Skills)?;
            store.commit_batch(&profile, &missions, &skills)
        })();
        if let Err(e) = result {
            tracing::error!("completion batch write failed: {:#}", e);
            self.notifier.emit(
                EngineEvent::SyncError {
                    collection: "profile+missions+skills".to_string(),
                    message: format!("{e:#}"),
                },
                &self.state.profile.user_settings,
            );
        }
    }

    fn singleton_value(&self, key: CollectionKey) -> Result<serde_json::Value> {
        Ok(match key {
            CollectionKey::Profile => serde_json::to_value(&self.state.profile)?,
            CollectionKey::Routine => self.state.routine.clone(),
            CollectionKey::RoutineTemplates => self.state.routine_templates.clone(),
            other => anyhow::bail!("'{}' is not a singleton", other.as_str()),
        })
    }

    fn collection_docs(&self, key: CollectionKey) -> Result<Vec<(String, serde_json::Value)>> {
        fn by_id<T: serde::Serialize>(
            items: &[T],
            id: impl Fn(&T) -> String,
        ) -> Result<Vec<(String, serde_json::Value)>> {
            items
                .iter()
                .map(|item| Ok((id(item), serde_json::to_value(item)?)))
                .collect()
        }

        match key {
            CollectionKey::Metas => by_id(&self.state.metas, |g| g.id.clone()),
            CollectionKey::Missions => by_id(&self.state.missions, |m| m.id.clone()),
            CollectionKey::Skills => by_id(&self.state.skills, |s| s.id.clone()),
            CollectionKey::Guilds => opaque_docs(&self.state.guilds),
            CollectionKey::Users => opaque_docs(&self.state.users),
            other => anyhow::bail!("'{}' is not a collection", other.as_str()),
        }
    }

    /// Read everything from the store. A hard timeout forces the loaded
    /// phase with the offline seed so the caller is never blocked
    /// indefinitely; a missing profile means a new account and triggers a
    /// seeding reset.
    pub async fn fetch_data(&mut self) -> Result<()> {
        self.phase = LoadPhase::Loading;

        let Some(store) = self.store.clone() else {
            tracing::warn!("no store attached; loading offline seed");
            self.state = seed::offline_state();
            self.phase = LoadPhase::Loaded;
            return Ok(());
        };

        let loaded = tokio::time::timeout(
            self.load_timeout,
            tokio::task::spawn_blocking(move || load_all(&store)),
        )
        .await;

        match loaded {
            Ok(Ok(Ok(Some(state)))) => {
                self.dispatch(Action::SetInitialData {
                    state: Box::new(state),
                });
                self.phase = LoadPhase::Loaded;
            }
            Ok(Ok(Ok(None))) => {
                tracing::info!("no profile document; seeding new account");
                self.reset().await?;
            }
            Ok(Ok(Err(e))) => {
                tracing::error!("store read failed, degrading to offline seed: {:#}", e);
                self.state = seed::offline_state();
                self.phase = LoadPhase::Loaded;
            }
            Ok(Err(join_err)) => {
                tracing::error!("store read task failed: {}", join_err);
                self.state = seed::offline_state();
                self.phase = LoadPhase::Loaded;
            }
            Err(_) => {
                tracing::error!(
                    "store read timed out after {:?}, degrading to offline seed",
                    self.load_timeout
                );
                self.state = seed::offline_state();
                self.phase = LoadPhase::Loaded;
            }
        }
        Ok(())
    }

    /// Full account reset: wipe the store, seed the default template
    /// dataset, and make it the in-memory state. Errors propagate so the
    /// invoking surface can keep its confirmation open.
    pub async fn reset(&mut self) -> Result<()> {
        self.phase = LoadPhase::Resetting;
        let fresh = seed::default_state();
        if let Some(store) = self.store.as_ref() {
            store.clear_all().context("failed to clear store for reset")?;
            write_state(store, &fresh).context("failed to seed default data")?;
        }
        self.state = fresh;
        self.phase = LoadPhase::Loaded;
        Ok(())
    }

    /// Import a JSON backup. Validation happens before any destructive
    /// write: a malformed payload leaves both memory and store untouched.
    pub async fn import(&mut self, raw: &str) -> Result<()> {
        let backup = BackupFile::parse(raw)?;
        self.phase = LoadPhase::Importing;
        let imported = backup.into_state();
        if let Some(store) = self.store.as_ref() {
            store.clear_all().context("failed to clear store for import")?;
            write_state(store, &imported).context("failed to write imported data")?;
        }
        self.state = imported;
        self.phase = LoadPhase::Loaded;
        Ok(())
    }

    pub fn export(&self) -> Result<String> {
        serde_json::to_string_pretty(&BackupFile::from_state(&self.state))
            .context("failed to serialize backup")
    }

    /// Rename a goal, cascading to every epic mission that references it by
    /// name so the by-name link never orphans.
    pub fn rename_goal(&mut self, goal_id: &str, new_name: &str) {
        let Some(old_name) = self
            .state
            .metas
            .iter()
            .find(|g| g.id == goal_id)
            .map(|g| g.name.clone())
        else {
            return;
        };
        for goal in &mut self.state.metas {
            if goal.id == goal_id {
                goal.name = new_name.to_string();
            }
        }
        for mission in &mut self.state.missions {
            if mission.goal_name == old_name {
                mission.goal_name = new_name.to_string();
            }
        }
        self.persist(CollectionKey::Metas);
        self.persist(CollectionKey::Missions);
    }

    /// Delete a goal together with every mission referencing it and its
    /// linked skill.
    pub fn delete_goal(&mut self, goal_id: &str) {
        let Some(pos) = self.state.metas.iter().position(|g| g.id == goal_id) else {
            return;
        };
        let goal = self.state.metas.remove(pos);
        self.state.missions.retain(|m| m.goal_name != goal.name);
        if let Some(skill_id) = goal.linked_skill_id {
            self.state.skills.retain(|s| s.id != skill_id);
        }
        self.persist(CollectionKey::Metas);
        self.persist(CollectionKey::Missions);
        self.persist(CollectionKey::Skills);
    }
}

fn opaque_docs(values: &[serde_json::Value]) -> Result<Vec<(String, serde_json::Value)>> {
    Ok(values
        .iter()
        .filter_map(|v| {
            let id = v.get("id").and_then(|id| id.as_str())?;
            Some((id.to_string(), v.clone()))
        })
        .collect())
}

/// Write a full state to the store (seed path for reset/import).
fn write_state(store: &DocumentStore, state: &AppState) -> Result<()> {
    store.write_singleton(CollectionKey::Profile, &serde_json::to_value(&state.profile)?)?;
    if !state.routine.is_null() {
        store.write_singleton(CollectionKey::Routine, &state.routine)?;
    }
    if !state.routine_templates.is_null() {
        store.write_singleton(CollectionKey::RoutineTemplates, &state.routine_templates)?;
    }
    store.reconcile(CollectionKey::Metas, &typed_docs(&state.metas, |g: &Goal| g.id.clone())?)?;
    store.reconcile(
        CollectionKey::Missions,
        &typed_docs(&state.missions, |m: &EpicMission| m.id.clone())?,
    )?;
    store.reconcile(
        CollectionKey::Skills,
        &typed_docs(&state.skills, |s: &Skill| s.id.clone())?,
    )?;
    store.reconcile(CollectionKey::Guilds, &opaque_docs(&state.guilds)?)?;
    store.reconcile(CollectionKey::Users, &opaque_docs(&state.users)?)?;
    Ok(())
}

fn typed_docs<T: serde::Serialize>(
    items: &[T],
    id: impl Fn(&T) -> String,
) -> Result<Vec<(String, serde_json::Value)>> {
    items
        .iter()
        .map(|item| Ok((id(item), serde_json::to_value(item)?)))
        .collect()
}

/// Read the whole subtree. `Ok(None)` means the profile document does not
/// exist (new account). Individually malformed documents are skipped with a
/// warning rather than failing the whole load.
fn load_all(store: &DocumentStore) -> Result<Option<AppState>> {
    let Some(profile_raw) = store.read_singleton(CollectionKey::Profile)? else {
        return Ok(None);
    };
    let profile: Profile =
        serde_json::from_value(profile_raw).context("profile document has an invalid shape")?;

    let metas = parse_collection::<Goal>(store, CollectionKey::Metas)?;
    let missions = parse_collection::<EpicMission>(store, CollectionKey::Missions)?;
    let skills = parse_collection::<Skill>(store, CollectionKey::Skills)?;
    let routine = store
        .read_singleton(CollectionKey::Routine)?
        .unwrap_or(serde_json::Value::Null);
    let routine_templates = store
        .read_singleton(CollectionKey::RoutineTemplates)?
        .unwrap_or(serde_json::Value::Null);
    let guilds = store
        .read_collection(CollectionKey::Guilds)?
        .into_iter()
        .map(|(_, v)| v)
        .collect();
    let users = store
        .read_collection(CollectionKey::Users)?
        .into_iter()
        .map(|(_, v)| v)
        .collect();

    Ok(Some(AppState {
        profile,
        metas,
        missions,
        skills,
        routine,
        routine_templates,
        guilds,
        users,
    }))
}

fn parse_collection<T: serde::de::DeserializeOwned>(
    store: &DocumentStore,
    key: CollectionKey,
) -> Result<Vec<T>> {
    let mut parsed = Vec::new();
    for (id, value) in store.read_collection(key)? {
        match serde_json::from_value(value) {
            Ok(item) => parsed.push(item),
            Err(e) => {
                tracing::warn!(
                    collection = key.as_str(),
                    id = id.as_str(),
                    "skipping malformed document: {}",
                    e
                );
            }
        }
    }
    Ok(parsed)
}
