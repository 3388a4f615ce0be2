use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::config::EngineConfig;
use crate::events::{Notification, Notifier};
use crate::generator::HttpMissionGenerator;
use crate::orchestrator::{daily_briefing, CompletionOrchestrator};
use crate::store::DocumentStore;
use crate::sync::PlayerData;

/// Wires config, store, generator client and the player-data controller
/// together. The player state lives behind one async mutex; the server
/// handlers and background loops all go through it.
pub struct EngineRuntime {
    pub config: EngineConfig,
    pub player: Arc<tokio::sync::Mutex<PlayerData>>,
    pub orchestrator: Arc<CompletionOrchestrator>,
}

impl EngineRuntime {
    pub fn bootstrap(config: EngineConfig, event_tx: flume::Sender<Notification>) -> Result<Self> {
        if let Some(parent) = config.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create data dir {:?}", parent))?;
            }
        }

        // A broken store degrades to the unauthenticated/offline path
        // instead of refusing to start.
        let store = match DocumentStore::new(&config.database_path) {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                tracing::warn!("Failed to open document store: {:#}", e);
                None
            }
        };

        let notifier = Notifier::new(event_tx);
        let player = PlayerData::new(store, notifier)
            .with_load_timeout(Duration::from_secs(config.load_timeout_secs));

        let generator = Arc::new(HttpMissionGenerator::new(
            config.generator_api_url.clone(),
            config.generator_api_key.clone(),
            config.generator_model.clone(),
        ));

        Ok(Self {
            config,
            player: Arc::new(tokio::sync::Mutex::new(player)),
            orchestrator: Arc::new(CompletionOrchestrator::new(generator)),
        })
    }

    /// Bootstrap read: load everything (seeding a new account if needed),
    /// then run the inactivity sweep once against the loaded state.
    pub async fn initialize(&self) -> Result<()> {
        let mut player = self.player.lock().await;
        player.fetch_data().await?;
        self.orchestrator.sweep_skill_decay(&mut player, Utc::now());
        Ok(())
    }

    /// Proactive-tip timer: after the configured idle interval, emit one
    /// daily briefing for this loaded session.
    pub fn spawn_idle_tip_loop(&self) -> tokio::task::JoinHandle<()> {
        let player = self.player.clone();
        let interval = Duration::from_secs(self.config.idle_tip_interval_secs);
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let player = player.lock().await;
            let state = player.state();
            let settings = state.profile.user_settings.clone();
            let briefing = daily_briefing(state, Utc::now());
            player.notifier().emit(briefing, &settings);
        })
    }
}
