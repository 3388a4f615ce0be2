use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_generator_api_url")]
    pub generator_api_url: String,
    #[serde(default)]
    pub generator_api_key: String,
    #[serde(default = "default_generator_model")]
    pub generator_model: String,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Proactive-tip timer per loaded session, seconds.
    #[serde(default = "default_idle_tip_interval_secs")]
    pub idle_tip_interval_secs: u64,
    /// Hard cap on the bootstrap read before degrading to the offline seed.
    #[serde(default = "default_load_timeout_secs")]
    pub load_timeout_secs: u64,
}

fn default_generator_api_url() -> String {
    "http://127.0.0.1:8080/v1".to_string()
}

fn default_generator_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("questline"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("questline.db")
}

fn default_bind_addr() -> String {
    "127.0.0.1:8797".to_string()
}

fn default_idle_tip_interval_secs() -> u64 {
    90
}

fn default_load_timeout_secs() -> u64 {
    15
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            generator_api_url: default_generator_api_url(),
            generator_api_key: String::new(),
            generator_model: default_generator_model(),
            database_path: default_database_path(),
            bind_addr: default_bind_addr(),
            idle_tip_interval_secs: default_idle_tip_interval_secs(),
            load_timeout_secs: default_load_timeout_secs(),
        }
    }
}

impl EngineConfig {
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("questline_config.toml")
    }

    /// Load from questline_config.toml next to the executable, falling back
    /// to defaults plus environment variables.
    pub fn load() -> Self {
        let path = Self::config_path();

        if let Ok(contents) = fs::read_to_string(&path) {
            match toml::from_str::<EngineConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config;
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::from_env()
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var("QUESTLINE_GENERATOR_URL") {
            config.generator_api_url = url;
        }
        if let Ok(key) = env::var("QUESTLINE_GENERATOR_KEY") {
            config.generator_api_key = key;
        }
        if let Ok(model) = env::var("QUESTLINE_GENERATOR_MODEL") {
            config.generator_model = model;
        }
        if let Ok(path) = env::var("QUESTLINE_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Ok(bind) = env::var("QUESTLINE_BACKEND_BIND") {
            config.bind_addr = bind;
        }

        config
    }
}
