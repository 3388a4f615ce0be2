use anyhow::{Context, Result};
use flume::unbounded;
use questline_backend::config::EngineConfig;
use questline_backend::runtime::EngineRuntime;
use questline_backend::server::serve_backend;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,questline_backend=debug")),
        )
        .init();

    let config = EngineConfig::load();
    let (event_tx, event_rx) = unbounded();
    let runtime = EngineRuntime::bootstrap(config, event_tx)
        .context("failed to bootstrap engine runtime")?;

    tracing::info!(
        "Starting questline backend (set QUESTLINE_BACKEND_TOKEN + optional QUESTLINE_BACKEND_BIND; auth mode via QUESTLINE_BACKEND_AUTH_MODE)"
    );

    let server_rt = tokio::runtime::Runtime::new().context("failed to start server runtime")?;
    server_rt.block_on(serve_backend(runtime, event_rx))
}
