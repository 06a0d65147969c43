use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use chatrelay::config::Config;
use chatrelay::logging;
use chatrelay::orchestrator::{ChatOrchestrator, spawn_maintenance_task};
use chatrelay::server::{AppState, build_app};

const CONFIG_ENV: &str = "CHATRELAY_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "chatrelay.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = Config::load(&path)
        .await
        .with_context(|| format!("loading config from {path}"))?;
    config.apply_env()?;

    logging::init(&config.logging)?;
    config.validate().context("invalid configuration")?;

    let orchestrator = Arc::new(
        ChatOrchestrator::from_config(&config).context("building provider clients")?,
    );

    let cancel = CancellationToken::new();
    let maintenance = spawn_maintenance_task(
        orchestrator.clone(),
        Duration::from_secs(config.session.sweep_interval_seconds),
        cancel.clone(),
    );

    let app = build_app(AppState::new(orchestrator), &config.server);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %addr, "chatrelay listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    cancel.cancel();
    if let Err(e) = maintenance.await {
        warn!(error = %e, "Maintenance task ended abnormally");
    }
    info!("Shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let trigger = match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => "ctrl-c",
                _ = sigterm.recv() => "SIGTERM",
            }
        }
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler, using Ctrl+C only");
            ctrl_c().await
        }
    };
    info!(trigger, "Shutting down");
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let trigger = ctrl_c().await;
    info!(trigger, "Shutting down");
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    "ctrl-c"
}
