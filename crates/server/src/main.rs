mod bootstrap;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use costwise_core::config::{AppConfig, LoadOptions};
use costwise_db::SqlWorkflowRepository;
use costwise_engine::EscalationScheduler;
use tokio::sync::watch;

fn init_logging(config: &AppConfig) {
    use costwise_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let repo = Arc::new(SqlWorkflowRepository::new(app.db_pool.clone()));
    let scheduler = EscalationScheduler::new(
        repo,
        app.policy.clone(),
        Duration::from_secs(app.config.workflow.sweep_interval_secs),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    tracing::info!(
        event_name = "system.server.started",
        sweep_interval_secs = app.config.workflow.sweep_interval_secs,
        "costwise-server started"
    );

    wait_for_shutdown().await?;
    tracing::info!(event_name = "system.server.stopping", "costwise-server stopping");

    let _ = shutdown_tx.send(true);
    sweeper.await?;

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
