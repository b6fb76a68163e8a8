use std::sync::Arc;
use std::time::Duration;

use crate::commands::CommandResult;
use costwise_core::config::{AppConfig, LoadOptions};
use costwise_db::{connect_with_settings, migrations, SqlWorkflowRepository};
use costwise_engine::{EscalationScheduler, SharedPolicy};

/// Runs exactly one escalation sweep, the same pass the server daemon runs
/// on its interval. Useful for cron-style deployments and for unblocking a
/// stalled queue by hand.
pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "sweep",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let policy = match SharedPolicy::from_config(&config.workflow) {
        Ok(policy) => policy,
        Err(error) => {
            return CommandResult::failure(
                "sweep",
                "config_validation",
                format!("workflow policy issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "sweep",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let repo = Arc::new(SqlWorkflowRepository::new(pool.clone()));
        let scheduler = EscalationScheduler::new(
            repo,
            policy,
            Duration::from_secs(config.workflow.sweep_interval_secs),
        );
        let report = scheduler
            .sweep_once()
            .await
            .map_err(|error| ("sweep_execution", error.to_string(), 5u8))?;

        pool.close().await;
        Ok::<_, (&'static str, String, u8)>(report)
    });

    match result {
        Ok(report) => CommandResult::success(
            "sweep",
            format!(
                "scanned {} overdue requests: {} escalated, {} expired, {} conflicts, {} reminders",
                report.scanned,
                report.escalated,
                report.expired,
                report.conflicts,
                report.reminders
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("sweep", error_class, message, exit_code)
        }
    }
}
