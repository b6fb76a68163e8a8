use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use costwise_core::config::{AppConfig, LoadOptions, LogFormat};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    let mut push = |field: &str, value: String, env_var: Option<&str>| {
        lines.push(render_line(
            field,
            &value,
            field_source(field, env_var, config_file_doc.as_ref(), config_file_path.as_deref()),
        ));
    };

    push("database.url", config.database.url.clone(), Some("COSTWISE_DATABASE_URL"));
    push(
        "database.max_connections",
        config.database.max_connections.to_string(),
        Some("COSTWISE_DATABASE_MAX_CONNECTIONS"),
    );
    push(
        "database.timeout_secs",
        config.database.timeout_secs.to_string(),
        Some("COSTWISE_DATABASE_TIMEOUT_SECS"),
    );

    push(
        "workflow.auto_escalate",
        config.workflow.auto_escalate.to_string(),
        Some("COSTWISE_WORKFLOW_AUTO_ESCALATE"),
    );
    push(
        "workflow.default_deadline_days",
        config.workflow.default_deadline_days.to_string(),
        Some("COSTWISE_WORKFLOW_DEFAULT_DEADLINE_DAYS"),
    );
    push(
        "workflow.review_window_days",
        config.workflow.review_window_days.to_string(),
        Some("COSTWISE_WORKFLOW_REVIEW_WINDOW_DAYS"),
    );
    push(
        "workflow.sweep_interval_secs",
        config.workflow.sweep_interval_secs.to_string(),
        Some("COSTWISE_WORKFLOW_SWEEP_INTERVAL_SECS"),
    );

    push("logging.level", config.logging.level.clone(), Some("COSTWISE_LOGGING_LEVEL"));
    let format = match config.logging.format {
        LogFormat::Compact => "compact",
        LogFormat::Pretty => "pretty",
        LogFormat::Json => "json",
    };
    push("logging.format", format.to_string(), Some("COSTWISE_LOGGING_FORMAT"));

    let tier_source = field_source(
        "workflow.tiers",
        None,
        config_file_doc.as_ref(),
        config_file_path.as_deref(),
    );
    lines.push(format!("workflow.tiers ({tier_source}):"));
    for tier in &config.workflow.tiers {
        let limit = tier
            .limit
            .map(|limit| limit.to_string())
            .unwrap_or_else(|| "unlimited".to_string());
        let deadline = tier
            .deadline_days
            .map(|days| format!("{days}d"))
            .unwrap_or_else(|| format!("{}d (default)", config.workflow.default_deadline_days));
        lines.push(format!("  {:<22} limit={:<12} deadline={}", tier.role, limit, deadline));
    }

    lines.join("\n")
}

fn render_line(field: &str, value: &str, source: String) -> String {
    format!("{field:<34} = {value:<28} [{source}]")
}

fn field_source(
    field: &str,
    env_var: Option<&str>,
    doc: Option<&Value>,
    path: Option<&Path>,
) -> String {
    if let Some(var) = env_var {
        if env::var(var).map(|value| !value.trim().is_empty()).unwrap_or(false) {
            return format!("env:{var}");
        }
    }

    if let (Some(doc), Some(path)) = (doc, path) {
        if lookup_dotted(doc, field).is_some() {
            return format!("file:{}", path.display());
        }
    }

    "default".to_string()
}

fn lookup_dotted<'a>(doc: &'a Value, field: &str) -> Option<&'a Value> {
    field.split('.').try_fold(doc, |value, segment| value.get(segment))
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("costwise.toml"), PathBuf::from("config/costwise.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    toml::from_str::<Value>(&raw).ok()
}

#[cfg(test)]
mod tests {
    use super::{field_source, lookup_dotted};

    #[test]
    fn dotted_lookup_walks_nested_tables() {
        let doc: toml::Value = toml::from_str(
            r#"
[workflow]
auto_escalate = false
"#,
        )
        .expect("parse");

        assert!(lookup_dotted(&doc, "workflow.auto_escalate").is_some());
        assert!(lookup_dotted(&doc, "workflow.sweep_interval_secs").is_none());
    }

    #[test]
    fn missing_everything_reports_default() {
        let source = field_source("database.url", None, None, None);
        assert_eq!(source, "default");
    }
}
