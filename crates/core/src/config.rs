use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hierarchy::{RoleHierarchy, RoleTier};
use crate::workflow::WorkflowPolicy;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub workflow: WorkflowConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// The hot-reloadable workflow surface: the tier table, deadlines, and the
/// escalation switch. `AppConfig::load` validates it once; the engine's
/// shared handle revalidates on every reload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub auto_escalate: bool,
    pub default_deadline_days: i64,
    pub review_window_days: i64,
    pub sweep_interval_secs: u64,
    pub tiers: Vec<TierConfig>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    pub role: String,
    pub limit: Option<Decimal>,
    pub deadline_days: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub auto_escalate: Option<bool>,
    pub sweep_interval_secs: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://costwise.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            workflow: WorkflowConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            auto_escalate: true,
            default_deadline_days: 3,
            review_window_days: 30,
            sweep_interval_secs: 86_400,
            tiers: RoleHierarchy::default()
                .tiers()
                .iter()
                .map(|tier| TierConfig {
                    role: tier.role.clone(),
                    limit: tier.limit,
                    deadline_days: Some(tier.deadline_days),
                })
                .collect(),
        }
    }
}

impl WorkflowConfig {
    /// Build the validated hierarchy table. Monotonicity violations and
    /// malformed tiers surface here, at load time, never per-request.
    pub fn hierarchy(&self) -> Result<RoleHierarchy, ConfigError> {
        let tiers = self
            .tiers
            .iter()
            .map(|tier| RoleTier {
                role: tier.role.clone(),
                limit: tier.limit,
                deadline_days: tier.deadline_days.unwrap_or(self.default_deadline_days),
            })
            .collect();

        RoleHierarchy::new(tiers).map_err(|error| ConfigError::Validation(error.to_string()))
    }

    pub fn policy(&self) -> Result<WorkflowPolicy, ConfigError> {
        Ok(WorkflowPolicy {
            hierarchy: self.hierarchy()?,
            auto_escalate: self.auto_escalate,
            default_deadline_days: self.default_deadline_days,
            review_window_days: self.review_window_days,
        })
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("costwise.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(auto_escalate) = workflow.auto_escalate {
                self.workflow.auto_escalate = auto_escalate;
            }
            if let Some(default_deadline_days) = workflow.default_deadline_days {
                self.workflow.default_deadline_days = default_deadline_days;
            }
            if let Some(review_window_days) = workflow.review_window_days {
                self.workflow.review_window_days = review_window_days;
            }
            if let Some(sweep_interval_secs) = workflow.sweep_interval_secs {
                self.workflow.sweep_interval_secs = sweep_interval_secs;
            }
            if let Some(tiers) = workflow.tiers {
                self.workflow.tiers = tiers;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("COSTWISE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("COSTWISE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("COSTWISE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("COSTWISE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("COSTWISE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("COSTWISE_WORKFLOW_AUTO_ESCALATE") {
            self.workflow.auto_escalate = parse_bool("COSTWISE_WORKFLOW_AUTO_ESCALATE", &value)?;
        }
        if let Some(value) = read_env("COSTWISE_WORKFLOW_DEFAULT_DEADLINE_DAYS") {
            self.workflow.default_deadline_days =
                parse_i64("COSTWISE_WORKFLOW_DEFAULT_DEADLINE_DAYS", &value)?;
        }
        if let Some(value) = read_env("COSTWISE_WORKFLOW_REVIEW_WINDOW_DAYS") {
            self.workflow.review_window_days =
                parse_i64("COSTWISE_WORKFLOW_REVIEW_WINDOW_DAYS", &value)?;
        }
        if let Some(value) = read_env("COSTWISE_WORKFLOW_SWEEP_INTERVAL_SECS") {
            self.workflow.sweep_interval_secs =
                parse_u64("COSTWISE_WORKFLOW_SWEEP_INTERVAL_SECS", &value)?;
        }

        let log_level =
            read_env("COSTWISE_LOGGING_LEVEL").or_else(|| read_env("COSTWISE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("COSTWISE_LOGGING_FORMAT").or_else(|| read_env("COSTWISE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(auto_escalate) = overrides.auto_escalate {
            self.workflow.auto_escalate = auto_escalate;
        }
        if let Some(sweep_interval_secs) = overrides.sweep_interval_secs {
            self.workflow.sweep_interval_secs = sweep_interval_secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_workflow(&self.workflow)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("costwise.toml"), PathBuf::from("config/costwise.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_workflow(workflow: &WorkflowConfig) -> Result<(), ConfigError> {
    if workflow.default_deadline_days <= 0 {
        return Err(ConfigError::Validation(
            "workflow.default_deadline_days must be greater than zero".to_string(),
        ));
    }
    if workflow.review_window_days <= 0 {
        return Err(ConfigError::Validation(
            "workflow.review_window_days must be greater than zero".to_string(),
        ));
    }
    if workflow.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "workflow.sweep_interval_secs must be greater than zero".to_string(),
        ));
    }

    // Builds the hierarchy to fail monotonicity violations at load time.
    workflow.hierarchy().map(|_| ())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    workflow: Option<WorkflowPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    auto_escalate: Option<bool>,
    default_deadline_days: Option<i64>,
    review_window_days: Option<i64>,
    sweep_interval_secs: Option<u64>,
    tiers: Option<Vec<TierConfig>>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_validate_and_carry_the_stock_tier_table() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.workflow.auto_escalate, "auto escalation defaults to enabled")?;
        ensure(config.workflow.tiers.len() == 6, "stock table has six tiers")?;
        ensure(
            config.workflow.tiers[0].role == "category_buyer",
            "lowest tier is the category buyer",
        )?;
        config.workflow.hierarchy().map_err(|err| format!("stock hierarchy invalid: {err}"))?;
        Ok(())
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_COSTWISE_DB", "sqlite://interpolated.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("costwise.toml");
            fs::write(
                &path,
                r#"
[database]
url = "${TEST_COSTWISE_DB}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://interpolated.db",
                "database url should come from the environment",
            )
        })();

        clear_vars(&["TEST_COSTWISE_DB"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("COSTWISE_WORKFLOW_AUTO_ESCALATE", "false");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("costwise.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[workflow]
auto_escalate = true
review_window_days = 45

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should win")?;
            ensure(!config.workflow.auto_escalate, "env auto_escalate should beat the file")?;
            ensure(config.workflow.review_window_days == 45, "file review window should apply")?;
            Ok(())
        })();

        clear_vars(&["COSTWISE_WORKFLOW_AUTO_ESCALATE"]);
        result
    }

    #[test]
    fn misordered_tier_table_fails_at_load() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("costwise.toml");
        fs::write(
            &path,
            r#"
[[workflow.tiers]]
role = "category_buyer"
limit = 80000

[[workflow.tiers]]
role = "pricing_analyst"
limit = 50000
"#,
        )
        .map_err(|err| err.to_string())?;

        let error =
            match AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
            {
                Ok(_) => return Err("misordered limits should fail validation".to_string()),
                Err(error) => error,
            };

        let validates_order = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("non-decreasing")
        );
        ensure(validates_order, "validation error should mention limit ordering")
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("COSTWISE_LOG_LEVEL", "warn");
        env::set_var("COSTWISE_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warn log level should come from env")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty format should come from env",
            )
        })();

        clear_vars(&["COSTWISE_LOG_LEVEL", "COSTWISE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn invalid_env_override_is_reported_with_its_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("COSTWISE_WORKFLOW_SWEEP_INTERVAL_SECS", "often");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("invalid override should fail".to_string()),
                Err(error) => error,
            };
            let mentions_key = matches!(
                error,
                ConfigError::InvalidEnvOverride { ref key, .. }
                    if key == "COSTWISE_WORKFLOW_SWEEP_INTERVAL_SECS"
            );
            ensure(mentions_key, "error should name the offending variable")
        })();

        clear_vars(&["COSTWISE_WORKFLOW_SWEEP_INTERVAL_SECS"]);
        result
    }
}
