use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::status::DeriveOptions;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub server: ServerConfig,
    pub workflow: WorkflowConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub base_url: String,
    pub secret_key: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowConfig {
    pub negotiation_poll_secs: u64,
    pub expiring_soon_hours: i64,
    pub quotation_validity_days: i64,
    pub infer_legacy_ops_approval: bool,
}

impl WorkflowConfig {
    pub fn negotiation_poll_interval(&self) -> Duration {
        Duration::from_secs(self.negotiation_poll_secs)
    }

    pub fn quotation_validity(&self) -> chrono::Duration {
        chrono::Duration::days(self.quotation_validity_days)
    }

    pub fn expiring_soon_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.expiring_soon_hours)
    }

    pub fn derive_options(&self) -> DeriveOptions {
        DeriveOptions { infer_legacy_ops_approval: self.infer_legacy_ops_approval }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            negotiation_poll_secs: 5,
            expiring_soon_hours: 24,
            quotation_validity_days: 7,
            infer_legacy_ops_approval: true,
        }
    }
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
    pub gateway_base_url: Option<String>,
    pub gateway_secret_key: Option<String>,
    pub infer_legacy_ops_approval: Option<bool>,
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
                url: "sqlite://gemsource.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            gateway: GatewayConfig {
                base_url: "https://api.stripe.com".to_string(),
                secret_key: None,
                timeout_secs: 10,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            workflow: WorkflowConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("gemsource.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn gateway_configured(&self) -> bool {
        self.gateway
            .secret_key
            .as_ref()
            .is_some_and(|key| !key.expose_secret().trim().is_empty())
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

        if let Some(gateway) = patch.gateway {
            if let Some(base_url) = gateway.base_url {
                self.gateway.base_url = base_url;
            }
            if let Some(secret_key) = gateway.secret_key {
                self.gateway.secret_key = Some(secret_value(secret_key));
            }
            if let Some(timeout_secs) = gateway.timeout_secs {
                self.gateway.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(poll) = workflow.negotiation_poll_secs {
                self.workflow.negotiation_poll_secs = poll;
            }
            if let Some(hours) = workflow.expiring_soon_hours {
                self.workflow.expiring_soon_hours = hours;
            }
            if let Some(days) = workflow.quotation_validity_days {
                self.workflow.quotation_validity_days = days;
            }
            if let Some(infer) = workflow.infer_legacy_ops_approval {
                self.workflow.infer_legacy_ops_approval = infer;
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
        if let Some(value) = read_env("GEMSOURCE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("GEMSOURCE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_value("GEMSOURCE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("GEMSOURCE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_value("GEMSOURCE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("GEMSOURCE_GATEWAY_BASE_URL") {
            self.gateway.base_url = value;
        }
        if let Some(value) = read_env("GEMSOURCE_GATEWAY_SECRET_KEY") {
            self.gateway.secret_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("GEMSOURCE_GATEWAY_TIMEOUT_SECS") {
            self.gateway.timeout_secs = parse_value("GEMSOURCE_GATEWAY_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("GEMSOURCE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("GEMSOURCE_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_value("GEMSOURCE_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("GEMSOURCE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_value("GEMSOURCE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("GEMSOURCE_WORKFLOW_NEGOTIATION_POLL_SECS") {
            self.workflow.negotiation_poll_secs =
                parse_value("GEMSOURCE_WORKFLOW_NEGOTIATION_POLL_SECS", &value)?;
        }
        if let Some(value) = read_env("GEMSOURCE_WORKFLOW_EXPIRING_SOON_HOURS") {
            self.workflow.expiring_soon_hours =
                parse_value("GEMSOURCE_WORKFLOW_EXPIRING_SOON_HOURS", &value)?;
        }
        if let Some(value) = read_env("GEMSOURCE_WORKFLOW_QUOTATION_VALIDITY_DAYS") {
            self.workflow.quotation_validity_days =
                parse_value("GEMSOURCE_WORKFLOW_QUOTATION_VALIDITY_DAYS", &value)?;
        }
        if let Some(value) = read_env("GEMSOURCE_WORKFLOW_INFER_LEGACY_OPS_APPROVAL") {
            self.workflow.infer_legacy_ops_approval =
                parse_value("GEMSOURCE_WORKFLOW_INFER_LEGACY_OPS_APPROVAL", &value)?;
        }

        let log_level =
            read_env("GEMSOURCE_LOGGING_LEVEL").or_else(|| read_env("GEMSOURCE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("GEMSOURCE_LOGGING_FORMAT").or_else(|| read_env("GEMSOURCE_LOG_FORMAT"));
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
        if let Some(base_url) = overrides.gateway_base_url {
            self.gateway.base_url = base_url;
        }
        if let Some(secret_key) = overrides.gateway_secret_key {
            self.gateway.secret_key = Some(secret_value(secret_key));
        }
        if let Some(infer) = overrides.infer_legacy_ops_approval {
            self.workflow.infer_legacy_ops_approval = infer;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_gateway(&self.gateway)?;
        validate_server(&self.server)?;
        validate_workflow(&self.workflow)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("gemsource.toml"), PathBuf::from("config/gemsource.toml")]
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

fn validate_gateway(gateway: &GatewayConfig) -> Result<(), ConfigError> {
    let base_url = gateway.base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "gateway.base_url must start with http:// or https://".to_string(),
        ));
    }

    if gateway.timeout_secs == 0 || gateway.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "gateway.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    if let Some(secret_key) = &gateway.secret_key {
        let key = secret_key.expose_secret().trim();
        if !key.is_empty() && !key.starts_with("sk_") {
            return Err(ConfigError::Validation(
                "gateway.secret_key must be a secret key starting with `sk_` (publishable keys cannot verify sessions)"
                    .to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_workflow(workflow: &WorkflowConfig) -> Result<(), ConfigError> {
    if workflow.negotiation_poll_secs == 0 || workflow.negotiation_poll_secs > 300 {
        return Err(ConfigError::Validation(
            "workflow.negotiation_poll_secs must be in range 1..=300".to_string(),
        ));
    }

    if workflow.quotation_validity_days <= 0 {
        return Err(ConfigError::Validation(
            "workflow.quotation_validity_days must be greater than zero".to_string(),
        ));
    }

    if workflow.expiring_soon_hours <= 0 {
        return Err(ConfigError::Validation(
            "workflow.expiring_soon_hours must be greater than zero".to_string(),
        ));
    }

    Ok(())
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

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    gateway: Option<GatewayPatch>,
    server: Option<ServerPatch>,
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
struct GatewayPatch {
    base_url: Option<String>,
    secret_key: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    negotiation_poll_secs: Option<u64>,
    expiring_soon_hours: Option<i64>,
    quotation_validity_days: Option<i64>,
    infer_legacy_ops_approval: Option<bool>,
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
    use std::time::Duration;

    use secrecy::ExposeSecret;
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
    fn defaults_load_without_file_or_env() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.workflow.negotiation_poll_secs == 5, "poll interval defaults to 5s")?;
        ensure(
            config.workflow.negotiation_poll_interval() == Duration::from_secs(5),
            "poll interval converts to a duration",
        )?;
        ensure(config.workflow.expiring_soon_hours == 24, "expiring-soon window defaults to 24h")?;
        ensure(config.workflow.infer_legacy_ops_approval, "legacy inference defaults on")?;
        ensure(!config.gateway_configured(), "gateway has no key by default")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_GATEWAY_SECRET", "sk_test_from_env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("gemsource.toml");
            fs::write(
                &path,
                r#"
[gateway]
secret_key = "${TEST_GATEWAY_SECRET}"

[workflow]
quotation_validity_days = 14
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config
                    .gateway
                    .secret_key
                    .as_ref()
                    .is_some_and(|key| key.expose_secret() == "sk_test_from_env"),
                "gateway key should be loaded from environment",
            )?;
            ensure(config.gateway_configured(), "gateway should count as configured")?;
            ensure(config.workflow.quotation_validity_days == 14, "file should set validity")?;
            Ok(())
        })();

        clear_vars(&["TEST_GATEWAY_SECRET"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("GEMSOURCE_LOG_LEVEL", "warn");
        env::set_var("GEMSOURCE_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["GEMSOURCE_LOG_LEVEL", "GEMSOURCE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("GEMSOURCE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("GEMSOURCE_WORKFLOW_NEGOTIATION_POLL_SECS", "9");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("gemsource.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[workflow]
negotiation_poll_secs = 3
infer_legacy_ops_approval = true

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
                    infer_legacy_ops_approval: Some(false),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.workflow.negotiation_poll_secs == 9, "env poll interval should beat file")?;
            ensure(
                !config.workflow.derive_options().infer_legacy_ops_approval,
                "override should disable legacy inference",
            )?;
            Ok(())
        })();

        clear_vars(&["GEMSOURCE_DATABASE_URL", "GEMSOURCE_WORKFLOW_NEGOTIATION_POLL_SECS"]);
        result
    }

    #[test]
    fn invalid_env_override_is_reported_with_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("GEMSOURCE_WORKFLOW_INFER_LEGACY_OPS_APPROVAL", "sometimes");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected override failure but load succeeded".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::InvalidEnvOverride { ref key, .. }
                        if key == "GEMSOURCE_WORKFLOW_INFER_LEGACY_OPS_APPROVAL"
                ),
                "error should name the offending variable",
            )
        })();

        clear_vars(&["GEMSOURCE_WORKFLOW_INFER_LEGACY_OPS_APPROVAL"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("GEMSOURCE_GATEWAY_SECRET_KEY", "pk_live_publishable");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("gateway.secret_key")
            );
            ensure(has_message, "validation failure should mention gateway.secret_key")
        })();

        clear_vars(&["GEMSOURCE_GATEWAY_SECRET_KEY"]);
        result
    }

    #[test]
    fn missing_required_file_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let error = AppConfig::load(LoadOptions {
            config_path: Some(dir.path().join("absent.toml")),
            require_file: true,
            ..LoadOptions::default()
        });
        ensure(
            matches!(error, Err(ConfigError::MissingConfigFile(_))),
            "required file should be reported missing",
        )
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("GEMSOURCE_GATEWAY_SECRET_KEY", "sk_test_secret_value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("sk_test_secret_value"),
                "debug output should not contain the gateway key",
            )?;
            Ok(())
        })();

        clear_vars(&["GEMSOURCE_GATEWAY_SECRET_KEY"]);
        result
    }
}
