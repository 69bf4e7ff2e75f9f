use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use gemsource_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Field {
    fn new(key: &'static str, value: impl Into<String>, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.into(), env_keys }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    let workflow = &config.workflow;
    vec![
        Field::new("database.url", config.database.url.clone(), &["GEMSOURCE_DATABASE_URL"]),
        Field::new(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["GEMSOURCE_DATABASE_MAX_CONNECTIONS"],
        ),
        Field::new(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["GEMSOURCE_DATABASE_TIMEOUT_SECS"],
        ),
        Field::new(
            "gateway.base_url",
            config.gateway.base_url.clone(),
            &["GEMSOURCE_GATEWAY_BASE_URL"],
        ),
        Field::new(
            "gateway.secret_key",
            redact_secret(config.gateway.secret_key.as_ref()),
            &["GEMSOURCE_GATEWAY_SECRET_KEY"],
        ),
        Field::new(
            "gateway.timeout_secs",
            config.gateway.timeout_secs.to_string(),
            &["GEMSOURCE_GATEWAY_TIMEOUT_SECS"],
        ),
        Field::new(
            "server.bind_address",
            config.server.bind_address.clone(),
            &["GEMSOURCE_SERVER_BIND_ADDRESS"],
        ),
        Field::new(
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            &["GEMSOURCE_SERVER_HEALTH_CHECK_PORT"],
        ),
        Field::new(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["GEMSOURCE_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        Field::new(
            "workflow.negotiation_poll_secs",
            workflow.negotiation_poll_secs.to_string(),
            &["GEMSOURCE_WORKFLOW_NEGOTIATION_POLL_SECS"],
        ),
        Field::new(
            "workflow.expiring_soon_hours",
            workflow.expiring_soon_hours.to_string(),
            &["GEMSOURCE_WORKFLOW_EXPIRING_SOON_HOURS"],
        ),
        Field::new(
            "workflow.quotation_validity_days",
            workflow.quotation_validity_days.to_string(),
            &["GEMSOURCE_WORKFLOW_QUOTATION_VALIDITY_DAYS"],
        ),
        Field::new(
            "workflow.infer_legacy_ops_approval",
            workflow.infer_legacy_ops_approval.to_string(),
            &["GEMSOURCE_WORKFLOW_INFER_LEGACY_OPS_APPROVAL"],
        ),
        Field::new(
            "logging.level",
            config.logging.level.clone(),
            &["GEMSOURCE_LOGGING_LEVEL", "GEMSOURCE_LOG_LEVEL"],
        ),
        Field::new(
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["GEMSOURCE_LOGGING_FORMAT", "GEMSOURCE_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    ["gemsource.toml", "config/gemsource.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if config_file_doc.is_some_and(|doc| contains_path(doc, key_path)) {
        let file_path = config_file_path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "config file".to_string());
        return format!("file ({file_path})");
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps the `sk_test`/`sk_live` mode visible, hides the rest.
fn redact_secret(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    let mut parts = trimmed.splitn(3, '_');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(kind), Some(mode), Some(_)) => format!("{kind}_{mode}_***"),
        _ => "<redacted>".to_string(),
    }
}
