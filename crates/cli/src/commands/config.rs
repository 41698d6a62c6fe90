use std::env;
use std::path::{Path, PathBuf};

use fileway_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let entries: Vec<(&str, String, Option<&str>)> = vec![
        ("database.url", config.database.url.clone(), Some("FILEWAY_DATABASE_URL")),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            Some("FILEWAY_DATABASE_MAX_CONNECTIONS"),
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            Some("FILEWAY_DATABASE_TIMEOUT_SECS"),
        ),
        (
            "server.bind_address",
            config.server.bind_address.clone(),
            Some("FILEWAY_SERVER_BIND_ADDRESS"),
        ),
        ("server.port", config.server.port.to_string(), Some("FILEWAY_SERVER_PORT")),
        (
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            Some("FILEWAY_SERVER_HEALTH_CHECK_PORT"),
        ),
        (
            "notifications.enabled",
            config.notifications.enabled.to_string(),
            Some("FILEWAY_NOTIFICATIONS_ENABLED"),
        ),
        (
            "notifications.dispatch_interval_secs",
            config.notifications.dispatch_interval_secs.to_string(),
            Some("FILEWAY_NOTIFICATIONS_DISPATCH_INTERVAL_SECS"),
        ),
        (
            "notifications.batch_size",
            config.notifications.batch_size.to_string(),
            Some("FILEWAY_NOTIFICATIONS_BATCH_SIZE"),
        ),
        ("logging.level", config.logging.level.clone(), Some("FILEWAY_LOGGING_LEVEL")),
        ("logging.format", format!("{:?}", config.logging.format), Some("FILEWAY_LOGGING_FORMAT")),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_var) in entries {
        let source = field_source(key, env_var, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(format!("  {key} = {value}  [{source}]"));
    }
    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("fileway.toml"), PathBuf::from("config/fileway.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = std::fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key: &str,
    env_var: Option<&str>,
    file_doc: Option<&Value>,
    file_path: Option<&Path>,
) -> String {
    if let Some(env_var) = env_var {
        if env::var(env_var).map(|value| !value.trim().is_empty()).unwrap_or(false) {
            return format!("env:{env_var}");
        }
    }

    if let (Some(doc), Some(path)) = (file_doc, file_path) {
        let mut cursor = Some(doc);
        for segment in key.split('.') {
            cursor = cursor.and_then(|value| value.get(segment));
        }
        if cursor.is_some() {
            return format!("file:{}", path.display());
        }
    }

    "default".to_string()
}
