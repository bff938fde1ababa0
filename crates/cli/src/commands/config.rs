use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use receiptpath_core::config::{AppConfig, LoadOptions};
use toml::Value;

use crate::commands::{CommandResult, EXIT_CONFIG};

/// `(key path, environment variables that can set it)`; the first variable listed wins.
const FIELDS: &[(&str, &[&str])] = &[
    ("database.url", &["RECEIPTPATH_DATABASE_URL"]),
    ("database.max_connections", &["RECEIPTPATH_DATABASE_MAX_CONNECTIONS"]),
    ("database.timeout_secs", &["RECEIPTPATH_DATABASE_TIMEOUT_SECS"]),
    ("server.bind_address", &["RECEIPTPATH_SERVER_BIND_ADDRESS"]),
    ("server.port", &["RECEIPTPATH_SERVER_PORT"]),
    ("server.graceful_shutdown_secs", &["RECEIPTPATH_SERVER_GRACEFUL_SHUTDOWN_SECS"]),
    ("currency.enabled", &["RECEIPTPATH_CURRENCY_ENABLED"]),
    ("currency.base_url", &["RECEIPTPATH_CURRENCY_BASE_URL"]),
    ("currency.countries_url", &["RECEIPTPATH_CURRENCY_COUNTRIES_URL"]),
    ("currency.timeout_secs", &["RECEIPTPATH_CURRENCY_TIMEOUT_SECS"]),
    ("logging.level", &["RECEIPTPATH_LOGGING_LEVEL", "RECEIPTPATH_LOG_LEVEL"]),
    ("logging.format", &["RECEIPTPATH_LOGGING_FORMAT", "RECEIPTPATH_LOG_FORMAT"]),
];

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                EXIT_CONFIG,
            );
        }
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, env_keys) in FIELDS {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &effective_value(&config, key), source));
    }

    CommandResult::success("config", lines.join("\n"))
}

fn effective_value(config: &AppConfig, key: &str) -> String {
    match key {
        "database.url" => redact_url(&config.database.url),
        "database.max_connections" => config.database.max_connections.to_string(),
        "database.timeout_secs" => config.database.timeout_secs.to_string(),
        "server.bind_address" => config.server.bind_address.clone(),
        "server.port" => config.server.port.to_string(),
        "server.graceful_shutdown_secs" => config.server.graceful_shutdown_secs.to_string(),
        "currency.enabled" => config.currency.enabled.to_string(),
        "currency.base_url" => config.currency.base_url.clone(),
        "currency.countries_url" => config.currency.countries_url.clone(),
        "currency.timeout_secs" => config.currency.timeout_secs.to_string(),
        "logging.level" => config.logging.level.clone(),
        "logging.format" => format!("{:?}", config.logging.format).to_ascii_lowercase(),
        _ => "<unknown>".to_string(),
    }
}

fn detect_config_path() -> Option<PathBuf> {
    ["receiptpath.toml", "config/receiptpath.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|candidate| candidate.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|env_key| env::var_os(env_key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
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

/// Hides query parameters, which may carry credentials.
fn redact_url(url: &str) -> String {
    match url.split_once('?') {
        Some((path, _)) => format!("{path}?<redacted>"),
        None => url.to_string(),
    }
}
