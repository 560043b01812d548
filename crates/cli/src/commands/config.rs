use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use bazaar_core::config::AppConfig;
use bazaar_core::config::LoadOptions;
use secrecy::ExposeSecret;
use toml::Value;

/// Dotted key, primary env var, secondary env alias.
const FIELDS: &[(&str, &str, Option<&str>)] = &[
    ("database.url", "BAZAAR_DATABASE_URL", None),
    ("database.max_connections", "BAZAAR_DATABASE_MAX_CONNECTIONS", None),
    ("database.timeout_secs", "BAZAAR_DATABASE_TIMEOUT_SECS", None),
    ("llm.provider", "BAZAAR_LLM_PROVIDER", None),
    ("llm.model", "BAZAAR_LLM_MODEL", None),
    ("llm.base_url", "BAZAAR_LLM_BASE_URL", None),
    ("llm.api_key", "BAZAAR_LLM_API_KEY", None),
    ("llm.timeout_secs", "BAZAAR_LLM_TIMEOUT_SECS", None),
    ("server.bind_address", "BAZAAR_SERVER_BIND_ADDRESS", None),
    ("server.port", "BAZAAR_SERVER_PORT", None),
    ("server.graceful_shutdown_secs", "BAZAAR_SERVER_GRACEFUL_SHUTDOWN_SECS", None),
    ("support.history_limit", "BAZAAR_SUPPORT_HISTORY_LIMIT", None),
    ("support.config_cache_ttl_secs", "BAZAAR_SUPPORT_CONFIG_CACHE_TTL_SECS", None),
    ("support.intent_rules_path", "BAZAAR_SUPPORT_INTENT_RULES_PATH", None),
    ("logging.level", "BAZAAR_LOGGING_LEVEL", Some("BAZAAR_LOG_LEVEL")),
    ("logging.format", "BAZAAR_LOGGING_FORMAT", Some("BAZAAR_LOG_FORMAT")),
];

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, env_key, alias) in FIELDS {
        let source =
            field_source(key, &[*env_key], *alias, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &field_value(&config, key), source));
    }
    lines.join("\n")
}

fn field_value(config: &AppConfig, key: &str) -> String {
    match key {
        "database.url" => redact_url(&config.database.url),
        "database.max_connections" => config.database.max_connections.to_string(),
        "database.timeout_secs" => config.database.timeout_secs.to_string(),
        "llm.provider" => config.llm.provider.as_str().to_string(),
        "llm.model" => config.llm.model.clone(),
        "llm.base_url" => config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
        "llm.api_key" => match &config.llm.api_key {
            Some(key) => redact_token(key.expose_secret()),
            None => "<unset>".to_string(),
        },
        "llm.timeout_secs" => config.llm.timeout_secs.to_string(),
        "server.bind_address" => config.server.bind_address.clone(),
        "server.port" => config.server.port.to_string(),
        "server.graceful_shutdown_secs" => config.server.graceful_shutdown_secs.to_string(),
        "support.history_limit" => config.support.history_limit.to_string(),
        "support.config_cache_ttl_secs" => config.support.config_cache_ttl_secs.to_string(),
        "support.intent_rules_path" => config
            .support
            .intent_rules_path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "<built-in>".to_string()),
        "logging.level" => config.logging.level.clone(),
        "logging.format" => format!("{:?}", config.logging.format).to_lowercase(),
        _ => "<unknown>".to_string(),
    }
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("bazaar.toml"), PathBuf::from("config/bazaar.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    alias: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    for env_key in env_keys.iter().copied().chain(alias) {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
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

/// Keeps a recognisable key prefix (`sk-`, `sk-ant-`) and hides the rest.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.rsplit_once('-') {
        if prefix.len() <= 8 {
            return format!("{prefix}-***");
        }
    }

    "<redacted>".to_string()
}

/// Hides a password embedded in a connection URL.
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.split_once('@') {
        Some((credentials, host)) if credentials.contains(':') => {
            let user = credentials.split(':').next().unwrap_or_default();
            format!("{scheme}://{user}:***@{host}")
        }
        _ => url.to_string(),
    }
}
