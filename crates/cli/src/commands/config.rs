use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use fieldops_core::config::{AppConfig, LoadOptions};
use toml::Value;

use crate::commands::CommandResult;

/// Key path, rendered value, and the env vars that can override it (first match wins).
type Field = (&'static str, String, &'static [&'static str]);

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            );
        }
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let fields = vec![
        field("database.url", &config.database.url, &["FIELDOPS_DATABASE_URL"]),
        field(
            "database.max_connections",
            config.database.max_connections,
            &["FIELDOPS_DATABASE_MAX_CONNECTIONS"],
        ),
        field(
            "database.timeout_secs",
            config.database.timeout_secs,
            &["FIELDOPS_DATABASE_TIMEOUT_SECS"],
        ),
        field(
            "billing.payment_term_days",
            config.billing.payment_term_days,
            &["FIELDOPS_BILLING_PAYMENT_TERM_DAYS"],
        ),
        field(
            "billing.quote_number_prefix",
            &config.billing.quote_number_prefix,
            &["FIELDOPS_BILLING_QUOTE_NUMBER_PREFIX"],
        ),
        field(
            "billing.invoice_number_prefix",
            &config.billing.invoice_number_prefix,
            &["FIELDOPS_BILLING_INVOICE_NUMBER_PREFIX"],
        ),
        field(
            "logging.level",
            &config.logging.level,
            &["FIELDOPS_LOGGING_LEVEL", "FIELDOPS_LOG_LEVEL"],
        ),
        field(
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["FIELDOPS_LOGGING_FORMAT", "FIELDOPS_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in fields {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    CommandResult::success("config", lines.join("\n"))
}

fn field(
    key: &'static str,
    value: impl ToString,
    env_keys: &'static [&'static str],
) -> Field {
    (key, value.to_string(), env_keys)
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("fieldops.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/fieldops.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
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
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
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
