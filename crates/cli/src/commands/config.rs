use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use propdraft_core::config::AppConfig;
use secrecy::ExposeSecret;
use toml::Value;

use crate::commands::{load_config, CommandResult};

/// One rendered config entry: dotted key, env override key and display value.
struct Entry {
    key: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

impl Entry {
    fn new(key: &'static str, env_keys: &'static [&'static str], value: impl Into<String>) -> Self {
        Self { key, env_keys, value: value.into() }
    }
}

pub fn run() -> CommandResult {
    let config = match load_config() {
        Ok(config) => config,
        Err(failure) => return CommandResult::from_failure("config", failure),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for entry in entries(&config) {
        let source = field_source(
            entry.key,
            entry.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(entry.key, &entry.value, source));
    }

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    let primary = &config.providers.document_intelligence;
    let ocr = &config.providers.generic_ocr;

    vec![
        Entry::new("database.url", &["PROPDRAFT_DATABASE_URL"], config.database.url.clone()),
        Entry::new(
            "database.max_connections",
            &["PROPDRAFT_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections.to_string(),
        ),
        Entry::new(
            "database.timeout_secs",
            &["PROPDRAFT_DATABASE_TIMEOUT_SECS"],
            config.database.timeout_secs.to_string(),
        ),
        Entry::new(
            "providers.max_attempts",
            &["PROPDRAFT_PROVIDER_MAX_ATTEMPTS"],
            config.providers.max_attempts.to_string(),
        ),
        Entry::new(
            "providers.request_timeout_secs",
            &["PROPDRAFT_PROVIDER_REQUEST_TIMEOUT_SECS"],
            config.providers.request_timeout_secs.to_string(),
        ),
        Entry::new(
            "providers.document_intelligence.base_url",
            &["PROPDRAFT_PROVIDER_BASE_URL"],
            primary.base_url.clone(),
        ),
        Entry::new(
            "providers.document_intelligence.auth_url",
            &["PROPDRAFT_PROVIDER_AUTH_URL"],
            primary.auth_url.clone(),
        ),
        Entry::new(
            "providers.document_intelligence.client_id",
            &["PROPDRAFT_PROVIDER_CLIENT_ID"],
            primary.client_id.clone(),
        ),
        Entry::new(
            "providers.document_intelligence.client_secret",
            &["PROPDRAFT_PROVIDER_CLIENT_SECRET"],
            redact_secret(primary.client_secret.expose_secret()),
        ),
        Entry::new(
            "providers.document_intelligence.org_id",
            &["PROPDRAFT_PROVIDER_ORG_ID"],
            primary.org_id.as_deref().unwrap_or("<unset>"),
        ),
        Entry::new(
            "providers.generic_ocr.enabled",
            &["PROPDRAFT_OCR_ENABLED"],
            ocr.enabled.to_string(),
        ),
        Entry::new(
            "providers.generic_ocr.base_url",
            &["PROPDRAFT_OCR_BASE_URL"],
            ocr.base_url.clone(),
        ),
        Entry::new(
            "providers.generic_ocr.client_secret",
            &["PROPDRAFT_OCR_CLIENT_SECRET"],
            ocr.client_secret
                .as_ref()
                .map(|secret| redact_secret(secret.expose_secret()))
                .unwrap_or_else(|| "<shared>".to_string()),
        ),
        Entry::new(
            "token.safety_margin_secs",
            &["PROPDRAFT_TOKEN_SAFETY_MARGIN_SECS"],
            config.token.safety_margin_secs.to_string(),
        ),
        Entry::new(
            "token.renewal_window_secs",
            &["PROPDRAFT_TOKEN_RENEWAL_WINDOW_SECS"],
            config.token.renewal_window_secs.to_string(),
        ),
        Entry::new(
            "token.retention_hours",
            &["PROPDRAFT_TOKEN_RETENTION_HOURS"],
            config.token.retention_hours.to_string(),
        ),
        Entry::new(
            "extraction.max_file_bytes",
            &["PROPDRAFT_EXTRACTION_MAX_FILE_BYTES"],
            config.extraction.max_file_bytes.to_string(),
        ),
        Entry::new(
            "extraction.hard_timeout_secs",
            &["PROPDRAFT_EXTRACTION_HARD_TIMEOUT_SECS"],
            config.extraction.hard_timeout_secs.to_string(),
        ),
        Entry::new(
            "extraction.confidence_threshold",
            &["PROPDRAFT_EXTRACTION_CONFIDENCE_THRESHOLD"],
            config.extraction.confidence_threshold.to_string(),
        ),
        Entry::new(
            "proposal.number_prefix",
            &["PROPDRAFT_PROPOSAL_NUMBER_PREFIX"],
            config.proposal.number_prefix.clone(),
        ),
        Entry::new(
            "proposal.validity_days",
            &["PROPDRAFT_PROPOSAL_VALIDITY_DAYS"],
            config.proposal.validity_days.to_string(),
        ),
        Entry::new(
            "server.bind_address",
            &["PROPDRAFT_SERVER_BIND_ADDRESS"],
            config.server.bind_address.clone(),
        ),
        Entry::new("server.port", &["PROPDRAFT_SERVER_PORT"], config.server.port.to_string()),
        Entry::new(
            "logging.level",
            &["PROPDRAFT_LOGGING_LEVEL", "PROPDRAFT_LOG_LEVEL"],
            config.logging.level.clone(),
        ),
        Entry::new(
            "logging.format",
            &["PROPDRAFT_LOGGING_FORMAT", "PROPDRAFT_LOG_FORMAT"],
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("propdraft.toml"), PathBuf::from("config/propdraft.toml")]
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

/// Keeps at most a four character hint of a secret.
fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    if trimmed.chars().count() <= 8 {
        return "<redacted>".to_string();
    }

    let hint: String = trimmed.chars().take(4).collect();
    format!("{hint}***")
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, redact_secret};

    #[test]
    fn redaction_never_reveals_short_secrets() {
        assert_eq!(redact_secret(""), "<empty>");
        assert_eq!(redact_secret("abc123"), "<redacted>");
        assert_eq!(redact_secret("super-secret-value"), "supe***");
    }

    #[test]
    fn nested_file_keys_are_detected() {
        let doc: Value = "[providers.document_intelligence]\nclient_id = \"x\"\n"
            .parse()
            .expect("toml");
        assert!(contains_path(&doc, "providers.document_intelligence.client_id"));
        assert!(!contains_path(&doc, "providers.generic_ocr.enabled"));
    }
}
