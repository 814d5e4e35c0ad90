use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::parser::lexicon::{DEFAULT_BOILERPLATE_KEYWORDS, DEFAULT_EXCLUDED_PHRASES};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub providers: ProvidersConfig,
    pub token: TokenConfig,
    pub extraction: ExtractionConfig,
    pub heuristics: HeuristicsConfig,
    pub proposal: ProposalConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ProvidersConfig {
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub document_intelligence: DocumentIntelligenceConfig,
    pub generic_ocr: GenericOcrConfig,
}

#[derive(Clone, Debug)]
pub struct DocumentIntelligenceConfig {
    pub base_url: String,
    pub auth_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub org_id: Option<String>,
    pub scope: Option<String>,
}

/// Secondary provider. Falls back to the document-intelligence credentials when
/// no dedicated client id/secret is configured.
#[derive(Clone, Debug)]
pub struct GenericOcrConfig {
    pub enabled: bool,
    pub base_url: String,
    pub auth_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub language: String,
}

#[derive(Clone, Debug)]
pub struct TokenConfig {
    pub safety_margin_secs: i64,
    pub renewal_window_secs: i64,
    pub renewal_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub retention_hours: i64,
}

#[derive(Clone, Debug)]
pub struct ExtractionConfig {
    pub max_file_bytes: u64,
    pub hard_timeout_secs: u64,
    pub stuck_threshold_secs: u64,
    pub watchdog_interval_secs: u64,
    pub confidence_threshold: f32,
}

#[derive(Clone, Debug)]
pub struct HeuristicsConfig {
    pub boilerplate_keywords: Vec<String>,
    pub excluded_phrases: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct ProposalConfig {
    pub number_prefix: String,
    pub validity_days: i64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
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
    pub provider_base_url: Option<String>,
    pub provider_auth_url: Option<String>,
    pub provider_client_id: Option<String>,
    pub provider_client_secret: Option<String>,
    pub generic_ocr_enabled: Option<bool>,
    pub max_file_bytes: Option<u64>,
    pub hard_timeout_secs: Option<u64>,
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
                url: "sqlite://propdraft.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            providers: ProvidersConfig {
                max_attempts: 3,
                retry_base_delay_ms: 500,
                request_timeout_secs: 30,
                document_intelligence: DocumentIntelligenceConfig {
                    base_url: "https://docintel.example.com/v1".to_string(),
                    auth_url: "https://docintel.example.com/token".to_string(),
                    client_id: String::new(),
                    client_secret: String::new().into(),
                    org_id: None,
                    scope: None,
                },
                generic_ocr: GenericOcrConfig {
                    enabled: true,
                    base_url: "https://ocr.example.com".to_string(),
                    auth_url: "https://ocr.example.com/token".to_string(),
                    client_id: None,
                    client_secret: None,
                    language: "por".to_string(),
                },
            },
            token: TokenConfig {
                safety_margin_secs: 300,
                renewal_window_secs: 3600,
                renewal_interval_secs: 600,
                cleanup_interval_secs: 86_400,
                retention_hours: 24,
            },
            extraction: ExtractionConfig {
                max_file_bytes: 5 * 1024 * 1024,
                hard_timeout_secs: 60,
                stuck_threshold_secs: 45,
                watchdog_interval_secs: 5,
                confidence_threshold: 0.6,
            },
            heuristics: HeuristicsConfig {
                boilerplate_keywords: to_owned_list(DEFAULT_BOILERPLATE_KEYWORDS),
                excluded_phrases: to_owned_list(DEFAULT_EXCLUDED_PHRASES),
            },
            proposal: ProposalConfig { number_prefix: "PROP".to_string(), validity_days: 30 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn to_owned_list(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_string()).collect()
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

impl GenericOcrConfig {
    /// Client id and secret for the OCR token endpoint, shared with the primary
    /// provider when no dedicated pair is set.
    pub fn credentials<'a>(
        &'a self,
        shared: &'a DocumentIntelligenceConfig,
    ) -> (&'a str, &'a SecretString) {
        match (&self.client_id, &self.client_secret) {
            (Some(client_id), Some(client_secret)) if !client_id.trim().is_empty() => {
                (client_id.as_str(), client_secret)
            }
            _ => (shared.client_id.as_str(), &shared.client_secret),
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("propdraft.toml"));
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

        if let Some(providers) = patch.providers {
            if let Some(max_attempts) = providers.max_attempts {
                self.providers.max_attempts = max_attempts;
            }
            if let Some(retry_base_delay_ms) = providers.retry_base_delay_ms {
                self.providers.retry_base_delay_ms = retry_base_delay_ms;
            }
            if let Some(request_timeout_secs) = providers.request_timeout_secs {
                self.providers.request_timeout_secs = request_timeout_secs;
            }
            if let Some(primary) = providers.document_intelligence {
                let target = &mut self.providers.document_intelligence;
                if let Some(base_url) = primary.base_url {
                    target.base_url = base_url;
                }
                if let Some(auth_url) = primary.auth_url {
                    target.auth_url = auth_url;
                }
                if let Some(client_id) = primary.client_id {
                    target.client_id = client_id;
                }
                if let Some(client_secret_value) = primary.client_secret {
                    target.client_secret = secret_value(client_secret_value);
                }
                if let Some(org_id) = primary.org_id {
                    target.org_id = Some(org_id);
                }
                if let Some(scope) = primary.scope {
                    target.scope = Some(scope);
                }
            }
            if let Some(ocr) = providers.generic_ocr {
                let target = &mut self.providers.generic_ocr;
                if let Some(enabled) = ocr.enabled {
                    target.enabled = enabled;
                }
                if let Some(base_url) = ocr.base_url {
                    target.base_url = base_url;
                }
                if let Some(auth_url) = ocr.auth_url {
                    target.auth_url = auth_url;
                }
                if let Some(client_id) = ocr.client_id {
                    target.client_id = Some(client_id);
                }
                if let Some(client_secret_value) = ocr.client_secret {
                    target.client_secret = Some(secret_value(client_secret_value));
                }
                if let Some(language) = ocr.language {
                    target.language = language;
                }
            }
        }

        if let Some(token) = patch.token {
            if let Some(safety_margin_secs) = token.safety_margin_secs {
                self.token.safety_margin_secs = safety_margin_secs;
            }
            if let Some(renewal_window_secs) = token.renewal_window_secs {
                self.token.renewal_window_secs = renewal_window_secs;
            }
            if let Some(renewal_interval_secs) = token.renewal_interval_secs {
                self.token.renewal_interval_secs = renewal_interval_secs;
            }
            if let Some(cleanup_interval_secs) = token.cleanup_interval_secs {
                self.token.cleanup_interval_secs = cleanup_interval_secs;
            }
            if let Some(retention_hours) = token.retention_hours {
                self.token.retention_hours = retention_hours;
            }
        }

        if let Some(extraction) = patch.extraction {
            if let Some(max_file_bytes) = extraction.max_file_bytes {
                self.extraction.max_file_bytes = max_file_bytes;
            }
            if let Some(hard_timeout_secs) = extraction.hard_timeout_secs {
                self.extraction.hard_timeout_secs = hard_timeout_secs;
            }
            if let Some(stuck_threshold_secs) = extraction.stuck_threshold_secs {
                self.extraction.stuck_threshold_secs = stuck_threshold_secs;
            }
            if let Some(watchdog_interval_secs) = extraction.watchdog_interval_secs {
                self.extraction.watchdog_interval_secs = watchdog_interval_secs;
            }
            if let Some(confidence_threshold) = extraction.confidence_threshold {
                self.extraction.confidence_threshold = confidence_threshold;
            }
        }

        if let Some(heuristics) = patch.heuristics {
            if let Some(boilerplate_keywords) = heuristics.boilerplate_keywords {
                self.heuristics.boilerplate_keywords = boilerplate_keywords;
            }
            if let Some(excluded_phrases) = heuristics.excluded_phrases {
                self.heuristics.excluded_phrases = excluded_phrases;
            }
        }

        if let Some(proposal) = patch.proposal {
            if let Some(number_prefix) = proposal.number_prefix {
                self.proposal.number_prefix = number_prefix;
            }
            if let Some(validity_days) = proposal.validity_days {
                self.proposal.validity_days = validity_days;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
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
        if let Some(value) = read_env("PROPDRAFT_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PROPDRAFT_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("PROPDRAFT_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PROPDRAFT_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("PROPDRAFT_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PROPDRAFT_PROVIDER_MAX_ATTEMPTS") {
            self.providers.max_attempts = parse_u32("PROPDRAFT_PROVIDER_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("PROPDRAFT_PROVIDER_RETRY_BASE_DELAY_MS") {
            self.providers.retry_base_delay_ms =
                parse_u64("PROPDRAFT_PROVIDER_RETRY_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("PROPDRAFT_PROVIDER_REQUEST_TIMEOUT_SECS") {
            self.providers.request_timeout_secs =
                parse_u64("PROPDRAFT_PROVIDER_REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PROPDRAFT_PROVIDER_BASE_URL") {
            self.providers.document_intelligence.base_url = value;
        }
        if let Some(value) = read_env("PROPDRAFT_PROVIDER_AUTH_URL") {
            self.providers.document_intelligence.auth_url = value;
        }
        if let Some(value) = read_env("PROPDRAFT_PROVIDER_CLIENT_ID") {
            self.providers.document_intelligence.client_id = value;
        }
        if let Some(value) = read_env("PROPDRAFT_PROVIDER_CLIENT_SECRET") {
            self.providers.document_intelligence.client_secret = secret_value(value);
        }
        if let Some(value) = read_env("PROPDRAFT_PROVIDER_ORG_ID") {
            self.providers.document_intelligence.org_id = Some(value);
        }

        if let Some(value) = read_env("PROPDRAFT_OCR_ENABLED") {
            self.providers.generic_ocr.enabled = parse_bool("PROPDRAFT_OCR_ENABLED", &value)?;
        }
        if let Some(value) = read_env("PROPDRAFT_OCR_BASE_URL") {
            self.providers.generic_ocr.base_url = value;
        }
        if let Some(value) = read_env("PROPDRAFT_OCR_AUTH_URL") {
            self.providers.generic_ocr.auth_url = value;
        }
        if let Some(value) = read_env("PROPDRAFT_OCR_CLIENT_ID") {
            self.providers.generic_ocr.client_id = Some(value);
        }
        if let Some(value) = read_env("PROPDRAFT_OCR_CLIENT_SECRET") {
            self.providers.generic_ocr.client_secret = Some(secret_value(value));
        }

        if let Some(value) = read_env("PROPDRAFT_TOKEN_SAFETY_MARGIN_SECS") {
            self.token.safety_margin_secs =
                parse_i64("PROPDRAFT_TOKEN_SAFETY_MARGIN_SECS", &value)?;
        }
        if let Some(value) = read_env("PROPDRAFT_TOKEN_RENEWAL_WINDOW_SECS") {
            self.token.renewal_window_secs =
                parse_i64("PROPDRAFT_TOKEN_RENEWAL_WINDOW_SECS", &value)?;
        }
        if let Some(value) = read_env("PROPDRAFT_TOKEN_RETENTION_HOURS") {
            self.token.retention_hours = parse_i64("PROPDRAFT_TOKEN_RETENTION_HOURS", &value)?;
        }

        if let Some(value) = read_env("PROPDRAFT_EXTRACTION_MAX_FILE_BYTES") {
            self.extraction.max_file_bytes =
                parse_u64("PROPDRAFT_EXTRACTION_MAX_FILE_BYTES", &value)?;
        }
        if let Some(value) = read_env("PROPDRAFT_EXTRACTION_HARD_TIMEOUT_SECS") {
            self.extraction.hard_timeout_secs =
                parse_u64("PROPDRAFT_EXTRACTION_HARD_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PROPDRAFT_EXTRACTION_STUCK_THRESHOLD_SECS") {
            self.extraction.stuck_threshold_secs =
                parse_u64("PROPDRAFT_EXTRACTION_STUCK_THRESHOLD_SECS", &value)?;
        }
        if let Some(value) = read_env("PROPDRAFT_EXTRACTION_CONFIDENCE_THRESHOLD") {
            self.extraction.confidence_threshold =
                parse_f32("PROPDRAFT_EXTRACTION_CONFIDENCE_THRESHOLD", &value)?;
        }

        if let Some(value) = read_env("PROPDRAFT_HEURISTICS_BOILERPLATE_KEYWORDS") {
            self.heuristics.boilerplate_keywords = parse_list(&value);
        }
        if let Some(value) = read_env("PROPDRAFT_HEURISTICS_EXCLUDED_PHRASES") {
            self.heuristics.excluded_phrases = parse_list(&value);
        }

        if let Some(value) = read_env("PROPDRAFT_PROPOSAL_NUMBER_PREFIX") {
            self.proposal.number_prefix = value;
        }
        if let Some(value) = read_env("PROPDRAFT_PROPOSAL_VALIDITY_DAYS") {
            self.proposal.validity_days = parse_i64("PROPDRAFT_PROPOSAL_VALIDITY_DAYS", &value)?;
        }

        if let Some(value) = read_env("PROPDRAFT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("PROPDRAFT_SERVER_PORT") {
            self.server.port = parse_u16("PROPDRAFT_SERVER_PORT", &value)?;
        }

        let log_level =
            read_env("PROPDRAFT_LOGGING_LEVEL").or_else(|| read_env("PROPDRAFT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PROPDRAFT_LOGGING_FORMAT").or_else(|| read_env("PROPDRAFT_LOG_FORMAT"));
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
        if let Some(base_url) = overrides.provider_base_url {
            self.providers.document_intelligence.base_url = base_url;
        }
        if let Some(auth_url) = overrides.provider_auth_url {
            self.providers.document_intelligence.auth_url = auth_url;
        }
        if let Some(client_id) = overrides.provider_client_id {
            self.providers.document_intelligence.client_id = client_id;
        }
        if let Some(client_secret) = overrides.provider_client_secret {
            self.providers.document_intelligence.client_secret = secret_value(client_secret);
        }
        if let Some(enabled) = overrides.generic_ocr_enabled {
            self.providers.generic_ocr.enabled = enabled;
        }
        if let Some(max_file_bytes) = overrides.max_file_bytes {
            self.extraction.max_file_bytes = max_file_bytes;
        }
        if let Some(hard_timeout_secs) = overrides.hard_timeout_secs {
            self.extraction.hard_timeout_secs = hard_timeout_secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_providers(&self.providers)?;
        validate_token(&self.token)?;
        validate_extraction(&self.extraction)?;
        validate_heuristics(&self.heuristics)?;
        validate_proposal(&self.proposal)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("propdraft.toml"), PathBuf::from("config/propdraft.toml")]
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

fn validate_providers(providers: &ProvidersConfig) -> Result<(), ConfigError> {
    if providers.max_attempts == 0 || providers.max_attempts > 10 {
        return Err(ConfigError::Validation(
            "providers.max_attempts must be in range 1..=10".to_string(),
        ));
    }
    if providers.request_timeout_secs == 0 || providers.request_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "providers.request_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    let primary = &providers.document_intelligence;
    if primary.client_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "providers.document_intelligence.client_id is required (env PROPDRAFT_PROVIDER_CLIENT_ID)"
                .to_string(),
        ));
    }
    if primary.client_secret.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "providers.document_intelligence.client_secret is required (env PROPDRAFT_PROVIDER_CLIENT_SECRET)"
                .to_string(),
        ));
    }
    validate_http_url("providers.document_intelligence.base_url", &primary.base_url)?;
    validate_http_url("providers.document_intelligence.auth_url", &primary.auth_url)?;

    let ocr = &providers.generic_ocr;
    if ocr.enabled {
        validate_http_url("providers.generic_ocr.base_url", &ocr.base_url)?;
        validate_http_url("providers.generic_ocr.auth_url", &ocr.auth_url)?;
        if ocr.client_id.is_some() != ocr.client_secret.is_some() {
            return Err(ConfigError::Validation(
                "providers.generic_ocr.client_id and client_secret must be set together"
                    .to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        return Ok(());
    }
    Err(ConfigError::Validation(format!("{key} must start with http:// or https://")))
}

fn validate_token(token: &TokenConfig) -> Result<(), ConfigError> {
    if token.safety_margin_secs <= 0 {
        return Err(ConfigError::Validation(
            "token.safety_margin_secs must be greater than zero".to_string(),
        ));
    }
    if token.renewal_window_secs <= token.safety_margin_secs {
        return Err(ConfigError::Validation(
            "token.renewal_window_secs must be greater than token.safety_margin_secs".to_string(),
        ));
    }
    if token.renewal_interval_secs == 0 || token.cleanup_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "token.renewal_interval_secs and token.cleanup_interval_secs must be greater than zero"
                .to_string(),
        ));
    }
    if token.retention_hours < 0 {
        return Err(ConfigError::Validation(
            "token.retention_hours must not be negative".to_string(),
        ));
    }
    Ok(())
}

fn validate_extraction(extraction: &ExtractionConfig) -> Result<(), ConfigError> {
    if extraction.max_file_bytes == 0 || extraction.max_file_bytes > 50 * 1024 * 1024 {
        return Err(ConfigError::Validation(
            "extraction.max_file_bytes must be in range 1..=52428800".to_string(),
        ));
    }
    if extraction.hard_timeout_secs == 0 || extraction.hard_timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "extraction.hard_timeout_secs must be in range 1..=600".to_string(),
        ));
    }
    if extraction.stuck_threshold_secs == 0
        || extraction.stuck_threshold_secs >= extraction.hard_timeout_secs
    {
        return Err(ConfigError::Validation(
            "extraction.stuck_threshold_secs must be greater than zero and shorter than extraction.hard_timeout_secs"
                .to_string(),
        ));
    }
    if extraction.watchdog_interval_secs == 0
        || extraction.watchdog_interval_secs > extraction.stuck_threshold_secs
    {
        return Err(ConfigError::Validation(
            "extraction.watchdog_interval_secs must be in range 1..=stuck_threshold_secs"
                .to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&extraction.confidence_threshold) {
        return Err(ConfigError::Validation(
            "extraction.confidence_threshold must be in range 0.0..=1.0".to_string(),
        ));
    }
    Ok(())
}

fn validate_heuristics(heuristics: &HeuristicsConfig) -> Result<(), ConfigError> {
    if heuristics.boilerplate_keywords.iter().any(|keyword| keyword.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "heuristics.boilerplate_keywords must not contain blank entries".to_string(),
        ));
    }
    if heuristics.excluded_phrases.iter().any(|phrase| phrase.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "heuristics.excluded_phrases must not contain blank entries".to_string(),
        ));
    }
    Ok(())
}

fn validate_proposal(proposal: &ProposalConfig) -> Result<(), ConfigError> {
    let prefix = proposal.number_prefix.trim();
    if prefix.is_empty() || !prefix.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return Err(ConfigError::Validation(
            "proposal.number_prefix must be a non-empty alphanumeric string".to_string(),
        ));
    }
    if proposal.validity_days <= 0 || proposal.validity_days > 365 {
        return Err(ConfigError::Validation(
            "proposal.validity_days must be in range 1..=365".to_string(),
        ));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
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

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid(key, value))
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| invalid(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| invalid(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    providers: Option<ProvidersPatch>,
    token: Option<TokenPatch>,
    extraction: Option<ExtractionPatch>,
    heuristics: Option<HeuristicsPatch>,
    proposal: Option<ProposalPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ProvidersPatch {
    max_attempts: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    request_timeout_secs: Option<u64>,
    document_intelligence: Option<DocumentIntelligencePatch>,
    generic_ocr: Option<GenericOcrPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DocumentIntelligencePatch {
    base_url: Option<String>,
    auth_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    org_id: Option<String>,
    scope: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GenericOcrPatch {
    enabled: Option<bool>,
    base_url: Option<String>,
    auth_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    language: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenPatch {
    safety_margin_secs: Option<i64>,
    renewal_window_secs: Option<i64>,
    renewal_interval_secs: Option<u64>,
    cleanup_interval_secs: Option<u64>,
    retention_hours: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct ExtractionPatch {
    max_file_bytes: Option<u64>,
    hard_timeout_secs: Option<u64>,
    stuck_threshold_secs: Option<u64>,
    watchdog_interval_secs: Option<u64>,
    confidence_threshold: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct HeuristicsPatch {
    boilerplate_keywords: Option<Vec<String>>,
    excluded_phrases: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct ProposalPatch {
    number_prefix: Option<String>,
    validity_days: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
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

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const CREDENTIAL_VARS: [&str; 2] =
        ["PROPDRAFT_PROVIDER_CLIENT_ID", "PROPDRAFT_PROVIDER_CLIENT_SECRET"];

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn set_credentials() {
        env::set_var("PROPDRAFT_PROVIDER_CLIENT_ID", "client-test");
        env::set_var("PROPDRAFT_PROVIDER_CLIENT_SECRET", "secret-test");
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_DOCINTEL_CLIENT_ID", "client-from-env");
        env::set_var("TEST_DOCINTEL_CLIENT_SECRET", "secret-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("propdraft.toml");
            fs::write(
                &path,
                r#"
[providers.document_intelligence]
client_id = "${TEST_DOCINTEL_CLIENT_ID}"
client_secret = "${TEST_DOCINTEL_CLIENT_SECRET}"
org_id = "org-7"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            let primary = &config.providers.document_intelligence;
            ensure(primary.client_id == "client-from-env", "client id should be interpolated")?;
            ensure(
                primary.client_secret.expose_secret() == "secret-from-env",
                "client secret should be interpolated",
            )?;
            ensure(primary.org_id.as_deref() == Some("org-7"), "org id should come from file")?;
            Ok(())
        })();

        clear_vars(&["TEST_DOCINTEL_CLIENT_ID", "TEST_DOCINTEL_CLIENT_SECRET"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_credentials();
        env::set_var("PROPDRAFT_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("PROPDRAFT_EXTRACTION_MAX_FILE_BYTES", "2048");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("propdraft.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[extraction]
max_file_bytes = 1024
hard_timeout_secs = 30
stuck_threshold_secs = 20

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
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.extraction.max_file_bytes == 2048, "env file limit should beat file")?;
            ensure(config.extraction.hard_timeout_secs == 30, "file timeout should beat default")?;
            Ok(())
        })();

        clear_vars(&CREDENTIAL_VARS);
        clear_vars(&["PROPDRAFT_DATABASE_URL", "PROPDRAFT_EXTRACTION_MAX_FILE_BYTES"]);
        result
    }

    #[test]
    fn validation_fails_fast_without_provider_credentials() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&CREDENTIAL_VARS);

        let error = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => {
                return Err("expected validation failure but config load succeeded".to_string())
            }
            Err(error) => error,
        };
        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("client_id")
        );
        ensure(has_message, "validation failure should mention client_id")
    }

    #[test]
    fn stuck_threshold_must_be_shorter_than_hard_timeout() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_credentials();
        env::set_var("PROPDRAFT_EXTRACTION_STUCK_THRESHOLD_SECS", "90");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected stuck threshold validation failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(error, ConfigError::Validation(ref message) if message.contains("stuck_threshold_secs")),
                "validation failure should mention stuck_threshold_secs",
            )
        })();

        clear_vars(&CREDENTIAL_VARS);
        clear_vars(&["PROPDRAFT_EXTRACTION_STUCK_THRESHOLD_SECS"]);
        result
    }

    #[test]
    fn heuristic_lists_can_be_overridden_from_env() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_credentials();
        env::set_var("PROPDRAFT_HEURISTICS_EXCLUDED_PHRASES", "COTACAO, PEDIDO INTERNO ,");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            ensure(
                config.heuristics.excluded_phrases
                    == vec!["COTACAO".to_string(), "PEDIDO INTERNO".to_string()],
                "excluded phrases should be parsed from a comma list",
            )?;
            ensure(
                !config.heuristics.boilerplate_keywords.is_empty(),
                "boilerplate keywords should keep defaults",
            )
        })();

        clear_vars(&CREDENTIAL_VARS);
        clear_vars(&["PROPDRAFT_HEURISTICS_EXCLUDED_PHRASES"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PROPDRAFT_PROVIDER_CLIENT_ID", "client-test");
        env::set_var("PROPDRAFT_PROVIDER_CLIENT_SECRET", "super-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("super-secret-value"),
                "debug output should not contain the client secret",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&CREDENTIAL_VARS);
        result
    }
}
