//! Runtime configuration.
//!
//! Loaded once at startup from YAML (or taken from defaults), wrapped in an
//! `Arc`, and never mutated afterwards.
//!
//! ```yaml
//! provider:
//!   kind: gemini
//!   options:
//!     base_url: https://generativelanguage.googleapis.com/v1beta
//! refiner:
//!   model: gemini-1.5-flash
//!   timeout: 20s
//! search:
//!   timeout: 10s
//! fetch:
//!   proxy_base_url: https://r.jina.ai/
//!   max_evidence_chars: 100000
//! retry:
//!   delay: 500ms
//!   max_retries: 1
//! routes:
//!   - domain: quora.com
//!     strategy: proxy_reader
//!   - domain: youtube.com
//!     strategy: skip_to_next
//! ```
//!
//! Credentials may be written under `provider.options.api_key`,
//! `search.credentials.api_key` and `search.credentials.engine_id`; when
//! absent they are read from `GEMINI_API_KEY`, `GCSC_API_KEY` and
//! `GOOGLE_SEARCH_ENGINE_ID`.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use atlas_core::RouteTable;

use crate::providers::{CompletionConfig, ResponseFormat};
use crate::resilience::RetryPolicy;
use crate::secrets::RawCredentials;

/// Default Google Custom Search endpoint.
pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";

/// Default text-rendering proxy; the target URL is appended to it.
pub const DEFAULT_PROXY_BASE_URL: &str = "https://r.jina.ai/";

/// Default cap on evidence length, in chars.
pub const DEFAULT_MAX_EVIDENCE_CHARS: usize = 100_000;

/// Errors when loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid URL for {field}: {value}")]
    InvalidUrl { field: &'static str, value: String },

    #[error("Timeout for {0} must be non-zero")]
    ZeroTimeout(&'static str),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Model provider used by both refiner and comparator
    pub provider: ProviderSettings,

    /// Generation settings for query refinement
    pub refiner: ModelSettings,

    /// Generation settings for the comparator
    pub comparator: ModelSettings,

    pub search: SearchSettings,

    pub fetch: FetchSettings,

    /// Retry policy for refinement and search
    pub retry: RetryPolicy,

    /// Ordered domain routing table
    pub routes: RouteTable,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            provider: ProviderSettings::default(),
            refiner: ModelSettings {
                timeout: Duration::from_secs(20),
                ..ModelSettings::default()
            },
            comparator: ModelSettings::default(),
            search: SearchSettings::default(),
            fetch: FetchSettings::default(),
            retry: RetryPolicy::default(),
            routes: RouteTable::default(),
        }
    }
}

/// Which provider to create, and its JSON options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Registry key (e.g. "gemini")
    pub kind: String,

    /// Provider-specific options, including credentials
    pub options: RawCredentials,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: "gemini".to_string(),
            options: RawCredentials(serde_json::json!({})),
        }
    }
}

/// Generation settings for one model call type.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_output_tokens: u32,
    #[serde(with = "duration_str")]
    pub timeout: Duration,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".to_string(),
            temperature: 1.0,
            top_p: Some(0.95),
            top_k: Some(64),
            max_output_tokens: 8192,
            timeout: Duration::from_secs(60),
        }
    }
}

impl ModelSettings {
    fn completion(&self, response_format: ResponseFormat) -> CompletionConfig {
        CompletionConfig {
            model: self.model.clone(),
            max_tokens: self.max_output_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            response_format,
            timeout: self.timeout,
        }
    }
}

/// Search API settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub endpoint: String,
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    pub credentials: RawCredentials,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
            timeout: Duration::from_secs(10),
            credentials: RawCredentials(serde_json::json!({})),
        }
    }
}

/// Page fetch settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub proxy_base_url: String,
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    /// Overrides the browser User-Agent
    pub user_agent: Option<String>,
    pub accept_invalid_certs: bool,
    pub max_evidence_chars: usize,
    pub max_redirects: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            proxy_base_url: DEFAULT_PROXY_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            user_agent: None,
            accept_invalid_certs: false,
            max_evidence_chars: DEFAULT_MAX_EVIDENCE_CHARS,
            max_redirects: 5,
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Check URLs, timeouts and the retry budget. Routes are validated when
    /// they are parsed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.kind.trim().is_empty() {
            return Err(ConfigError::Invalid("provider.kind is empty".to_string()));
        }

        require_http("search.endpoint", &self.search.endpoint)?;
        require_http("fetch.proxy_base_url", &self.fetch.proxy_base_url)?;
        if let Some(base_url) = self.provider.options.as_json().get("base_url") {
            let value = base_url.as_str().unwrap_or_default();
            require_http("provider.options.base_url", value)?;
        }

        for (field, timeout) in [
            ("refiner", self.refiner.timeout),
            ("comparator", self.comparator.timeout),
            ("search", self.search.timeout),
            ("fetch", self.fetch.timeout),
        ] {
            if timeout.is_zero() {
                return Err(ConfigError::ZeroTimeout(field));
            }
        }

        if self.retry.max_retries > 1 {
            return Err(ConfigError::Invalid(format!(
                "retry.max_retries must be 0 or 1, got {}",
                self.retry.max_retries
            )));
        }

        if self.fetch.max_evidence_chars == 0 {
            return Err(ConfigError::Invalid(
                "fetch.max_evidence_chars must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Completion settings for the refiner (plain text output).
    pub fn refiner_completion(&self) -> CompletionConfig {
        self.refiner.completion(ResponseFormat::Text)
    }

    /// Completion settings for the comparator (JSON output).
    pub fn comparator_completion(&self) -> CompletionConfig {
        self.comparator.completion(ResponseFormat::Json)
    }
}

fn require_http(field: &'static str, value: &str) -> Result<(), ConfigError> {
    match url::Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => Ok(()),
        _ => Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
        }),
    }
}

/// Serde helper for human-readable durations such as `"30s"` or `"500ms"`.
pub(crate) mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::FetchStrategy;

    #[test]
    fn test_defaults_are_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.provider.kind, "gemini");
        assert_eq!(config.fetch.proxy_base_url, "https://r.jina.ai/");
        assert_eq!(config.fetch.max_evidence_chars, 100_000);
        assert!(!config.fetch.accept_invalid_certs);
        assert_eq!(config.retry.max_retries, 1);
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = RuntimeConfig::from_yaml("{}").unwrap();
        assert_eq!(config.search.endpoint, DEFAULT_SEARCH_ENDPOINT);
        assert_eq!(config.routes, RouteTable::default());
    }

    #[test]
    fn test_completion_formats() {
        let config = RuntimeConfig::default();
        assert_eq!(
            config.refiner_completion().response_format,
            ResponseFormat::Text
        );
        assert_eq!(
            config.comparator_completion().response_format,
            ResponseFormat::Json
        );
        assert_eq!(config.comparator_completion().top_k, Some(64));
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
provider:
  kind: gemini
  options:
    api_key: test-key
    base_url: http://localhost:9000/v1beta
refiner:
  model: gemini-1.5-pro
  temperature: 0.2
  timeout: 5s
search:
  endpoint: http://localhost:9001/search
  timeout: 2s
  credentials:
    api_key: search-key
    engine_id: cx-123
fetch:
  proxy_base_url: http://localhost:9002/
  timeout: 1m
  accept_invalid_certs: true
  max_evidence_chars: 5000
retry:
  delay: 100ms
  max_retries: 1
routes:
  - domain: stackoverflow.com
    strategy: proxy_reader
"#;
        let config = RuntimeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.refiner.model, "gemini-1.5-pro");
        assert_eq!(config.refiner.timeout, Duration::from_secs(5));
        // unspecified fields keep their defaults
        assert_eq!(config.refiner.max_output_tokens, 8192);
        assert_eq!(config.comparator.model, "gemini-1.5-flash");
        assert_eq!(config.fetch.timeout, Duration::from_secs(60));
        assert_eq!(config.retry.delay, Duration::from_millis(100));
        assert_eq!(
            config.routes.strategy_for_host("stackoverflow.com"),
            FetchStrategy::ProxyReader
        );
        assert_eq!(
            config.routes.strategy_for_host("youtube.com"),
            FetchStrategy::Direct
        );
        assert_eq!(
            config.search.credentials.as_json()["engine_id"],
            "cx-123"
        );
    }

    #[test]
    fn test_debug_hides_credentials() {
        let yaml = "search:\n  credentials:\n    api_key: hunter2\n";
        let config = RuntimeConfig::from_yaml(yaml).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_rejects_non_http_urls() {
        let result = RuntimeConfig::from_yaml("search:\n  endpoint: ftp://example.com/\n");
        assert!(matches!(
            result,
            Err(ConfigError::InvalidUrl {
                field: "search.endpoint",
                ..
            })
        ));

        let result = RuntimeConfig::from_yaml("provider:\n  options:\n    base_url: nonsense\n");
        assert!(matches!(result, Err(ConfigError::InvalidUrl { .. })));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let result = RuntimeConfig::from_yaml("fetch:\n  timeout: 0s\n");
        assert!(matches!(result, Err(ConfigError::ZeroTimeout("fetch"))));
    }

    #[test]
    fn test_rejects_duplicate_routes() {
        let yaml = r#"
routes:
  - domain: reddit.com
    strategy: proxy_reader
  - domain: reddit.com
    strategy: direct
"#;
        assert!(matches!(
            RuntimeConfig::from_yaml(yaml),
            Err(ConfigError::YamlError(_))
        ));
    }

    #[test]
    fn test_rejects_more_than_one_retry() {
        let result = RuntimeConfig::from_yaml("retry:\n  delay: 1ms\n  max_retries: 2\n");
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("max_retries")));

        let config = RuntimeConfig::from_yaml("retry:\n  max_retries: 0\n").unwrap();
        assert_eq!(config.retry.max_retries, 0);
    }

    #[test]
    fn test_builder_rejects_more_than_one_retry() {
        let mut config = RuntimeConfig::default();
        config.retry.max_retries = 4;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_bad_duration_string() {
        assert!(RuntimeConfig::from_yaml("search:\n  timeout: soon\n").is_err());
    }
}
