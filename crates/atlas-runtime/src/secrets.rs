//! Credential handling for the model and search collaborators.
//!
//! Every key the pipeline uses (model API key, search API key, search
//! engine ID) is held in an [`ApiCredential`]:
//!
//! - **No accidental logging**: `Debug`/`Display` print `[REDACTED]`
//! - **Zeroed on drop** via `secrecy`
//! - **Explicit exposure** at the point of use only
//!
//! ## Usage
//!
//! ```ignore
//! use atlas_runtime::secrets::{ApiCredential, CredentialBuilder};
//!
//! // Model key from config, falling back to GEMINI_API_KEY
//! let key = ApiCredential::from_config_or_env(&config, "api_key", "GEMINI_API_KEY", "Gemini API key")?;
//!
//! // Search needs two values
//! let creds = CredentialBuilder::new()
//!     .require("api_key", "GCSC_API_KEY", "Custom Search API key")
//!     .require("engine_id", "GOOGLE_SEARCH_ENGINE_ID", "Search engine ID")
//!     .build(&config)?;
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Errors when loading credentials.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("{name} required: set '{config_key}' in config or {env_var} environment variable")]
    Missing {
        name: &'static str,
        config_key: String,
        env_var: String,
    },

    #[error("Credential '{0}' not found")]
    NotLoaded(String),
}

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Loaded from the configuration file
    Config,
    /// Loaded from an environment variable
    Environment,
    /// Provided programmatically
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "config"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// A securely-stored API credential.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    /// Wrap a value. It cannot be logged after this point.
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// Load from an environment variable.
    pub fn from_env(env_var: &str, name: &'static str) -> Result<Self, CredentialError> {
        std::env::var(env_var)
            .map(|v| Self::new(v, CredentialSource::Environment, name))
            .map_err(|_| CredentialError::Missing {
                name,
                config_key: String::new(),
                env_var: env_var.to_string(),
            })
    }

    /// Load from the JSON credentials section, falling back to the environment.
    ///
    /// Empty strings in the config count as absent.
    pub fn from_config_or_env(
        config: &JsonValue,
        config_key: &str,
        env_var: &str,
        name: &'static str,
    ) -> Result<Self, CredentialError> {
        if let Some(value) = config[config_key].as_str().filter(|v| !v.is_empty()) {
            return Ok(Self::new(value, CredentialSource::Config, name));
        }

        if let Ok(value) = std::env::var(env_var) {
            return Ok(Self::new(value, CredentialSource::Environment, name));
        }

        Err(CredentialError::Missing {
            name,
            config_key: config_key.to_string(),
            env_var: env_var.to_string(),
        })
    }

    /// Whether a credential could be loaded, without loading it.
    pub fn is_available(config: &JsonValue, config_key: &str, env_var: &str) -> bool {
        config[config_key].as_str().is_some_and(|v| !v.is_empty())
            || std::env::var(env_var).is_ok()
    }

    /// Expose the value. Call only where the value is sent (header, query string).
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}

/// Raw credentials section of the configuration file.
///
/// Kept as JSON so each collaborator picks its own keys. `Debug` prints only
/// the key names.
#[derive(Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct RawCredentials(pub JsonValue);

impl RawCredentials {
    pub fn as_json(&self) -> &JsonValue {
        &self.0
    }
}

impl fmt::Debug for RawCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&String> = self
            .0
            .as_object()
            .map(|o| o.keys().collect())
            .unwrap_or_default();
        f.debug_struct("RawCredentials").field("keys", &keys).finish()
    }
}

/// Builder for collaborators that need several credentials at once.
pub struct CredentialBuilder {
    required: Vec<CredentialSpec>,
}

struct CredentialSpec {
    config_key: &'static str,
    env_var: &'static str,
    name: &'static str,
}

impl CredentialBuilder {
    pub fn new() -> Self {
        Self {
            required: Vec::new(),
        }
    }

    /// Add a credential that must be present.
    pub fn require(
        mut self,
        config_key: &'static str,
        env_var: &'static str,
        name: &'static str,
    ) -> Self {
        self.required.push(CredentialSpec {
            config_key,
            env_var,
            name,
        });
        self
    }

    /// Load every declared credential from `config`, falling back to the environment.
    pub fn build(self, config: &JsonValue) -> Result<CredentialSet, CredentialError> {
        let mut credentials = BTreeMap::new();

        for spec in self.required {
            let cred =
                ApiCredential::from_config_or_env(config, spec.config_key, spec.env_var, spec.name)?;
            credentials.insert(spec.config_key, cred);
        }

        Ok(CredentialSet { credentials })
    }
}

impl Default for CredentialBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A set of loaded credentials.
pub struct CredentialSet {
    credentials: BTreeMap<&'static str, ApiCredential>,
}

impl CredentialSet {
    /// Take a required credential out of the set.
    pub fn take(&mut self, key: &str) -> Result<ApiCredential, CredentialError> {
        self.credentials
            .remove(key)
            .ok_or_else(|| CredentialError::NotLoaded(key.to_string()))
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("keys", &self.credentials.keys().collect::<Vec<_>>())
            .finish()
    }
}
