//! SearchClient: ranked web results for a query.
//!
//! The backend sits behind [`SearchProvider`]; the default is the Google
//! Custom Search JSON API. An empty result list is a valid answer and is
//! never reported as an error.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use atlas_core::SearchResult;

use crate::config::SearchSettings;
use crate::resilience::{RetryPolicy, Transient};
use crate::secrets::{ApiCredential, CredentialBuilder, CredentialError};

/// Environment variable for the search API key.
pub const SEARCH_API_KEY_ENV: &str = "GCSC_API_KEY";

/// Environment variable for the search engine ID.
pub const SEARCH_ENGINE_ID_ENV: &str = "GOOGLE_SEARCH_ENGINE_ID";

/// Errors from the search API. Any of these surfacing from
/// [`SearchClient::search`] means search is unavailable.
#[derive(Error, Debug, Clone)]
pub enum SearchError {
    #[error("Search request failed: {0}")]
    Transport(String),

    #[error("Search timed out after {0:?}")]
    Timeout(Duration),

    #[error("Search API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Malformed search response: {0}")]
    Malformed(String),

    #[error("Search not configured: {0}")]
    NotConfigured(#[from] CredentialError),
}

impl Transient for SearchError {
    fn is_transient(&self) -> bool {
        match self {
            SearchError::Transport(_) | SearchError::Timeout(_) => true,
            SearchError::Api { status, .. } => *status == 429 || *status >= 500,
            SearchError::Malformed(_) | SearchError::NotConfigured(_) => false,
        }
    }
}

/// Search backend abstraction.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// One request to the backend, results in provider order from rank 1.
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError>;

    fn name(&self) -> &str;
}

/// Google Custom Search JSON API backend.
pub struct GoogleSearchProvider {
    endpoint: String,
    api_key: ApiCredential,
    engine_id: ApiCredential,
    timeout: Duration,
    client: reqwest::Client,
}

impl std::fmt::Debug for GoogleSearchProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleSearchProvider")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key)
            .field("engine_id", &self.engine_id)
            .finish()
    }
}

impl GoogleSearchProvider {
    /// Build from settings, reading credentials from config or environment.
    pub fn from_settings(settings: &SearchSettings) -> Result<Self, SearchError> {
        let mut credentials = CredentialBuilder::new()
            .require("api_key", SEARCH_API_KEY_ENV, "Custom Search API key")
            .require("engine_id", SEARCH_ENGINE_ID_ENV, "Search engine ID")
            .build(settings.credentials.as_json())?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SearchError::Transport(e.to_string()))?;

        Ok(Self {
            endpoint: settings.endpoint.clone(),
            api_key: credentials.take("api_key")?,
            engine_id: credentials.take("engine_id")?,
            timeout: settings.timeout,
            client,
        })
    }
}

#[async_trait]
impl SearchProvider for GoogleSearchProvider {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("key", self.api_key.expose()),
                ("cx", self.engine_id.expose()),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SearchError::Timeout(self.timeout)
                } else {
                    // without_url keeps the key out of the message
                    SearchError::Transport(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SearchError::Transport(e.without_url().to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<GoogleError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| status.canonical_reason().unwrap_or("error").to_string());
            return Err(SearchError::Api {
                status: status.as_u16(),
                message,
            });
        }

        parse_search_response(&body)
    }

    fn name(&self) -> &str {
        "google"
    }
}

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    #[serde(default)]
    items: Option<Vec<GoogleItem>>,
}

#[derive(Debug, Deserialize)]
struct GoogleItem {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    error: GoogleErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorDetail {
    message: String,
}

/// Parse a search response body into ranked results.
///
/// A missing `items` array means zero results. Items without a usable link
/// are skipped; ranks stay consecutive from 1.
pub fn parse_search_response(body: &str) -> Result<Vec<SearchResult>, SearchError> {
    let parsed: GoogleResponse =
        serde_json::from_str(body).map_err(|e| SearchError::Malformed(e.to_string()))?;

    let mut results = Vec::new();
    for item in parsed.items.unwrap_or_default() {
        let link = match item.link.as_deref().map(Url::parse) {
            Some(Ok(link)) => link,
            Some(Err(e)) => {
                tracing::warn!(link = ?item.link, error = %e, "Skipping result with invalid link");
                continue;
            }
            None => {
                tracing::warn!(title = ?item.title, "Skipping result without link");
                continue;
            }
        };

        results.push(SearchResult {
            rank: results.len() as u32 + 1,
            title: item.title.unwrap_or_default(),
            snippet: item.snippet.unwrap_or_default(),
            link,
        });
    }

    Ok(results)
}

/// Search with one retry on transient failures.
pub struct SearchClient {
    provider: Arc<dyn SearchProvider>,
    retry: RetryPolicy,
}

impl SearchClient {
    pub fn new(provider: Arc<dyn SearchProvider>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    /// Ranked results for `query`. `Ok(vec![])` means the search ran and found nothing.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError> {
        let results = self
            .retry
            .run("search", || self.provider.search(query))
            .await?;

        tracing::info!(
            stage = "search",
            provider = self.provider.name(),
            results = results.len(),
            "Search complete"
        );
        Ok(results)
    }
}
