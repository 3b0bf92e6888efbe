//! Pipeline orchestrator for one verification request.
//!
//! Stages run strictly in order, each consuming the previous stage's output:
//! refine -> search -> select -> fetch -> verify.
//!
//! - Refinement and search failures, and an empty result set, end the run
//!   with a [`DegradedResponse`] before any further network call
//! - Fetch failures are soft: the run continues with sentinel evidence
//! - Comparator failures arrive as the terminal chunk of the verdict stream
//!
//! The orchestrator never retries; each stage owns its retry policy.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use atlas_core::{
    Query, QueryError, SearchResult, SelectionError, SourceDescriptor, SourceDocument,
    SourceSelector,
};

use crate::config::{ConfigError, RuntimeConfig};
use crate::fetcher::{BrowserClient, ContentFetcher, FetchError, PageClient};
use crate::providers::{LlmProvider, ProviderError, ProviderRegistry};
use crate::refiner::{QueryRefiner, RefinementError};
use crate::search::{GoogleSearchProvider, SearchClient, SearchError, SearchProvider};
use crate::verifier::{VerdictStream, VerificationEngine};

/// Highest rank [`PipelineOrchestrator::scrape`] accepts.
pub const MAX_SCRAPE_INDEX: u32 = 10;

/// Errors from building the pipeline or from the non-streaming operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Search unavailable: {0}")]
    Search(#[from] SearchError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error("Page client error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Invalid query: {0}")]
    Query(#[from] QueryError),

    #[error("Result index must be between 1 and {max}, got {index}")]
    InvalidIndex { index: u32, max: u32 },
}

/// Why a run ended without a verdict stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    /// Query or answer was empty
    InvalidInput,
    /// The refiner model failed
    RefinementFailed,
    /// The search API failed
    SearchUnavailable,
    /// Search succeeded but nothing was fetchable
    NoResults,
}

impl fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradedReason::InvalidInput => write!(f, "invalid_input"),
            DegradedReason::RefinementFailed => write!(f, "refinement_failed"),
            DegradedReason::SearchUnavailable => write!(f, "search_unavailable"),
            DegradedReason::NoResults => write!(f, "no_results"),
        }
    }
}

/// A handled, non-exceptional outcome with no source and no verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DegradedResponse {
    pub reason: DegradedReason,
    pub message: String,
}

impl DegradedResponse {
    fn new(reason: DegradedReason, message: impl Into<String>) -> Self {
        let response = Self {
            reason,
            message: message.into(),
        };
        tracing::warn!(reason = %response.reason, message = %response.message, "Degraded response");
        response
    }
}

/// A run that reached the comparator.
pub struct VerificationRun {
    /// The query with its refined form
    pub query: Query,

    /// The evidence document (possibly a soft failure)
    pub document: SourceDocument,

    /// Rank of the search result the document came from
    pub rank: u32,

    /// Verdict stream; dropping it cancels the comparator call
    pub stream: VerdictStream,
}

impl fmt::Debug for VerificationRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationRun")
            .field("query", &self.query)
            .field("document", &self.document.url)
            .field("rank", &self.rank)
            .finish_non_exhaustive()
    }
}

/// Result of [`PipelineOrchestrator::run_verification`].
#[derive(Debug)]
pub enum VerificationOutcome {
    Streaming(VerificationRun),
    Degraded(DegradedResponse),
}

/// Sequences the pipeline stages for each request.
///
/// Holds only read-only collaborators, so one instance serves any number
/// of concurrent requests.
pub struct PipelineOrchestrator {
    refiner: QueryRefiner,
    search: SearchClient,
    selector: SourceSelector,
    fetcher: ContentFetcher,
    verifier: VerificationEngine,
    config: Arc<RuntimeConfig>,
}

impl PipelineOrchestrator {
    pub fn builder() -> PipelineOrchestratorBuilder {
        PipelineOrchestratorBuilder::new()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn selector(&self) -> &SourceSelector {
        &self.selector
    }

    /// Verify `answer` against evidence retrieved for `raw_query`.
    pub async fn run_verification(&self, raw_query: &str, answer: &str) -> VerificationOutcome {
        if raw_query.trim().is_empty() || answer.trim().is_empty() {
            return VerificationOutcome::Degraded(DegradedResponse::new(
                DegradedReason::InvalidInput,
                "Both a query and an answer are required",
            ));
        }

        let query = match self.refiner.refine(raw_query).await {
            Ok(query) => query,
            Err(RefinementError::EmptyQuery) => {
                return VerificationOutcome::Degraded(DegradedResponse::new(
                    DegradedReason::InvalidInput,
                    "Both a query and an answer are required",
                ))
            }
            Err(e) => {
                return VerificationOutcome::Degraded(DegradedResponse::new(
                    DegradedReason::RefinementFailed,
                    format!("Could not prepare a search query: {}", e),
                ))
            }
        };

        let results = match self.search.search(query.search_text()).await {
            Ok(results) => results,
            Err(e) => {
                return VerificationOutcome::Degraded(DegradedResponse::new(
                    DegradedReason::SearchUnavailable,
                    format!("Web search is unavailable: {}", e),
                ))
            }
        };

        let descriptor = match self.selector.select(&results) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::info!(stage = "select", error = %e, "No usable source");
                return VerificationOutcome::Degraded(DegradedResponse::new(
                    DegradedReason::NoResults,
                    "The query produced no usable results",
                ));
            }
        };
        tracing::info!(
            stage = "select",
            rank = descriptor.rank,
            url = %descriptor.url,
            strategy = %descriptor.strategy,
            "Source selected"
        );

        let document = self.fetcher.fetch(&descriptor).await;
        let stream = self
            .verifier
            .verify(answer, &document.extracted_text, &document.url);

        VerificationOutcome::Streaming(VerificationRun {
            query,
            document,
            rank: descriptor.rank,
            stream,
        })
    }

    /// Ranked results for a free-text query, sent to search as-is.
    pub async fn search(&self, raw_query: &str) -> Result<Vec<SearchResult>, RuntimeError> {
        let query = Query::new(raw_query)?;
        Ok(self.search.search(query.raw()).await?)
    }

    /// Search for `raw_query` and fetch the result at 1-based `index`.
    ///
    /// The result is not replaced by a later one when its route is skip;
    /// that case is reported as [`SelectionError::Skipped`].
    pub async fn scrape(&self, raw_query: &str, index: u32) -> Result<SourceDocument, RuntimeError> {
        if index == 0 || index > MAX_SCRAPE_INDEX {
            return Err(RuntimeError::InvalidIndex {
                index,
                max: MAX_SCRAPE_INDEX,
            });
        }

        let results = self.search(raw_query).await?;
        let descriptor: SourceDescriptor = self.selector.select_rank(&results, index)?;
        Ok(self.fetcher.fetch(&descriptor).await)
    }
}

/// Builder for [`PipelineOrchestrator`].
///
/// Collaborators not set explicitly are created from the configuration:
/// the model provider through [`ProviderRegistry::with_defaults`], the
/// Google search backend, and the browser page client.
pub struct PipelineOrchestratorBuilder {
    config: Arc<RuntimeConfig>,
    provider: Option<Arc<dyn LlmProvider>>,
    search_provider: Option<Arc<dyn SearchProvider>>,
    page_client: Option<Arc<dyn PageClient>>,
    registry: Option<ProviderRegistry>,
}

impl PipelineOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: Arc::new(RuntimeConfig::default()),
            provider: None,
            search_provider: None,
            page_client: None,
            registry: None,
        }
    }

    pub fn config(mut self, config: Arc<RuntimeConfig>) -> Self {
        self.config = config;
        self
    }

    /// Model provider for both refiner and comparator.
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn search_provider(mut self, provider: Arc<dyn SearchProvider>) -> Self {
        self.search_provider = Some(provider);
        self
    }

    pub fn page_client(mut self, client: Arc<dyn PageClient>) -> Self {
        self.page_client = Some(client);
        self
    }

    /// Registry used when no provider is set.
    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<PipelineOrchestrator, RuntimeError> {
        let config = self.config;
        config.validate()?;

        let provider: Arc<dyn LlmProvider> = match self.provider {
            Some(provider) => provider,
            None => {
                let registry = self.registry.unwrap_or_else(ProviderRegistry::with_defaults);
                if !registry.has_provider(&config.provider.kind) {
                    return Err(RuntimeError::ProviderNotConfigured(format!(
                        "Unknown provider '{}'. Available: {:?}",
                        config.provider.kind,
                        registry.available_types()
                    )));
                }
                registry.create(&config.provider.kind, config.provider.options.as_json())?
            }
        };

        let search_provider: Arc<dyn SearchProvider> = match self.search_provider {
            Some(search) => search,
            None => Arc::new(GoogleSearchProvider::from_settings(&config.search)?),
        };

        let page_client: Arc<dyn PageClient> = match self.page_client {
            Some(client) => client,
            None => Arc::new(BrowserClient::from_settings(&config.fetch)?),
        };

        tracing::debug!(provider = provider.name(), search = search_provider.name(), "Pipeline built");

        Ok(PipelineOrchestrator {
            refiner: QueryRefiner::new(
                Arc::clone(&provider),
                config.refiner_completion(),
                config.retry,
            ),
            search: SearchClient::new(search_provider, config.retry),
            selector: SourceSelector::new(Arc::new(config.routes.clone())),
            fetcher: ContentFetcher::from_settings(page_client, &config.fetch),
            verifier: VerificationEngine::new(provider, config.comparator_completion()),
            config,
        })
    }
}

impl Default for PipelineOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
