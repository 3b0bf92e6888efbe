//! # atlas-runtime
//!
//! The networked half of Atlas: query refinement, web search, evidence
//! fetching, and streamed verdicts from the comparator model.
//!
//! Deterministic decisions (routing, text cleanup, verdict validation) live
//! in `atlas-core`. This crate wires them to the outside world.
//!
//! ## Pipeline
//!
//! ```text
//! raw query ─► QueryRefiner ─► SearchClient ─► SourceSelector ─► ContentFetcher
//!                                                                    │
//!                               VerdictStream ◄─ VerificationEngine ◄┘
//! ```
//!
//! Refinement, search, and selection failures end the run with a
//! [`DegradedResponse`]; fetch failures never do.
//!
//! ## Example
//!
//! ```rust,ignore
//! use atlas_runtime::{RuntimeConfig, VerificationService, VerifyEvent};
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! let config = Arc::new(RuntimeConfig::from_yaml_file("atlas.yaml")?);
//! let service = VerificationService::from_config(config)?;
//!
//! let mut events = service.spawn_verify(
//!     "capital of australia",
//!     "The capital of Australia is Sydney.",
//! );
//! while let Some(event) = events.next().await {
//!     println!("{event:?}");
//! }
//! ```

pub mod config;
pub mod fetcher;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod refiner;
pub mod resilience;
pub mod search;
pub mod secrets;
pub mod service;
pub mod verifier;

pub use config::{ConfigError, RuntimeConfig};
pub use fetcher::{BrowserClient, ContentFetcher, FetchError, PageClient, PageResponse};
pub use orchestrator::{
    DegradedReason, DegradedResponse, PipelineOrchestrator, PipelineOrchestratorBuilder,
    RuntimeError, VerificationOutcome, VerificationRun,
};
pub use providers::{
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError,
    ProviderRegistry, ResponseFormat,
};
pub use refiner::{QueryRefiner, RefinementError};
pub use resilience::RetryPolicy;
pub use search::{GoogleSearchProvider, SearchClient, SearchError, SearchProvider};
pub use secrets::{ApiCredential, CredentialError};
pub use service::{SearchResponse, VerificationService, VerifyEvent, VerifyEvents};
pub use verifier::{
    collect_verdict, VerdictChunk, VerdictStream, VerificationEngine, VerificationError,
};
