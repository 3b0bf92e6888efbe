//! Inbound service surface.
//!
//! The operations an HTTP layer or the CLI calls: `search`, `scrape`, and
//! `verify`. Each verification runs as its own task; dropping the event
//! stream aborts that task and with it any in-flight comparator call.

use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use atlas_core::{SearchResult, SourceDocument};

use crate::config::RuntimeConfig;
use crate::orchestrator::{
    DegradedResponse, PipelineOrchestrator, RuntimeError, VerificationOutcome,
};
use crate::verifier::VerdictChunk;

/// One event of a spawned verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyEvent {
    /// The evidence document, sent before any verdict chunk
    Source { rank: u32, document: SourceDocument },

    /// A verdict chunk, in arrival order; the last one is terminal
    Chunk(VerdictChunk),

    /// The run ended without a verdict stream
    Degraded(DegradedResponse),
}

/// Events of one spawned verification.
///
/// Dropping this aborts the verification task.
pub struct VerifyEvents {
    receiver: mpsc::Receiver<VerifyEvent>,
    task: JoinHandle<()>,
}

impl Stream for VerifyEvents {
    type Item = VerifyEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for VerifyEvents {
    fn drop(&mut self) {
        if !self.task.is_finished() {
            tracing::debug!("Verification cancelled by caller");
            self.task.abort();
        }
    }
}

/// Search results as data, for callers that serialize them.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
}

/// Cloneable handle to a shared [`PipelineOrchestrator`].
#[derive(Clone)]
pub struct VerificationService {
    orchestrator: Arc<PipelineOrchestrator>,
}

impl VerificationService {
    pub fn new(orchestrator: Arc<PipelineOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Build with default collaborators from `config`.
    pub fn from_config(config: Arc<RuntimeConfig>) -> Result<Self, RuntimeError> {
        let orchestrator = PipelineOrchestrator::builder().config(config).build()?;
        Ok(Self::new(Arc::new(orchestrator)))
    }

    pub fn orchestrator(&self) -> &PipelineOrchestrator {
        &self.orchestrator
    }

    /// Ranked search results for a free-text query.
    pub async fn search(&self, query: &str) -> Result<SearchResponse, RuntimeError> {
        let results = self.orchestrator.search(query).await?;
        Ok(SearchResponse {
            query: query.to_string(),
            results,
        })
    }

    /// Fetch the document behind the result at 1-based `index`.
    pub async fn scrape(&self, query: &str, index: u32) -> Result<SourceDocument, RuntimeError> {
        self.orchestrator.scrape(query, index).await
    }

    /// Run a verification in the caller's task.
    pub async fn verify(&self, query: &str, answer: &str) -> VerificationOutcome {
        self.orchestrator.run_verification(query, answer).await
    }

    /// Run a verification in its own task and stream its events.
    pub fn spawn_verify(&self, query: impl Into<String>, answer: impl Into<String>) -> VerifyEvents {
        let orchestrator = Arc::clone(&self.orchestrator);
        let query = query.into();
        let answer = answer.into();
        // Capacity 1: the task stays at most one event ahead of the caller
        let (sender, receiver) = mpsc::channel(1);

        let task = tokio::spawn(async move {
            match orchestrator.run_verification(&query, &answer).await {
                VerificationOutcome::Degraded(response) => {
                    let _ = sender.send(VerifyEvent::Degraded(response)).await;
                }
                VerificationOutcome::Streaming(mut run) => {
                    let source = VerifyEvent::Source {
                        rank: run.rank,
                        document: run.document,
                    };
                    if sender.send(source).await.is_err() {
                        return;
                    }
                    while let Some(chunk) = run.stream.next().await {
                        if sender.send(VerifyEvent::Chunk(chunk)).await.is_err() {
                            tracing::debug!("Receiver gone, dropping verdict stream");
                            return;
                        }
                    }
                }
            }
        });

        VerifyEvents { receiver, task }
    }
}

impl std::fmt::Debug for VerificationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationService").finish_non_exhaustive()
    }
}
