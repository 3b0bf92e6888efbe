//! QueryRefiner: rewrites a raw question into a compact search query.

use std::sync::Arc;
use thiserror::Error;

use atlas_core::{Query, QueryError};

use crate::prompts::{refiner_message, REFINER_SYSTEM_PROMPT};
use crate::providers::{ChatMessage, CompletionConfig, LlmProvider, ProviderError};
use crate::resilience::RetryPolicy;

/// Errors from query refinement.
#[derive(Error, Debug, Clone)]
pub enum RefinementError {
    #[error("Query is empty")]
    EmptyQuery,

    #[error("Refiner model unavailable: {0}")]
    Upstream(#[from] ProviderError),

    #[error("Refiner returned an unusable query: {0}")]
    Malformed(String),
}

impl From<QueryError> for RefinementError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Empty => RefinementError::EmptyQuery,
            other => RefinementError::Malformed(other.to_string()),
        }
    }
}

/// Turns a raw query into a refined [`Query`] through one model call.
pub struct QueryRefiner {
    provider: Arc<dyn LlmProvider>,
    completion: CompletionConfig,
    retry: RetryPolicy,
}

impl QueryRefiner {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        completion: CompletionConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            completion,
            retry,
        }
    }

    /// Refine `raw_query`.
    ///
    /// Transient model failures are retried per the policy; whatever the
    /// model returns is sanitized to the refined-query limits.
    pub async fn refine(&self, raw_query: &str) -> Result<Query, RefinementError> {
        let query = Query::new(raw_query)?;

        let messages = vec![
            ChatMessage::system(REFINER_SYSTEM_PROMPT),
            ChatMessage::user(refiner_message(raw_query)),
        ];

        let response = self
            .retry
            .run("refine", || {
                self.provider
                    .complete(messages.clone(), &self.completion)
            })
            .await?;

        let text = unwrap_model_text(&response.content);
        let refined = query.with_refined(&text)?;

        tracing::info!(
            stage = "refine",
            provider = self.provider.name(),
            refined = refined.search_text(),
            "Query refined"
        );
        Ok(refined)
    }
}

/// Accept plain text, a JSON string, or a `{"query": ...}` object.
fn unwrap_model_text(content: &str) -> String {
    let trimmed = content.trim();
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(serde_json::Value::Object(map)) => map
            .get("query")
            .and_then(|q| q.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| trimmed.to_string()),
        _ => trimmed.trim_matches(|c| c == '"' || c == '`').to_string(),
    }
}
