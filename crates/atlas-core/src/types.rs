//! Data model shared by every pipeline stage.
//!
//! All of these values live for a single verification request. Nothing here
//! is persisted or shared between requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;

/// Errors when building or refining a [`Query`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Query is empty")]
    Empty,

    #[error("Query has already been refined")]
    AlreadyRefined,

    #[error("Refined query is empty after sanitation")]
    EmptyRefinement,
}

/// A user query and, once QueryRefiner has run, its search-engine rewrite.
///
/// `refined` can be set exactly once. Use [`Query::with_refined`] to obtain
/// the refined value; it consumes the unrefined query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "QueryFields")]
pub struct Query {
    raw: String,
    refined: Option<String>,
}

/// Unchecked wire form of [`Query`]; deserialization goes through the
/// same constructors as code.
#[derive(Deserialize)]
struct QueryFields {
    raw: String,
    #[serde(default)]
    refined: Option<String>,
}

impl TryFrom<QueryFields> for Query {
    type Error = QueryError;

    fn try_from(fields: QueryFields) -> Result<Self, Self::Error> {
        let query = Query::new(fields.raw)?;
        match fields.refined {
            Some(refined) => query.with_refined(&refined),
            None => Ok(query),
        }
    }
}

impl Query {
    /// Create an unrefined query. Whitespace-only input is rejected.
    pub fn new(raw: impl Into<String>) -> Result<Self, QueryError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(QueryError::Empty);
        }
        Ok(Self { raw, refined: None })
    }

    /// Attach the refined form.
    ///
    /// The text is passed through [`crate::text::sanitize_refined_query`] so the
    /// stored value always satisfies the word and character limits.
    pub fn with_refined(self, refined: &str) -> Result<Self, QueryError> {
        if self.refined.is_some() {
            return Err(QueryError::AlreadyRefined);
        }
        let refined = crate::text::sanitize_refined_query(refined)?;
        Ok(Self {
            raw: self.raw,
            refined: Some(refined),
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn refined(&self) -> Option<&str> {
        self.refined.as_deref()
    }

    /// The text to send to the search engine: refined if available, raw otherwise.
    pub fn search_text(&self) -> &str {
        self.refined.as_deref().unwrap_or(&self.raw)
    }
}

/// One ranked hit from the search provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// 1-based position in the provider's ordering
    pub rank: u32,
    pub title: String,
    pub snippet: String,
    pub link: Url,
}

/// How a document URL is retrieved.
///
/// Derived from the URL's host through the routing table, never from page content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    /// Fetch the origin directly and extract text from its HTML
    Direct,

    /// Fetch through the text-rendering proxy
    ProxyReader,

    /// Discard the candidate and move to the next rank
    SkipToNext,
}

impl fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchStrategy::Direct => write!(f, "direct"),
            FetchStrategy::ProxyReader => write!(f, "proxy_reader"),
            FetchStrategy::SkipToNext => write!(f, "skip_to_next"),
        }
    }
}

/// The candidate chosen by the SourceSelector, before any fetch happens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Rank of the search result this descriptor came from
    pub rank: u32,
    pub url: Url,
    pub strategy: FetchStrategy,
}

/// Evidence retrieved for one descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub url: Url,
    pub strategy: FetchStrategy,

    /// Extracted text, or the failure sentinel when `fetch_succeeded` is false
    pub extracted_text: String,

    pub fetch_succeeded: bool,

    /// HTTP status of the underlying fetch, when one was received
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,

    pub fetched_at: DateTime<Utc>,
}

impl SourceDocument {
    /// Sentinel evidence text used when a document cannot be retrieved.
    pub fn failure_sentinel(url: &Url) -> String {
        format!("Cannot get the content of {}", url)
    }

    /// Build a successful document.
    pub fn fetched(descriptor: &SourceDescriptor, text: String, http_status: Option<u16>) -> Self {
        Self {
            url: descriptor.url.clone(),
            strategy: descriptor.strategy,
            extracted_text: text,
            fetch_succeeded: true,
            http_status,
            fetched_at: Utc::now(),
        }
    }

    /// Build a soft-failure document carrying the sentinel text.
    pub fn failed(descriptor: &SourceDescriptor, http_status: Option<u16>) -> Self {
        Self {
            url: descriptor.url.clone(),
            strategy: descriptor.strategy,
            extracted_text: Self::failure_sentinel(&descriptor.url),
            fetch_succeeded: false,
            http_status,
            fetched_at: Utc::now(),
        }
    }
}

/// Classification produced by the comparator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    NoHallucination,
    HallucinationDetected,
    Inconclusive,
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerdictStatus::NoHallucination => write!(f, "No hallucination detected"),
            VerdictStatus::HallucinationDetected => write!(f, "Hallucination detected"),
            VerdictStatus::Inconclusive => write!(f, "Inconclusive"),
        }
    }
}

/// Structured outcome of comparing an answer against evidence.
///
/// Invariant: when `status` is `NoHallucination` both spans are `None`.
/// Construct through [`VerificationVerdict::new`] to keep it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationVerdict {
    pub status: VerdictStatus,
    pub hallucinated_span: Option<String>,
    pub evidence_span: Option<String>,
    pub source: Url,
}

impl VerificationVerdict {
    pub fn new(
        status: VerdictStatus,
        hallucinated_span: Option<String>,
        evidence_span: Option<String>,
        source: Url,
    ) -> Self {
        let (hallucinated_span, evidence_span) = match status {
            VerdictStatus::NoHallucination => (None, None),
            _ => (non_blank(hallucinated_span), non_blank(evidence_span)),
        };
        Self {
            status,
            hallucinated_span,
            evidence_span,
            source,
        }
    }

    pub fn is_hallucination(&self) -> bool {
        self.status == VerdictStatus::HallucinationDetected
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
