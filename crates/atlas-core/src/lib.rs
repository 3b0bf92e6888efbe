//! # atlas-core
//!
//! Deterministic building blocks for the Atlas hallucination-verification
//! pipeline.
//!
//! This crate answers the questions that do not need a network:
//! - Which search result should be fetched, and how?
//! - What does clean evidence text look like?
//! - Is an assembled comparator payload a valid verdict?
//!
//! ## Key Guarantees
//!
//! 1. **No network calls**: everything here is pure and synchronous
//! 2. **Table-driven routing**: fetch strategy depends only on the URL host
//! 3. **Never returns a skipped source**: `SkipToNext` candidates are discarded
//! 4. **Verdict invariants hold by construction**: `NoHallucination` carries no spans
//!
//! ## Example
//!
//! ```rust,ignore
//! use atlas_core::{RouteTable, SourceSelector};
//! use std::sync::Arc;
//!
//! let selector = SourceSelector::new(Arc::new(RouteTable::default()));
//! let descriptor = selector.select(&results)?;
//! println!("fetching {} via {}", descriptor.url, descriptor.strategy);
//! ```

pub mod routing;
pub mod text;
pub mod types;
pub mod verdict;

pub use routing::{RouteError, RouteRule, RouteTable, SelectionError, SourceSelector};
pub use text::{normalize_whitespace, sanitize_refined_query, MAX_QUERY_WORDS};
pub use types::{
    FetchStrategy, Query, QueryError, SearchResult, SourceDescriptor, SourceDocument,
    VerdictStatus, VerificationVerdict,
};
pub use verdict::{parse_verdict, VerdictError};
