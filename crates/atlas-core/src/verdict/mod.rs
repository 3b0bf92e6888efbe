//! Verdict payload parsing and validation.
//!
//! The comparator streams text that only becomes a JSON document once the
//! stream has completed. Everything in this module operates on the fully
//! assembled payload and must never be called on a partial concatenation.

mod parser;
mod schema;

pub use parser::{parse_verdict, VerdictError};
pub use schema::{is_valid_verdict, validate_verdict_schema};
