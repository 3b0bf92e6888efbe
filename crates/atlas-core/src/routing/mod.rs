//! Domain-aware source routing.
//!
//! The routing table is configuration, not code: new scrape-hostile or
//! video domains are added to the table without touching selection logic.

mod selector;
mod table;

pub use selector::{SelectionError, SourceSelector};
pub use table::{RouteError, RouteRule, RouteTable};
