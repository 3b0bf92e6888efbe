//! SourceSelector: picks one search result and its fetch strategy.

use std::sync::Arc;
use thiserror::Error;
use url::Url;

use super::table::RouteTable;
use crate::types::{FetchStrategy, SearchResult, SourceDescriptor};

/// Errors from source selection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("No usable search results ({skipped} candidates skipped)")]
    EmptyResultSet { skipped: usize },

    #[error("No search result at rank {0}")]
    RankNotFound(u32),

    #[error("Result at rank {rank} ({url}) is routed to skip")]
    Skipped { rank: u32, url: Url },
}

/// Table-driven source selection.
///
/// Candidates are evaluated in ascending rank order. `SkipToNext` candidates
/// are discarded; the first `Direct` or `ProxyReader` candidate wins.
#[derive(Debug, Clone)]
pub struct SourceSelector {
    routes: Arc<RouteTable>,
}

impl SourceSelector {
    pub fn new(routes: Arc<RouteTable>) -> Self {
        Self { routes }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Select the best-ranked fetchable candidate.
    pub fn select(&self, results: &[SearchResult]) -> Result<SourceDescriptor, SelectionError> {
        let mut ordered: Vec<&SearchResult> = results.iter().collect();
        ordered.sort_by_key(|r| r.rank);

        let mut skipped = 0;
        for result in ordered {
            match self.routes.strategy_for(&result.link) {
                FetchStrategy::SkipToNext => {
                    tracing::debug!(rank = result.rank, url = %result.link, "Skipping candidate");
                    skipped += 1;
                }
                strategy => {
                    return Ok(SourceDescriptor {
                        rank: result.rank,
                        url: result.link.clone(),
                        strategy,
                    });
                }
            }
        }

        Err(SelectionError::EmptyResultSet { skipped })
    }

    /// Resolve a specific rank without falling through to later ones.
    pub fn select_rank(
        &self,
        results: &[SearchResult],
        rank: u32,
    ) -> Result<SourceDescriptor, SelectionError> {
        let result = results
            .iter()
            .find(|r| r.rank == rank)
            .ok_or(SelectionError::RankNotFound(rank))?;

        match self.routes.strategy_for(&result.link) {
            FetchStrategy::SkipToNext => Err(SelectionError::Skipped {
                rank,
                url: result.link.clone(),
            }),
            strategy => Ok(SourceDescriptor {
                rank,
                url: result.link.clone(),
                strategy,
            }),
        }
    }
}

impl Default for SourceSelector {
    fn default() -> Self {
        Self::new(Arc::new(RouteTable::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RouteRule;
    use proptest::prelude::*;

    fn result(rank: u32, link: &str) -> SearchResult {
        SearchResult {
            rank,
            title: format!("Result {}", rank),
            snippet: String::new(),
            link: Url::parse(link).unwrap(),
        }
    }

    #[test]
    fn test_empty_results() {
        let selector = SourceSelector::default();
        assert_eq!(
            selector.select(&[]),
            Err(SelectionError::EmptyResultSet { skipped: 0 })
        );
    }

    #[test]
    fn test_rank_one_direct() {
        let selector = SourceSelector::default();
        let results = vec![
            result(1, "https://en.wikipedia.org/wiki/Paris"),
            result(2, "https://www.britannica.com/place/Paris"),
        ];
        let descriptor = selector.select(&results).unwrap();
        assert_eq!(descriptor.rank, 1);
        assert_eq!(descriptor.strategy, FetchStrategy::Direct);
        assert_eq!(descriptor.url.as_str(), "https://en.wikipedia.org/wiki/Paris");
    }

    #[test]
    fn test_proxy_reader_for_community_site() {
        let selector = SourceSelector::default();
        let results = vec![result(1, "https://www.quora.com/What-is-the-capital-of-France")];
        let descriptor = selector.select(&results).unwrap();
        assert_eq!(descriptor.strategy, FetchStrategy::ProxyReader);
    }

    #[test]
    fn test_video_skipped_to_next_rank() {
        let selector = SourceSelector::default();
        let results = vec![
            result(1, "https://www.youtube.com/watch?v=paris"),
            result(2, "https://en.wikipedia.org/wiki/Paris"),
        ];
        let descriptor = selector.select(&results).unwrap();
        assert_eq!(descriptor.rank, 2);
        assert_eq!(descriptor.strategy, FetchStrategy::Direct);
    }

    #[test]
    fn test_all_skipped_is_empty_result_set() {
        let selector = SourceSelector::default();
        let results = vec![
            result(1, "https://www.youtube.com/watch?v=1"),
            result(2, "https://vimeo.com/2"),
        ];
        assert_eq!(
            selector.select(&results),
            Err(SelectionError::EmptyResultSet { skipped: 2 })
        );
    }

    #[test]
    fn test_rank_order_not_slice_order() {
        let selector = SourceSelector::default();
        let results = vec![
            result(3, "https://example.org/three"),
            result(1, "https://www.youtube.com/watch?v=1"),
            result(2, "https://example.org/two"),
        ];
        assert_eq!(selector.select(&results).unwrap().rank, 2);
    }

    #[test]
    fn test_custom_routes() {
        let routes = RouteTable::new(vec![RouteRule::new(
            "wikipedia.org",
            FetchStrategy::SkipToNext,
        )])
        .unwrap();
        let selector = SourceSelector::new(Arc::new(routes));
        let results = vec![
            result(1, "https://en.wikipedia.org/wiki/Paris"),
            result(2, "https://www.youtube.com/watch?v=1"),
        ];
        // youtube is not in the custom table, so it routes Direct
        let descriptor = selector.select(&results).unwrap();
        assert_eq!(descriptor.rank, 2);
        assert_eq!(descriptor.strategy, FetchStrategy::Direct);
    }

    #[test]
    fn test_select_rank() {
        let selector = SourceSelector::default();
        let results = vec![
            result(1, "https://www.youtube.com/watch?v=1"),
            result(2, "https://www.reddit.com/r/paris"),
        ];
        assert!(matches!(
            selector.select_rank(&results, 1),
            Err(SelectionError::Skipped { rank: 1, .. })
        ));
        assert_eq!(
            selector.select_rank(&results, 2).unwrap().strategy,
            FetchStrategy::ProxyReader
        );
        assert_eq!(
            selector.select_rank(&results, 7),
            Err(SelectionError::RankNotFound(7))
        );
    }

    fn host_strategy() -> impl Strategy<Value = &'static str> {
        prop::sample::select(vec![
            "https://www.youtube.com/watch?v=x",
            "https://youtu.be/x",
            "https://vimeo.com/1",
            "https://www.quora.com/q",
            "https://www.reddit.com/r/x",
            "https://en.wikipedia.org/wiki/X",
            "https://example.com/",
        ])
    }

    proptest! {
        #[test]
        fn prop_never_selects_skip(links in prop::collection::vec(host_strategy(), 0..12)) {
            let selector = SourceSelector::default();
            let results: Vec<SearchResult> = links
                .iter()
                .enumerate()
                .map(|(i, link)| result(i as u32 + 1, link))
                .collect();

            match selector.select(&results) {
                Ok(descriptor) => {
                    prop_assert_ne!(descriptor.strategy, FetchStrategy::SkipToNext);
                    prop_assert_ne!(
                        selector.routes().strategy_for(&descriptor.url),
                        FetchStrategy::SkipToNext
                    );
                    // every better-ranked candidate must have been a skip
                    for earlier in results.iter().filter(|r| r.rank < descriptor.rank) {
                        prop_assert_eq!(
                            selector.routes().strategy_for(&earlier.link),
                            FetchStrategy::SkipToNext
                        );
                    }
                }
                Err(SelectionError::EmptyResultSet { skipped }) => {
                    prop_assert_eq!(skipped, results.len());
                }
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
        }
    }
}
