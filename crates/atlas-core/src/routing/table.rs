//! Domain routing table: host pattern -> fetch strategy.
//!
//! The table is ordered and the first matching rule wins. A pattern matches
//! the host itself and every subdomain of it, so `quora.com` covers
//! `www.quora.com` and `es.quora.com` but not `notquora.com`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;
use url::Url;

use crate::types::FetchStrategy;

/// Errors when loading or validating a routing table.
#[derive(Error, Debug)]
pub enum RouteError {
    #[error("Failed to read routing table: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse routing table YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Route at position {0} has an empty domain pattern")]
    EmptyPattern(usize),

    #[error("Invalid domain pattern '{0}': expected a bare host such as 'example.com'")]
    InvalidPattern(String),

    #[error("Duplicate domain pattern: {0}")]
    DuplicatePattern(String),
}

/// A single routing rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    /// Bare host pattern (e.g. "reddit.com")
    pub domain: String,

    /// Strategy for hosts matching `domain`
    pub strategy: FetchStrategy,
}

impl RouteRule {
    pub fn new(domain: impl Into<String>, strategy: FetchStrategy) -> Self {
        Self {
            domain: domain.into(),
            strategy,
        }
    }

    fn matches(&self, host: &str) -> bool {
        host == self.domain
            || (host.len() > self.domain.len()
                && host.ends_with(&self.domain)
                && host.as_bytes()[host.len() - self.domain.len() - 1] == b'.')
    }
}

/// Ordered mapping from domain pattern to [`FetchStrategy`].
///
/// Built once at startup and read concurrently afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<RouteRule>", into = "Vec<RouteRule>")]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    /// Build a table from rules, validating and normalizing each pattern.
    pub fn new(rules: Vec<RouteRule>) -> Result<Self, RouteError> {
        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(rules.len());

        for (idx, rule) in rules.into_iter().enumerate() {
            let domain = normalize_pattern(&rule.domain);
            if domain.is_empty() {
                return Err(RouteError::EmptyPattern(idx));
            }
            if domain.contains(|c: char| c == '/' || c == ':' || c == '@' || c.is_whitespace()) {
                return Err(RouteError::InvalidPattern(rule.domain));
            }
            if !seen.insert(domain.clone()) {
                return Err(RouteError::DuplicatePattern(domain));
            }
            normalized.push(RouteRule::new(domain, rule.strategy));
        }

        Ok(Self { rules: normalized })
    }

    /// A table with no rules: every host routes `Direct`.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Parse a table from a YAML list of `{domain, strategy}` entries.
    pub fn from_yaml(yaml: &str) -> Result<Self, RouteError> {
        let rules: Vec<RouteRule> = serde_yaml::from_str(yaml)?;
        Self::new(rules)
    }

    /// Parse a table from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, RouteError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// The rules in evaluation order.
    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// Strategy for a host name. Unmatched hosts are `Direct`.
    pub fn strategy_for_host(&self, host: &str) -> FetchStrategy {
        let host = normalize_pattern(host);
        self.rules
            .iter()
            .find(|rule| rule.matches(&host))
            .map(|rule| rule.strategy)
            .unwrap_or(FetchStrategy::Direct)
    }

    /// Strategy for a URL, looked up by its host.
    pub fn strategy_for(&self, url: &Url) -> FetchStrategy {
        match url.host_str() {
            Some(host) => self.strategy_for_host(host),
            None => FetchStrategy::Direct,
        }
    }
}

impl Default for RouteTable {
    /// Scrape-hostile community and legal-reference sites go through the
    /// proxy reader; video hosts are skipped.
    fn default() -> Self {
        let proxied = [
            "quora.com",
            "reddit.com",
            "law.cornell.edu",
            "justia.com",
            "casetext.com",
        ];
        let skipped = [
            "youtube.com",
            "youtu.be",
            "vimeo.com",
            "dailymotion.com",
            "tiktok.com",
        ];

        let rules = proxied
            .iter()
            .map(|d| RouteRule::new(*d, FetchStrategy::ProxyReader))
            .chain(skipped.iter().map(|d| RouteRule::new(*d, FetchStrategy::SkipToNext)))
            .collect();

        Self { rules }
    }
}

impl TryFrom<Vec<RouteRule>> for RouteTable {
    type Error = RouteError;

    fn try_from(rules: Vec<RouteRule>) -> Result<Self, Self::Error> {
        Self::new(rules)
    }
}

impl From<RouteTable> for Vec<RouteRule> {
    fn from(table: RouteTable) -> Self {
        table.rules
    }
}

/// Lowercase, trim, and drop a leading `*.` or trailing dot.
fn normalize_pattern(pattern: &str) -> String {
    let trimmed = pattern.trim().trim_end_matches('.');
    trimmed
        .strip_prefix("*.")
        .unwrap_or(trimmed)
        .to_ascii_lowercase()
}
