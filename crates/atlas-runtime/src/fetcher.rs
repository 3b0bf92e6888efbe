//! ContentFetcher: retrieves evidence text for a selected source.
//!
//! `fetch` never fails. Transport errors, non-200 statuses and empty pages
//! all produce a [`SourceDocument`] with `fetch_succeeded == false` and the
//! sentinel text `"Cannot get the content of <url>"`.

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use scraper::{Html, Node};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use atlas_core::text::{normalize_whitespace, truncate_chars};
use atlas_core::{FetchStrategy, SourceDescriptor, SourceDocument};

use crate::config::FetchSettings;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Elements whose text is never evidence.
const SKIPPED_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

/// Errors from the page client. [`ContentFetcher`] turns these into soft failures.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to read response body: {0}")]
    Body(String),
}

/// Status and body of one page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResponse {
    pub status: u16,
    pub body: String,
}

/// HTTP GET abstraction for page and proxy fetches.
#[async_trait]
pub trait PageClient: Send + Sync {
    async fn get(&self, url: &str) -> Result<PageResponse, FetchError>;
}

/// Browser-impersonating page client.
///
/// Sends a desktop Chrome User-Agent and the headers a browser sends on
/// navigation, so origin servers serve the same HTML a reader would see.
#[derive(Debug, Clone)]
pub struct BrowserClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl BrowserClient {
    pub fn from_settings(settings: &FetchSettings) -> Result<Self, FetchError> {
        let user_agent = match settings.user_agent.as_deref() {
            Some(ua) => HeaderValue::from_str(ua).map_err(|e| FetchError::Client(e.to_string()))?,
            None => HeaderValue::from_static(BROWSER_USER_AGENT),
        };

        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, user_agent);
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );
        headers.insert(
            header::UPGRADE_INSECURE_REQUESTS,
            HeaderValue::from_static("1"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .redirect(reqwest::redirect::Policy::limited(settings.max_redirects))
            .danger_accept_invalid_certs(settings.accept_invalid_certs)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            client,
            timeout: settings.timeout,
        })
    }
}

#[async_trait]
impl PageClient for BrowserClient {
    async fn get(&self, url: &str) -> Result<PageResponse, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else {
                FetchError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))?;

        Ok(PageResponse { status, body })
    }
}

/// Fetches and extracts evidence text for a [`SourceDescriptor`].
pub struct ContentFetcher {
    client: Arc<dyn PageClient>,
    proxy_base: String,
    max_evidence_chars: usize,
}

impl ContentFetcher {
    /// `proxy_base` gets a trailing `/` if it lacks one, so the target URL
    /// always lands in the path.
    pub fn new(client: Arc<dyn PageClient>, proxy_base: impl Into<String>, max_evidence_chars: usize) -> Self {
        let mut proxy_base = proxy_base.into();
        if !proxy_base.ends_with('/') {
            proxy_base.push('/');
        }
        Self {
            client,
            proxy_base,
            max_evidence_chars,
        }
    }

    pub fn from_settings(client: Arc<dyn PageClient>, settings: &FetchSettings) -> Self {
        Self::new(client, settings.proxy_base_url.clone(), settings.max_evidence_chars)
    }

    /// The proxy-reader URL for a target: the base with the target appended.
    pub fn proxy_url(&self, target: &url::Url) -> String {
        format!("{}{}", self.proxy_base, target)
    }

    /// Fetch evidence. Never fails; see the module docs.
    pub async fn fetch(&self, descriptor: &SourceDescriptor) -> SourceDocument {
        let request_url = match descriptor.strategy {
            FetchStrategy::Direct => descriptor.url.to_string(),
            FetchStrategy::ProxyReader => self.proxy_url(&descriptor.url),
            FetchStrategy::SkipToNext => {
                tracing::warn!(url = %descriptor.url, "Refusing to fetch a skipped source");
                return SourceDocument::failed(descriptor, None);
            }
        };

        let response = match self.client.get(&request_url).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    stage = "fetch",
                    url = %descriptor.url,
                    strategy = %descriptor.strategy,
                    error = %e,
                    "Fetch failed, continuing with sentinel evidence"
                );
                return SourceDocument::failed(descriptor, None);
            }
        };

        if response.status != 200 {
            tracing::warn!(
                stage = "fetch",
                url = %descriptor.url,
                strategy = %descriptor.strategy,
                status = response.status,
                "Non-200 response, continuing with sentinel evidence"
            );
            return SourceDocument::failed(descriptor, Some(response.status));
        }

        let text = match descriptor.strategy {
            FetchStrategy::ProxyReader => response.body.trim().to_string(),
            _ => extract_text(&response.body),
        };

        if text.is_empty() {
            tracing::warn!(stage = "fetch", url = %descriptor.url, "Page has no extractable text");
            return SourceDocument::failed(descriptor, Some(response.status));
        }

        let char_count = text.chars().count();
        let text = if char_count > self.max_evidence_chars {
            tracing::debug!(
                url = %descriptor.url,
                chars = char_count,
                limit = self.max_evidence_chars,
                "Truncating evidence"
            );
            truncate_chars(&text, self.max_evidence_chars).to_string()
        } else {
            text
        };

        tracing::info!(
            stage = "fetch",
            url = %descriptor.url,
            strategy = %descriptor.strategy,
            chars = text.chars().count(),
            "Evidence fetched"
        );
        SourceDocument::fetched(descriptor, text, Some(response.status))
    }
}

/// Plain text of an HTML document with whitespace collapsed.
pub fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);

    let mut pieces: Vec<&str> = Vec::new();
    for node in document.tree.root().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| SKIPPED_ELEMENTS.contains(&el.name()))
        });
        if !hidden {
            pieces.push(text);
        }
    }

    normalize_whitespace(&pieces.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;
    use url::Url;

    /// Records requested URLs and answers with a fixed response.
    struct RecordingClient {
        response: Result<PageResponse, FetchError>,
        requested: Mutex<Vec<String>>,
    }

    impl RecordingClient {
        fn new(response: Result<PageResponse, FetchError>) -> Arc<Self> {
            Arc::new(Self {
                response,
                requested: Mutex::new(Vec::new()),
            })
        }

        fn ok(status: u16, body: &str) -> Arc<Self> {
            Self::new(Ok(PageResponse {
                status,
                body: body.to_string(),
            }))
        }
    }

    #[async_trait]
    impl PageClient for RecordingClient {
        async fn get(&self, url: &str) -> Result<PageResponse, FetchError> {
            self.requested.lock().unwrap().push(url.to_string());
            self.response.clone()
        }
    }

    fn descriptor(url: &str, strategy: FetchStrategy) -> SourceDescriptor {
        SourceDescriptor {
            rank: 1,
            url: Url::parse(url).unwrap(),
            strategy,
        }
    }

    fn fetcher(client: Arc<RecordingClient>) -> ContentFetcher {
        ContentFetcher::new(client, "https://r.jina.ai/", 100_000)
    }

    #[test]
    fn test_extract_text_strips_markup_and_scripts() {
        let html = r#"<html><head><title>Paris</title><style>body{color:red}</style></head>
            <body><h1>Paris</h1>
            <p>Population:
               2.1 million</p><script>var tracking = 1;</script>
            <noscript>enable js</noscript></body></html>"#;
        let text = extract_text(html);
        assert_eq!(text, "Paris Paris Population: 2.1 million");
    }

    #[tokio::test]
    async fn test_direct_fetch() {
        let client = RecordingClient::ok(200, "<p>Paris\tis the\r\ncapital</p>");
        let doc = fetcher(client.clone())
            .fetch(&descriptor("https://en.wikipedia.org/wiki/Paris", FetchStrategy::Direct))
            .await;

        assert!(doc.fetch_succeeded);
        assert_eq!(doc.extracted_text, "Paris is the capital");
        assert_eq!(doc.http_status, Some(200));
        assert_eq!(
            client.requested.lock().unwrap().as_slice(),
            ["https://en.wikipedia.org/wiki/Paris"]
        );
    }

    #[tokio::test]
    async fn test_proxy_fetch_uses_prefixed_url() {
        let client = RecordingClient::ok(200, "  Title: Capital of France\n\nParis.  ");
        let doc = fetcher(client.clone())
            .fetch(&descriptor(
                "https://www.quora.com/What-is-the-capital-of-France",
                FetchStrategy::ProxyReader,
            ))
            .await;

        assert!(doc.fetch_succeeded);
        assert_eq!(doc.extracted_text, "Title: Capital of France\n\nParis.");
        assert_eq!(doc.url.as_str(), "https://www.quora.com/What-is-the-capital-of-France");
        assert_eq!(
            client.requested.lock().unwrap().as_slice(),
            ["https://r.jina.ai/https://www.quora.com/What-is-the-capital-of-France"]
        );
    }

    #[tokio::test]
    async fn test_proxy_base_without_trailing_slash() {
        let client = RecordingClient::ok(200, "Paris.");
        let fetcher = ContentFetcher::new(client.clone(), "https://r.jina.ai", 100_000);
        let doc = fetcher
            .fetch(&descriptor("https://www.quora.com/q", FetchStrategy::ProxyReader))
            .await;

        assert!(doc.fetch_succeeded);
        assert_eq!(
            client.requested.lock().unwrap().as_slice(),
            ["https://r.jina.ai/https://www.quora.com/q"]
        );
    }

    #[test]
    fn test_from_settings_normalizes_proxy_base() {
        let config = crate::config::RuntimeConfig::from_yaml("fetch:\n  proxy_base_url: https://r.jina.ai\n").unwrap();
        let fetcher = ContentFetcher::from_settings(RecordingClient::ok(200, ""), &config.fetch);
        let target = Url::parse("https://www.quora.com/q").unwrap();
        assert_eq!(fetcher.proxy_url(&target), "https://r.jina.ai/https://www.quora.com/q");
    }

    #[tokio::test]
    async fn test_non_200_is_soft_failure() {
        let client = RecordingClient::ok(403, "Forbidden");
        let doc = fetcher(client)
            .fetch(&descriptor("https://example.com/blocked", FetchStrategy::Direct))
            .await;

        assert!(!doc.fetch_succeeded);
        assert_eq!(doc.extracted_text, "Cannot get the content of https://example.com/blocked");
        assert_eq!(doc.http_status, Some(403));
    }

    #[tokio::test]
    async fn test_transport_error_is_soft_failure() {
        let client = RecordingClient::new(Err(FetchError::Transport("dns".to_string())));
        let doc = fetcher(client)
            .fetch(&descriptor("https://example.com/", FetchStrategy::Direct))
            .await;

        assert!(!doc.fetch_succeeded);
        assert_eq!(doc.extracted_text, "Cannot get the content of https://example.com/");
        assert_eq!(doc.http_status, None);
    }

    #[tokio::test]
    async fn test_empty_page_is_soft_failure() {
        let client = RecordingClient::ok(200, "<html><script>only()</script></html>");
        let doc = fetcher(client)
            .fetch(&descriptor("https://example.com/", FetchStrategy::Direct))
            .await;
        assert!(!doc.fetch_succeeded);
    }

    #[tokio::test]
    async fn test_skip_strategy_never_requested() {
        let client = RecordingClient::ok(200, "<p>video</p>");
        let doc = fetcher(client.clone())
            .fetch(&descriptor("https://www.youtube.com/watch?v=1", FetchStrategy::SkipToNext))
            .await;
        assert!(!doc.fetch_succeeded);
        assert!(client.requested.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_evidence_truncated() {
        let client = RecordingClient::ok(200, &format!("<p>{}</p>", "é".repeat(50)));
        let fetcher = ContentFetcher::new(client, "https://r.jina.ai/", 10);
        let doc = fetcher
            .fetch(&descriptor("https://example.com/", FetchStrategy::Direct))
            .await;
        assert_eq!(doc.extracted_text.chars().count(), 10);
    }

    #[test]
    fn test_browser_client_builds() {
        assert!(BrowserClient::from_settings(&FetchSettings::default()).is_ok());

        let bad_agent = FetchSettings {
            user_agent: Some("bad\nagent".to_string()),
            ..FetchSettings::default()
        };
        assert!(matches!(
            BrowserClient::from_settings(&bad_agent),
            Err(FetchError::Client(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_fetch_never_fails(
            status in prop::sample::select(vec![200u16, 204, 301, 403, 404, 429, 500, 503]),
            body in ".{0,200}",
            proxied in any::<bool>(),
            errored in any::<bool>(),
        ) {
            let response = if errored {
                Err(FetchError::Transport("boom".to_string()))
            } else {
                Ok(PageResponse { status, body })
            };
            let strategy = if proxied { FetchStrategy::ProxyReader } else { FetchStrategy::Direct };
            let target = descriptor("https://example.com/page", strategy);

            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let doc = runtime.block_on(fetcher(RecordingClient::new(response)).fetch(&target));

            prop_assert_eq!(&doc.url, &target.url);
            if doc.fetch_succeeded {
                prop_assert!(!doc.extracted_text.is_empty());
                prop_assert_eq!(doc.http_status, Some(200));
            } else {
                prop_assert_eq!(
                    doc.extracted_text,
                    "Cannot get the content of https://example.com/page"
                );
            }
        }
    }
}
