//! HTTP fetching of listing pages.
//!
//! A [`Fetcher`] performs exactly one attempt; retry and backoff decisions
//! belong to the engine. [`HttpFetcher`] classifies every failure into the
//! [`FetchError`] taxonomy so the engine knows whether another attempt can help.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::FetchError;

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url` once and return the decoded body.
    async fn fetch(&self, url: &Url) -> Result<String, FetchError>;
}

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// `reqwest`-backed fetcher with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("ko-KR,ko;q=0.9,en;q=0.8"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| FetchError::Permanent {
                url: String::new(),
                reason: format!("could not build HTTP client: {e}"),
            })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        let t0 = Instant::now();
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url.as_str(), &e))?;

        let status = response.status();
        if !status.is_success() {
            let err = FetchError::from_status(url.as_str(), status);
            warn!(%status, transient = err.is_transient(), "Listing fetch returned error status");
            return Err(err);
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url.as_str(), &e))?;

        debug!(
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched listing page"
        );
        Ok(body)
    }
}

#[cfg(test)]
pub use scripted::ScriptedFetcher;
