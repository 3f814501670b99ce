//! HTTP client for the catalogue origin with rate limiting and cancellation.
//!
//! Wraps `reqwest` with the origin rate limiter and classifies responses the
//! way the rest of the pipeline expects: not-found is a non-fatal signal,
//! other non-success statuses carry a body snippet for diagnosis.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{
    Client, StatusCode,
    header::{HeaderMap, HeaderValue, LAST_MODIFIED, USER_AGENT},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::entities::Page;
use crate::infrastructure::rate_limiter::{RateLimitError, RateLimiter};

/// HTTP client configuration for crawling the catalogue origin.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HttpClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
    /// Requests allowed per rolling window.
    pub rate_capacity: usize,
    /// Rolling window length in milliseconds.
    pub rate_window_ms: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://scaruffi.com".to_string(),
            user_agent: "tonearm/0.2 (catalogue updater)".to_string(),
            timeout_seconds: 30,
            rate_capacity: 10,
            rate_window_ms: 5_000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The origin returned 404. Non-fatal; the path is skipped.
    #[error("page not found")]
    PageNotFound,

    #[error("request failed with status {status} and body '{snippet}'")]
    BadStatus { status: StatusCode, snippet: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid page url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error(transparent)]
    Cancelled(#[from] RateLimitError),
}

impl FetchError {
    /// Whether this error stems from cancellation rather than a real failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Rate-limited fetcher producing content-addressed [`Page`]s.
pub struct PageClient {
    client: Client,
    limiter: RateLimiter,
    base_url: url::Url,
}

impl PageClient {
    pub fn new(config: &HttpClientConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_str(&config.user_agent)?);

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self {
            client,
            limiter: RateLimiter::new(
                config.rate_capacity,
                Duration::from_millis(config.rate_window_ms),
            ),
            base_url: url::Url::parse(&config.base_url)?,
        })
    }

    /// Fetches `path` under the origin, hashing the raw body.
    ///
    /// Acquires the limiter first; no retry happens at this level.
    pub async fn fetch_page(
        &self,
        cancel: &CancellationToken,
        path: &str,
    ) -> Result<Page, FetchError> {
        self.limiter.acquire(cancel).await?;

        let url = self.base_url.join(path.trim_start_matches('/'))?;
        debug!("fetching page: {}", url);

        let response = tokio::select! {
            result = self.client.get(url).send() => result?,
            () = cancel.cancelled() => return Err(RateLimitError::Cancelled.into()),
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::PageNotFound);
        }
        if !(status.is_success() || status.is_redirection()) {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(256).collect();
            return Err(FetchError::BadStatus { status, snippet });
        }

        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
            .map_or_else(Utc::now, |parsed| parsed.with_timezone(&Utc));

        let bytes = tokio::select! {
            result = response.bytes() => result?,
            () = cancel.cancelled() => return Err(RateLimitError::Cancelled.into()),
        };
        let hash = blake3::hash(&bytes).to_hex().to_string();
        let body = String::from_utf8_lossy(&bytes).into_owned();

        Ok(Page {
            path: path.to_string(),
            hash,
            last_modified,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = HttpClientConfig::default();
        let client = PageClient::new(&config);
        assert!(client.is_ok());
    }

    #[test]
    fn not_found_is_distinguishable() {
        let err = FetchError::PageNotFound;
        assert!(!err.is_cancelled());
        assert!(matches!(err, FetchError::PageNotFound));
    }
}
