//! HTTP fetcher implementation
//!
//! This module handles single HTTP requests for the crawler, including:
//! - Building HTTP clients with proper user agent strings
//! - GET requests returning either text or raw bytes
//! - Error classification into timeouts, bad statuses and other failures

use crate::config::{FetchConfig, UserAgentConfig};
use reqwest::{redirect::Policy, Client};
use thiserror::Error;

/// Transport failures, surfaced as values and never raised across a stage
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Request failed for {url}: {message}")]
    Request { url: String, message: String },

    #[error("Gateway closed before {url} was submitted")]
    Closed { url: String },
}

impl FetchError {
    /// The URL the failed request was for
    pub fn url(&self) -> &str {
        match self {
            Self::Timeout { url }
            | Self::Status { url, .. }
            | Self::Request { url, .. }
            | Self::Closed { url } => url,
        }
    }
}

/// How a response body should be read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// Decoded as text (detail pages)
    Text,
    /// Kept as raw bytes (assets)
    Binary,
}

/// A response body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Text(String),
    Binary(Vec<u8>),
}

impl Body {
    /// Converts into text, replacing invalid UTF-8 in binary bodies
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    /// Converts into raw bytes
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(text) => text.into_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A successfully fetched resource, keyed by the URL it was requested under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    /// The requested URL (not the post-redirect one), so callers can match it
    pub url: String,
    pub body: Body,
}

/// Result of one fetch
pub type FetchOutcome = Result<Fetched, FetchError>;

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `user_agent` - The user agent configuration
/// * `fetch` - Timeouts and pool sizing
///
/// # Example
///
/// ```no_run
/// use menagerie::config::{FetchConfig, UserAgentConfig};
/// use menagerie::crawler::build_http_client;
///
/// let client = build_http_client(&UserAgentConfig::default(), &FetchConfig::default()).unwrap();
/// ```
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    fetch: &FetchConfig,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent.header_value())
        .timeout(fetch.timeout())
        .connect_timeout(fetch.connect_timeout())
        .redirect(Policy::limited(10))
        .pool_max_idle_per_host(fetch.max_connections)
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches a URL and classifies the outcome
///
/// | Condition | Result |
/// |-----------|--------|
/// | 2xx | `Ok(Fetched)` with the body read per `kind` |
/// | Other status | `FetchError::Status` |
/// | Client timeout | `FetchError::Timeout` |
/// | Anything else | `FetchError::Request` with the error message |
pub async fn fetch_url(client: &Client, url: &str, kind: BodyKind) -> FetchOutcome {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| classify(url, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let body = match kind {
        BodyKind::Text => Body::Text(response.text().await.map_err(|e| classify(url, e))?),
        BodyKind::Binary => {
            Body::Binary(response.bytes().await.map_err(|e| classify(url, e))?.to_vec())
        }
    };

    Ok(Fetched {
        url: url.to_string(),
        body,
    })
}

fn classify(url: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Request {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}
