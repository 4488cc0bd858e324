//! HTTP layer shared by all API clients.
//!
//! The [`Transport`] trait performs exactly one GET and classifies the outcome
//! as success, transient failure, or fatal failure. Everything else (rate
//! limiting, retry with backoff, circuit breaking) lives in [`ApiClient`] so it
//! applies uniformly to every endpoint. Tests swap the transport for a scripted
//! one instead of touching the network.

pub mod circuit_breaker;
pub mod client;
pub mod rate_limit;
pub mod retry;
pub mod transport;

use std::time::Duration;
use thiserror::Error;

pub use circuit_breaker::CircuitBreaker;
pub use client::ApiClient;
pub use rate_limit::RateLimiter;
pub use retry::{with_retry, RetryPolicy};
pub use transport::ReqwestTransport;

/// A fully built GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub url: reqwest::Url,
    pub headers: Vec<(String, String)>,
}

/// Failure of a single fetch.
///
/// `Transient` failures are retried by [`with_retry`]; everything else aborts
/// the dataset immediately.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("transient fetch error for {url}: {reason}")]
    Transient {
        url: String,
        reason: String,
        /// Server-requested wait (HTTP 429 `Retry-After`).
        retry_after: Option<Duration>,
    },

    #[error("fatal fetch error for {url}: {reason}")]
    Fatal { url: String, reason: String },

    #[error("hard stop: {api} circuit breaker is open ({remaining_secs}s cooldown left)")]
    CircuitOpen {
        api: crate::source::Source,
        remaining_secs: u64,
    },
}

impl FetchError {
    pub fn transient(url: impl Into<String>, reason: impl Into<String>) -> Self {
        FetchError::Transient {
            url: url.into(),
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn fatal(url: impl Into<String>, reason: impl Into<String>) -> Self {
        FetchError::Fatal {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }
}

/// Classify an HTTP status that is not a success.
///
/// 408, 429 and 5xx are transient; every other 4xx is fatal.
pub fn classify_status(
    url: &str,
    status: u16,
    body_hint: &str,
    retry_after: Option<Duration>,
) -> FetchError {
    let reason = if body_hint.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body_hint}")
    };
    match status {
        408 | 429 | 500..=599 => FetchError::Transient {
            url: url.to_string(),
            reason,
            retry_after,
        },
        _ => FetchError::fatal(url, reason),
    }
}

/// Trait for a single-shot JSON GET.
///
/// Implementations must not retry or sleep; [`ApiClient`] does that.
pub trait Transport: Send + Sync {
    fn get_json(&self, request: &ApiRequest) -> Result<serde_json::Value, FetchError>;
}
