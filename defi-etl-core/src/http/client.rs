//! Rate-limited, retrying, circuit-broken JSON client for one source.

use super::{with_retry, ApiRequest, CircuitBreaker, FetchError, RateLimiter, RetryPolicy, Transport};
use crate::source::Source;
use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Shared HTTP plumbing behind every source client.
///
/// Each attempt first checks the circuit breaker, then waits on the rate
/// limiter, then calls the transport. Transient failures count against the
/// breaker; fatal ones do not, since a 404 says nothing about the API's health.
pub struct ApiClient {
    api: Source,
    base_url: String,
    headers: Vec<(String, String)>,
    transport: Arc<dyn Transport>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("api", &self.api)
            .field("base_url", &self.base_url)
            .field("min_interval", &self.limiter.min_interval())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(api: Source, base_url: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            api,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            headers: Vec::new(),
            transport,
            limiter: RateLimiter::unlimited(),
            retry: RetryPolicy::default(),
            breaker: Arc::new(CircuitBreaker::default_source()),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.limiter = RateLimiter::new(min_interval);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn api(&self) -> Source {
        self.api
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Error to report when the breaker refuses a call.
    pub fn circuit_open_error(&self) -> FetchError {
        FetchError::CircuitOpen {
            api: self.api,
            remaining_secs: self.breaker.remaining_cooldown().as_secs(),
        }
    }

    /// Build `{base_url}/{path}?{query}`.
    pub fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url, FetchError> {
        let raw = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        build_url(&raw, query)
    }

    /// GET a path relative to the base URL.
    pub fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, FetchError> {
        let url = self.url(path, query)?;
        self.fetch(url)
    }

    /// GET an absolute URL (for sources split across several hosts).
    pub fn get_json_absolute(&self, url: &str, query: &[(&str, String)]) -> Result<Value, FetchError> {
        let url = build_url(url, query)?;
        self.fetch(url)
    }

    fn fetch(&self, url: Url) -> Result<Value, FetchError> {
        let request = ApiRequest {
            url,
            headers: self.headers.clone(),
        };
        with_retry(&self.retry, |attempt| {
            if !self.breaker.is_allowed() {
                return Err(self.circuit_open_error());
            }
            self.limiter.wait();
            debug!(api = %self.api, url = %request.url, attempt, "GET");
            match self.transport.get_json(&request) {
                Ok(value) => {
                    self.breaker.record_success();
                    Ok(value)
                }
                Err(err) => {
                    if err.is_retryable() {
                        self.breaker.record_failure();
                    }
                    Err(err)
                }
            }
        })
    }
}

fn build_url(raw: &str, query: &[(&str, String)]) -> Result<Url, FetchError> {
    let mut url = Url::parse(raw).map_err(|e| FetchError::fatal(raw, format!("malformed URL: {e}")))?;
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in query {
            pairs.append_pair(key, value);
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Scripted {
        responses: Mutex<VecDeque<Result<Value, FetchError>>>,
        seen: Mutex<Vec<ApiRequest>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<Value, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl Transport for Scripted {
        fn get_json(&self, request: &ApiRequest) -> Result<Value, FetchError> {
            self.seen.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::fatal(request.url.as_str(), "script exhausted")))
        }
    }

    fn client(transport: Arc<Scripted>) -> ApiClient {
        ApiClient::new(Source::CoinGecko, "https://api.example.com/api/v3/", transport)
            .with_retry_policy(RetryPolicy::immediate(3))
    }

    #[test]
    fn url_keeps_base_path_and_encodes_query() {
        let c = client(Scripted::new(vec![]));
        let url = c
            .url("/coins/markets", &[("vs_currency", "usd".into()), ("price_change_percentage", "1h,24h".into())])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/api/v3/coins/markets?vs_currency=usd&price_change_percentage=1h%2C24h"
        );
    }

    #[test]
    fn malformed_url_is_fatal() {
        let c = ApiClient::new(Source::DefiLlama, "not a url", Scripted::new(vec![]));
        let err = c.get_json("/protocols", &[]).unwrap_err();
        assert!(matches!(err, FetchError::Fatal { .. }));
    }

    #[test]
    fn headers_are_sent() {
        let t = Scripted::new(vec![Ok(json!({"ok": true}))]);
        let c = client(t.clone()).with_header("x-cg-demo-api-key", "k");
        c.get_json("/global", &[]).unwrap();
        let seen = t.seen.lock().unwrap();
        assert_eq!(seen[0].headers, vec![("x-cg-demo-api-key".to_string(), "k".to_string())]);
    }

    #[test]
    fn transient_then_success() {
        let t = Scripted::new(vec![
            Err(FetchError::transient("u", "HTTP 503")),
            Ok(json!([1, 2])),
        ]);
        let c = client(t.clone());
        assert_eq!(c.get_json("/x", &[]).unwrap(), json!([1, 2]));
        assert_eq!(t.seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn breaker_opens_and_fails_fast() {
        let t = Scripted::new(vec![
            Err(FetchError::transient("u", "HTTP 429")),
            Err(FetchError::transient("u", "HTTP 429")),
            Err(FetchError::transient("u", "HTTP 429")),
        ]);
        let c = client(t.clone()).with_breaker(Arc::new(CircuitBreaker::new(2, Duration::from_secs(60))));
        let err = c.get_json("/x", &[]).unwrap_err();
        assert!(matches!(err, FetchError::CircuitOpen { api: Source::CoinGecko, .. }));
        assert_eq!(t.seen.lock().unwrap().len(), 2);

        let err = c.get_json("/y", &[]).unwrap_err();
        assert!(matches!(err, FetchError::CircuitOpen { .. }));
        assert_eq!(t.seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn fatal_errors_do_not_count_against_breaker() {
        let t = Scripted::new(vec![
            Err(FetchError::fatal("u", "HTTP 404")),
            Err(FetchError::fatal("u", "HTTP 404")),
            Ok(json!({})),
        ]);
        let c = client(t).with_breaker(Arc::new(CircuitBreaker::new(1, Duration::from_secs(60))));
        assert!(c.get_json("/a", &[]).is_err());
        assert!(c.get_json("/b", &[]).is_err());
        assert!(c.breaker().is_allowed());
        assert!(c.get_json("/c", &[]).is_ok());
    }
}
