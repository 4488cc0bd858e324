//! Blocking reqwest transport.

use super::{classify_status, ApiRequest, FetchError, Transport};
use reqwest::blocking::Client;
use reqwest::header::RETRY_AFTER;
use serde_json::Value;
use std::time::Duration;

/// Longest slice of an error body kept in the error message.
const BODY_HINT_CHARS: usize = 200;

/// [`Transport`] backed by `reqwest::blocking` with a per-call timeout.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::fatal("<client>", format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn get_json(&self, request: &ApiRequest) -> Result<Value, FetchError> {
        let url = request.url.as_str();
        let mut builder = self.client.get(request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().map_err(|e| classify_reqwest(url, &e))?;
        let status = response.status();

        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().unwrap_or_default();
            let hint: String = body.trim().chars().take(BODY_HINT_CHARS).collect();
            return Err(classify_status(url, status.as_u16(), &hint, retry_after));
        }

        let body = response.text().map_err(|e| classify_reqwest(url, &e))?;
        serde_json::from_str(&body)
            .map_err(|e| FetchError::fatal(url, format!("undecodable JSON body: {e}")))
    }
}

fn classify_reqwest(url: &str, err: &reqwest::Error) -> FetchError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        FetchError::transient(url, err.to_string())
    } else {
        FetchError::fatal(url, err.to_string())
    }
}
