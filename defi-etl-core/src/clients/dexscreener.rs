//! DexScreener REST client.

use crate::http::{ApiClient, FetchError};
use serde_json::Value;

pub const BASE_URL: &str = "https://api.dexscreener.com";

#[derive(Debug)]
pub struct DexScreenerClient {
    http: ApiClient,
}

impl DexScreenerClient {
    pub fn new(http: ApiClient) -> Self {
        Self { http }
    }

    pub fn http(&self) -> &ApiClient {
        &self.http
    }

    /// Pairs matching a chain name via the search endpoint.
    pub fn search_pairs(&self, query: &str) -> Result<Value, FetchError> {
        self.http
            .get_json("/latest/dex/search", &[("q", query.to_string())])
    }

    /// All pairs that trade a given token address.
    pub fn token_pairs(&self, token_address: &str) -> Result<Value, FetchError> {
        self.http
            .get_json(&format!("/latest/dex/tokens/{token_address}"), &[])
    }
}
