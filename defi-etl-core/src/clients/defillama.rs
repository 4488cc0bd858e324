//! DeFiLlama REST client. TVL lives on the main host; stablecoins, bridges and
//! yields each have their own.

use crate::http::{ApiClient, FetchError};
use serde_json::Value;

pub const BASE_URL: &str = "https://api.llama.fi";
pub const STABLECOINS_URL: &str = "https://stablecoins.llama.fi/stablecoins";
pub const BRIDGES_URL: &str = "https://bridges.llama.fi/bridges";
pub const YIELDS_URL: &str = "https://yields.llama.fi/pools";

#[derive(Debug)]
pub struct DefiLlamaClient {
    http: ApiClient,
    stablecoins_url: String,
    bridges_url: String,
    yields_url: String,
}

impl DefiLlamaClient {
    pub fn new(http: ApiClient) -> Self {
        Self {
            http,
            stablecoins_url: STABLECOINS_URL.to_string(),
            bridges_url: BRIDGES_URL.to_string(),
            yields_url: YIELDS_URL.to_string(),
        }
    }

    /// Override the side hosts (stablecoins, bridges, yields).
    pub fn with_side_urls(
        mut self,
        stablecoins: impl Into<String>,
        bridges: impl Into<String>,
        yields: impl Into<String>,
    ) -> Self {
        self.stablecoins_url = stablecoins.into();
        self.bridges_url = bridges.into();
        self.yields_url = yields.into();
        self
    }

    pub fn http(&self) -> &ApiClient {
        &self.http
    }

    /// Overview of every tracked protocol.
    pub fn protocols(&self) -> Result<Value, FetchError> {
        self.http.get_json("/protocols", &[])
    }

    /// Full history for one protocol, including per-chain TVL series.
    pub fn protocol(&self, slug: &str) -> Result<Value, FetchError> {
        self.http.get_json(&format!("/protocol/{slug}"), &[])
    }

    pub fn chains(&self) -> Result<Value, FetchError> {
        self.http.get_json("/v2/chains", &[])
    }

    pub fn stablecoins(&self) -> Result<Value, FetchError> {
        self.http
            .get_json_absolute(&self.stablecoins_url, &[("includePrices", "true".to_string())])
    }

    pub fn bridges(&self) -> Result<Value, FetchError> {
        self.http.get_json_absolute(&self.bridges_url, &[])
    }

    pub fn yields(&self) -> Result<Value, FetchError> {
        self.http.get_json_absolute(&self.yields_url, &[])
    }
}
