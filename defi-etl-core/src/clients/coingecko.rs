//! CoinGecko REST client.

use crate::http::{ApiClient, FetchError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub const DEMO_BASE_URL: &str = "https://api.coingecko.com/api/v3";
pub const PRO_BASE_URL: &str = "https://pro-api.coingecko.com/api/v3";

/// CoinGecko plan. Analyst keys use the pro host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiTier {
    #[default]
    Demo,
    Pro,
    Analyst,
}

impl ApiTier {
    pub fn base_url(self) -> &'static str {
        match self {
            ApiTier::Demo => DEMO_BASE_URL,
            ApiTier::Pro | ApiTier::Analyst => PRO_BASE_URL,
        }
    }

    /// Header carrying the API key for this tier.
    pub fn key_header(self) -> &'static str {
        match self {
            ApiTier::Demo => "x-cg-demo-api-key",
            ApiTier::Pro | ApiTier::Analyst => "x-cg-pro-api-key",
        }
    }
}

impl fmt::Display for ApiTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ApiTier::Demo => "demo",
            ApiTier::Pro => "pro",
            ApiTier::Analyst => "analyst",
        })
    }
}

impl FromStr for ApiTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "demo" => Ok(ApiTier::Demo),
            "pro" => Ok(ApiTier::Pro),
            "analyst" => Ok(ApiTier::Analyst),
            other => Err(format!("unknown CoinGecko tier '{other}' (valid: demo, pro, analyst)")),
        }
    }
}

#[derive(Debug)]
pub struct CoinGeckoClient {
    http: ApiClient,
    vs_currency: String,
}

impl CoinGeckoClient {
    pub fn new(http: ApiClient, vs_currency: impl Into<String>) -> Self {
        Self {
            http,
            vs_currency: vs_currency.into(),
        }
    }

    pub fn http(&self) -> &ApiClient {
        &self.http
    }

    pub fn global(&self) -> Result<Value, FetchError> {
        self.http.get_json("/global", &[])
    }

    pub fn defi_global(&self) -> Result<Value, FetchError> {
        self.http.get_json("/global/decentralized_finance_defi", &[])
    }

    pub fn categories(&self) -> Result<Value, FetchError> {
        self.http.get_json("/coins/categories", &[])
    }

    /// One page of `/coins/markets`, ordered by market cap.
    pub fn markets(&self, page: u32, per_page: u32) -> Result<Value, FetchError> {
        self.http.get_json(
            "/coins/markets",
            &[
                ("vs_currency", self.vs_currency.clone()),
                ("order", "market_cap_desc".to_string()),
                ("per_page", per_page.to_string()),
                ("page", page.to_string()),
                ("sparkline", "false".to_string()),
                ("price_change_percentage", "1h,24h,7d".to_string()),
                ("locale", "en".to_string()),
            ],
        )
    }

    /// Daily price/market-cap/volume series for one coin.
    pub fn market_chart(&self, coin_id: &str, days: u32) -> Result<Value, FetchError> {
        self.http.get_json(
            &format!("/coins/{coin_id}/market_chart"),
            &[
                ("vs_currency", self.vs_currency.clone()),
                ("days", days.to_string()),
            ],
        )
    }

    pub fn trending(&self) -> Result<Value, FetchError> {
        self.http.get_json("/search/trending", &[])
    }
}
