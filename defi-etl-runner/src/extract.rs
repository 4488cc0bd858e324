//! Extraction stage: API → raw artifacts.
//!
//! One [`DatasetKey`] is one fetch (or, for `markets`, one run of pages) and
//! one raw file. Failures are isolated per key; the remaining keys still run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use defi_etl_core::clients::{ApiTier, CoinGeckoClient, DefiLlamaClient, DexScreenerClient};
use defi_etl_core::http::{ApiClient, ReqwestTransport, Transport};
use defi_etl_core::{Dataset, DatasetKey, FetchError, RawPayload, RawStore, RawStoreError, Source};

use crate::config::Settings;
use crate::report::{DatasetReport, RunStage};

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("extraction failed for {key}: {source}")]
    Fetch { key: String, source: FetchError },

    #[error("could not store {key}: {source}")]
    Store { key: String, source: RawStoreError },

    #[error("unexpected response for {key}: {reason}")]
    Shape { key: String, reason: String },

    #[error("{dataset} needs a qualifier (slug, chain, token id or address)")]
    MissingQualifier { dataset: Dataset },
}

/// The three API clients, each with its own rate limiter and circuit breaker.
#[derive(Debug)]
pub struct Clients {
    pub coingecko: CoinGeckoClient,
    pub defillama: DefiLlamaClient,
    pub dexscreener: DexScreenerClient,
}

impl Clients {
    /// Clients over a real HTTP transport.
    pub fn from_settings(settings: &Settings) -> Result<Self, FetchError> {
        let transport = ReqwestTransport::new(
            Duration::from_secs(settings.http.timeout_secs),
            &settings.http.user_agent,
        )?;
        Ok(Self::with_transport(settings, Arc::new(transport)))
    }

    pub fn with_transport(settings: &Settings, transport: Arc<dyn Transport>) -> Self {
        let build = |api: Source, base_url: &str, min_interval_ms: u64| {
            ApiClient::new(api, base_url, Arc::clone(&transport))
                .with_min_interval(Duration::from_millis(min_interval_ms))
                .with_retry_policy(settings.retry.policy())
                .with_breaker(Arc::new(settings.breaker.breaker()))
        };

        let cg = &settings.coingecko;
        let mut cg_http = build(Source::CoinGecko, cg.base_url(), cg.min_interval_ms);
        match &cg.api_key {
            Some(key) => cg_http = cg_http.with_header(cg.tier.key_header(), key.clone()),
            None if cg.tier != ApiTier::Demo => {
                warn!(tier = %cg.tier, "CoinGecko paid tier selected without an API key");
            }
            None => {}
        }

        let dl = &settings.defillama;
        let dx = &settings.dexscreener;
        Self {
            coingecko: CoinGeckoClient::new(cg_http, cg.vs_currency.clone()),
            defillama: DefiLlamaClient::new(build(Source::DefiLlama, &dl.base_url, dl.min_interval_ms))
                .with_side_urls(&dl.stablecoins_url, &dl.bridges_url, &dl.yields_url),
            dexscreener: DexScreenerClient::new(build(Source::DexScreener, &dx.base_url, dx.min_interval_ms)),
        }
    }

    pub fn http(&self, source: Source) -> &ApiClient {
        match source {
            Source::CoinGecko => self.coingecko.http(),
            Source::DefiLlama => self.defillama.http(),
            Source::DexScreener => self.dexscreener.http(),
        }
    }
}

/// Expand datasets into keys, one per configured qualifier for qualified
/// datasets. Order follows `datasets`, then qualifier order in the settings.
pub fn keys_for(settings: &Settings, datasets: &[Dataset]) -> Vec<DatasetKey> {
    let mut keys = Vec::new();
    for &dataset in datasets {
        let qualifiers: &[String] = match dataset {
            Dataset::TokenHistory => &settings.coingecko.token_ids,
            Dataset::ProtocolTvl => &settings.defillama.protocols,
            Dataset::Pairs => &settings.dexscreener.chains,
            Dataset::TokenPairs => &settings.dexscreener.token_addresses,
            _ => {
                keys.push(DatasetKey::new(dataset));
                continue;
            }
        };
        keys.extend(
            qualifiers
                .iter()
                .map(|q| DatasetKey::qualified(dataset, q.trim())),
        );
    }
    keys
}

/// Fetches datasets and writes them to the raw store.
pub struct Extractor<'a> {
    clients: &'a Clients,
    store: &'a RawStore,
    settings: &'a Settings,
}

impl<'a> Extractor<'a> {
    pub fn new(clients: &'a Clients, store: &'a RawStore, settings: &'a Settings) -> Self {
        Self {
            clients,
            store,
            settings,
        }
    }

    /// Extract every key, best-effort. One report per key, in input order.
    pub fn run(&self, keys: &[DatasetKey]) -> Vec<(DatasetKey, DatasetReport)> {
        keys.iter()
            .map(|key| {
                let name = key.to_string();
                let report = match self.extract(key) {
                    Ok(path) => DatasetReport::succeeded(RunStage::Extracting, name, path, 0, 0),
                    Err(err) => {
                        warn!(dataset = %key, error = %err, "extraction failed");
                        DatasetReport::failed(RunStage::Extracting, name, &err)
                    }
                };
                (key.clone(), report)
            })
            .collect()
    }

    /// Fetch one dataset and persist it. Returns the raw file path.
    pub fn extract(&self, key: &DatasetKey) -> Result<PathBuf, ExtractionError> {
        let http = self.clients.http(key.source());
        if !http.breaker().is_allowed() {
            return Err(ExtractionError::Fetch {
                key: key.to_string(),
                source: http.circuit_open_error(),
            });
        }

        let retrieved_at = Utc::now();
        let (endpoint, data) = self.fetch(key)?;
        let payload = RawPayload::new(key, endpoint, retrieved_at, data);
        let path = self.store.write(&payload).map_err(|source| ExtractionError::Store {
            key: key.to_string(),
            source,
        })?;
        info!(dataset = %key, path = %path.display(), "raw artifact written");
        Ok(path)
    }

    fn fetch(&self, key: &DatasetKey) -> Result<(String, Value), ExtractionError> {
        let fetch_err = |source| ExtractionError::Fetch {
            key: key.to_string(),
            source,
        };
        let qualifier = || {
            key.qualifier
                .as_deref()
                .filter(|q| !q.is_empty())
                .ok_or(ExtractionError::MissingQualifier { dataset: key.dataset })
        };
        let cg = &self.clients.coingecko;
        let dl = &self.clients.defillama;
        let dx = &self.clients.dexscreener;

        let fetched = match key.dataset {
            Dataset::Global => ("/global".to_string(), cg.global()),
            Dataset::DefiGlobal => ("/global/decentralized_finance_defi".to_string(), cg.defi_global()),
            Dataset::Categories => ("/coins/categories".to_string(), cg.categories()),
            Dataset::Markets => return self.fetch_markets(key),
            Dataset::TokenHistory => {
                let id = qualifier()?;
                (
                    format!("/coins/{id}/market_chart"),
                    cg.market_chart(id, self.settings.coingecko.history_days),
                )
            }
            Dataset::Trending => ("/search/trending".to_string(), cg.trending()),
            Dataset::Protocols => ("/protocols".to_string(), dl.protocols()),
            Dataset::ProtocolTvl => {
                let slug = qualifier()?;
                (format!("/protocol/{slug}"), dl.protocol(slug))
            }
            Dataset::Chains => ("/v2/chains".to_string(), dl.chains()),
            Dataset::Stablecoins => (self.settings.defillama.stablecoins_url.clone(), dl.stablecoins()),
            Dataset::Bridges => (self.settings.defillama.bridges_url.clone(), dl.bridges()),
            Dataset::Yields => (self.settings.defillama.yields_url.clone(), dl.yields()),
            Dataset::Pairs => {
                let chain = qualifier()?;
                (format!("/latest/dex/search?q={chain}"), dx.search_pairs(chain))
            }
            Dataset::TokenPairs => {
                let address = qualifier()?;
                (format!("/latest/dex/tokens/{address}"), dx.token_pairs(address))
            }
        };
        let (endpoint, result) = fetched;
        Ok((endpoint, result.map_err(fetch_err)?))
    }

    /// Pages 1..=N concatenated into one array. A short page ends the run early.
    fn fetch_markets(&self, key: &DatasetKey) -> Result<(String, Value), ExtractionError> {
        let cfg = &self.settings.coingecko;
        let mut coins: Vec<Value> = Vec::new();
        for page in 1..=cfg.pages {
            let value = self
                .clients
                .coingecko
                .markets(page, cfg.per_page)
                .map_err(|source| ExtractionError::Fetch {
                    key: key.to_string(),
                    source,
                })?;
            let Value::Array(items) = value else {
                return Err(ExtractionError::Shape {
                    key: key.to_string(),
                    reason: format!("markets page {page} is not an array"),
                });
            };
            let short = items.len() < cfg.per_page as usize;
            info!(page, coins = items.len(), "markets page fetched");
            coins.extend(items);
            if short {
                break;
            }
        }
        Ok(("/coins/markets".to_string(), Value::Array(coins)))
    }
}
