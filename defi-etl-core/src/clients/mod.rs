//! Thin per-source wrappers over [`ApiClient`](crate::http::ApiClient).
//!
//! Each method maps one upstream endpoint to a JSON value. Parsing and
//! validation happen later in [`crate::normalize`].

pub mod coingecko;
pub mod defillama;
pub mod dexscreener;

pub use coingecko::{ApiTier, CoinGeckoClient};
pub use defillama::DefiLlamaClient;
pub use dexscreener::DexScreenerClient;
