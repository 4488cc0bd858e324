//! Data sources and the dataset catalogue.
//!
//! Every raw artifact is identified by a [`DatasetKey`]: a [`Dataset`] plus an
//! optional qualifier for datasets fetched once per protocol, chain, token, etc.
//! The key's file stem is what the raw store puts in file names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the three upstream REST APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    CoinGecko,
    DefiLlama,
    DexScreener,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::CoinGecko, Source::DefiLlama, Source::DexScreener];

    /// Directory name under the raw-data root.
    pub fn slug(self) -> &'static str {
        match self {
            Source::CoinGecko => "coingecko",
            Source::DefiLlama => "defillama",
            Source::DexScreener => "dexscreener",
        }
    }

    /// Datasets this source provides.
    pub fn datasets(self) -> &'static [Dataset] {
        match self {
            Source::CoinGecko => &[
                Dataset::Global,
                Dataset::DefiGlobal,
                Dataset::Categories,
                Dataset::Markets,
                Dataset::TokenHistory,
                Dataset::Trending,
            ],
            Source::DefiLlama => &[
                Dataset::Protocols,
                Dataset::ProtocolTvl,
                Dataset::Chains,
                Dataset::Stablecoins,
                Dataset::Bridges,
                Dataset::Yields,
            ],
            Source::DexScreener => &[Dataset::Pairs, Dataset::TokenPairs],
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "coingecko" => Ok(Source::CoinGecko),
            "defillama" => Ok(Source::DefiLlama),
            "dexscreener" => Ok(Source::DexScreener),
            other => Err(format!(
                "unknown source '{other}' (valid: coingecko, defillama, dexscreener)"
            )),
        }
    }
}

/// A kind of raw payload fetched from a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    // CoinGecko
    Global,
    DefiGlobal,
    Categories,
    Markets,
    TokenHistory,
    Trending,
    // DeFiLlama
    Protocols,
    ProtocolTvl,
    Chains,
    Stablecoins,
    Bridges,
    Yields,
    // DexScreener
    Pairs,
    TokenPairs,
}

impl Dataset {
    pub fn source(self) -> Source {
        match self {
            Dataset::Global
            | Dataset::DefiGlobal
            | Dataset::Categories
            | Dataset::Markets
            | Dataset::TokenHistory
            | Dataset::Trending => Source::CoinGecko,
            Dataset::Protocols
            | Dataset::ProtocolTvl
            | Dataset::Chains
            | Dataset::Stablecoins
            | Dataset::Bridges
            | Dataset::Yields => Source::DefiLlama,
            Dataset::Pairs | Dataset::TokenPairs => Source::DexScreener,
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Dataset::Global => "global",
            Dataset::DefiGlobal => "defi_global",
            Dataset::Categories => "categories",
            Dataset::Markets => "markets",
            Dataset::TokenHistory => "token_history",
            Dataset::Trending => "trending",
            Dataset::Protocols => "protocols",
            Dataset::ProtocolTvl => "protocol_tvl",
            Dataset::Chains => "chains",
            Dataset::Stablecoins => "stablecoins",
            Dataset::Bridges => "bridges",
            Dataset::Yields => "yields",
            Dataset::Pairs => "pairs",
            Dataset::TokenPairs => "token_pairs",
        }
    }

    /// Whether this dataset is fetched once per qualifier (slug, chain, token).
    pub fn is_qualified(self) -> bool {
        matches!(
            self,
            Dataset::TokenHistory | Dataset::ProtocolTvl | Dataset::Pairs | Dataset::TokenPairs
        )
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Source::ALL
            .iter()
            .flat_map(|s| s.datasets().iter().copied())
            .find(|d| d.slug() == slug)
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Separator between dataset slug and qualifier in file stems.
pub const QUALIFIER_SEP: char = '@';

/// Identity of one raw artifact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DatasetKey {
    pub dataset: Dataset,
    pub qualifier: Option<String>,
}

impl DatasetKey {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            dataset,
            qualifier: None,
        }
    }

    pub fn qualified(dataset: Dataset, qualifier: impl Into<String>) -> Self {
        Self {
            dataset,
            qualifier: Some(qualifier.into()),
        }
    }

    pub fn source(&self) -> Source {
        self.dataset.source()
    }

    /// File-name stem: `markets`, `protocol_tvl@uniswap`.
    ///
    /// Qualifiers are lower-cased and anything outside `[a-z0-9._-]` becomes `-`.
    pub fn file_stem(&self) -> String {
        match &self.qualifier {
            None => self.dataset.slug().to_string(),
            Some(q) => format!(
                "{}{QUALIFIER_SEP}{}",
                self.dataset.slug(),
                sanitize_qualifier(q)
            ),
        }
    }

    /// Parse a stem produced by [`DatasetKey::file_stem`].
    pub fn parse_stem(stem: &str) -> Option<Self> {
        match stem.split_once(QUALIFIER_SEP) {
            Some((slug, qualifier)) if !qualifier.is_empty() => {
                let dataset = Dataset::from_slug(slug)?;
                dataset
                    .is_qualified()
                    .then(|| Self::qualified(dataset, qualifier))
            }
            Some(_) => None,
            None => {
                let dataset = Dataset::from_slug(stem)?;
                (!dataset.is_qualified()).then(|| Self::new(dataset))
            }
        }
    }
}

impl fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source(), self.file_stem())
    }
}

fn sanitize_qualifier(q: &str) -> String {
    q.trim()
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_dataset_belongs_to_its_source() {
        for source in Source::ALL {
            for dataset in source.datasets() {
                assert_eq!(dataset.source(), source);
            }
        }
    }

    #[test]
    fn stems_roundtrip() {
        let plain = DatasetKey::new(Dataset::Markets);
        assert_eq!(plain.file_stem(), "markets");
        assert_eq!(DatasetKey::parse_stem("markets"), Some(plain));

        let slug = DatasetKey::qualified(Dataset::ProtocolTvl, "uniswap");
        assert_eq!(slug.file_stem(), "protocol_tvl@uniswap");
        assert_eq!(DatasetKey::parse_stem("protocol_tvl@uniswap"), Some(slug));
    }

    #[test]
    fn qualifier_is_sanitized() {
        let key = DatasetKey::qualified(Dataset::TokenPairs, "So1111/abc DEF");
        assert_eq!(key.file_stem(), "token_pairs@so1111-abc-def");
    }

    #[test]
    fn parse_rejects_mismatched_qualification() {
        assert_eq!(DatasetKey::parse_stem("markets@page2"), None);
        assert_eq!(DatasetKey::parse_stem("protocol_tvl"), None);
        assert_eq!(DatasetKey::parse_stem("protocol_tvl@"), None);
        assert_eq!(DatasetKey::parse_stem("nonsense"), None);
    }

    #[test]
    fn source_parses_case_insensitively() {
        assert_eq!("CoinGecko".parse::<Source>(), Ok(Source::CoinGecko));
        assert!("binance".parse::<Source>().is_err());
    }
}
