//! Pipeline settings.
//!
//! Loaded from a TOML file (every section and field optional), overlaid with
//! environment variables, then validated. The resulting [`Settings`] value is
//! passed explicitly to every stage.

use defi_etl_core::clients::{coingecko, defillama, dexscreener, ApiTier};
use defi_etl_core::http::{CircuitBreaker, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Settings file read when no path is given and the file exists.
pub const DEFAULT_SETTINGS_PATH: &str = "config/settings.toml";

/// Environment variables read by [`Settings::apply_env`].
pub const ENV_API_KEY: &str = "COINGECKO_API_KEY";
pub const ENV_API_TIER: &str = "COINGECKO_API_TIER";
pub const ENV_DATA_DIR: &str = "DEFI_ETL_DATA_DIR";
pub const ENV_VS_CURRENCY: &str = "VS_CURRENCY";
pub const ENV_PER_PAGE: &str = "COINGECKO_PER_PAGE";
pub const ENV_TOKEN_IDS: &str = "TOKEN_IDS_FOR_HISTORY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read settings file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid settings TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: String, reason: String },
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub paths: PathSettings,
    pub http: HttpSettings,
    pub retry: RetrySettings,
    pub breaker: BreakerSettings,
    pub coingecko: CoinGeckoSettings,
    pub defillama: DefiLlamaSettings,
    pub dexscreener: DexScreenerSettings,
    pub export: ExportSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathSettings {
    pub raw_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub export_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("data/raw"),
            processed_dir: PathBuf::from("data/processed"),
            export_dir: PathBuf::from("dashboards/tableau"),
        }
    }
}

impl PathSettings {
    /// All three directories under one data root.
    pub fn rebased(root: &Path) -> Self {
        Self {
            raw_dir: root.join("raw"),
            processed_dir: root.join("processed"),
            export_dir: root.join("tableau"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpSettings {
    /// Per-request timeout.
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: format!("defi-etl/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerSettings {
    /// Consecutive transient failures that open a source's breaker.
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 8,
            cooldown_secs: 900,
        }
    }
}

impl BreakerSettings {
    pub fn breaker(&self) -> CircuitBreaker {
        CircuitBreaker::new(self.failure_threshold, Duration::from_secs(self.cooldown_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoinGeckoSettings {
    pub tier: ApiTier,
    /// Usually supplied through `COINGECKO_API_KEY` rather than the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Overrides the tier's host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub vs_currency: String,
    pub per_page: u32,
    pub pages: u32,
    /// Coins fetched by `token_history`.
    pub token_ids: Vec<String>,
    pub history_days: u32,
    pub min_interval_ms: u64,
}

impl Default for CoinGeckoSettings {
    fn default() -> Self {
        Self {
            tier: ApiTier::Demo,
            api_key: None,
            base_url: None,
            vs_currency: "usd".to_string(),
            per_page: 200,
            pages: 1,
            token_ids: strings(&["bitcoin", "ethereum", "solana"]),
            history_days: 30,
            min_interval_ms: 2_000,
        }
    }
}

impl CoinGeckoSettings {
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(self.tier.base_url())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DefiLlamaSettings {
    pub base_url: String,
    pub stablecoins_url: String,
    pub bridges_url: String,
    pub yields_url: String,
    /// Protocol slugs fetched by `protocol_tvl`.
    pub protocols: Vec<String>,
    pub min_interval_ms: u64,
}

impl Default for DefiLlamaSettings {
    fn default() -> Self {
        Self {
            base_url: defillama::BASE_URL.to_string(),
            stablecoins_url: defillama::STABLECOINS_URL.to_string(),
            bridges_url: defillama::BRIDGES_URL.to_string(),
            yields_url: defillama::YIELDS_URL.to_string(),
            protocols: strings(&["uniswap", "aave", "compound", "makerdao", "curve"]),
            min_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DexScreenerSettings {
    pub base_url: String,
    /// Search queries for `pairs`.
    pub chains: Vec<String>,
    /// Token addresses for `token_pairs`.
    pub token_addresses: Vec<String>,
    pub min_interval_ms: u64,
}

impl Default for DexScreenerSettings {
    fn default() -> Self {
        Self {
            base_url: dexscreener::BASE_URL.to_string(),
            chains: strings(&["ethereum", "bsc", "solana", "polygon", "arbitrum"]),
            token_addresses: strings(&[
                // WBTC, WBNB, WETH (BSC), WSOL
                "0x2260fac5e5542a773aa44fbcfedf7c193bc2c599",
                "0xbb4cdb9cbd36b01bd1cbaef2af08854d3d3d31f5",
                "0x2170ed0880ac9a755fd29b2688956bd959f933f8",
                "So11111111111111111111111111111111111111112",
            ]),
            min_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportSettings {
    pub markets_top_n: usize,
    pub tvl_window_days: u32,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            markets_top_n: 100,
            tvl_window_days: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    /// `tracing_subscriber` filter directive used when no env filter is set.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate settings from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Settings for a CLI invocation: `path` if given, else
    /// [`DEFAULT_SETTINGS_PATH`] if present, else defaults; then the
    /// process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_SETTINGS_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_SETTINGS_PATH))?
            }
            None => Self::default(),
        };
        settings.apply_env(|name| std::env::var(name).ok())?;
        Ok(settings)
    }

    /// Overlay environment variables looked up through `lookup`, then revalidate.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = lookup(ENV_API_KEY) {
            self.coingecko.api_key = Some(key.trim().to_string());
        }
        if let Some(tier) = lookup(ENV_API_TIER) {
            self.coingecko.tier = tier.parse().map_err(|e: String| invalid(ENV_API_TIER, e))?;
        }
        if let Some(currency) = lookup(ENV_VS_CURRENCY) {
            self.coingecko.vs_currency = currency.trim().to_ascii_lowercase();
        }
        if let Some(per_page) = lookup(ENV_PER_PAGE) {
            self.coingecko.per_page = per_page
                .trim()
                .parse()
                .map_err(|e| invalid(ENV_PER_PAGE, format!("{e}")))?;
        }
        if let Some(ids) = lookup(ENV_TOKEN_IDS) {
            self.coingecko.token_ids = split_list(&ids);
        }
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.paths = PathSettings::rebased(Path::new(dir.trim()));
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.timeout_secs == 0 {
            return Err(invalid("http.timeout_secs", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(invalid("retry.base_delay_ms", "must not exceed retry.max_delay_ms"));
        }
        if !(1..=250).contains(&self.coingecko.per_page) {
            return Err(invalid("coingecko.per_page", "must be between 1 and 250"));
        }
        if self.coingecko.pages == 0 {
            return Err(invalid("coingecko.pages", "must be at least 1"));
        }
        if self.coingecko.history_days == 0 {
            return Err(invalid("coingecko.history_days", "must be at least 1"));
        }
        if self.coingecko.vs_currency.trim().is_empty() {
            return Err(invalid("coingecko.vs_currency", "must not be empty"));
        }
        if self.export.markets_top_n == 0 {
            return Err(invalid("export.markets_top_n", "must be at least 1"));
        }
        if self.export.tvl_window_days == 0 {
            return Err(invalid("export.tvl_window_days", "must be at least 1"));
        }
        for (key, url) in [
            ("coingecko.base_url", self.coingecko.base_url()),
            ("defillama.base_url", self.defillama.base_url.as_str()),
            ("defillama.stablecoins_url", self.defillama.stablecoins_url.as_str()),
            ("defillama.bridges_url", self.defillama.bridges_url.as_str()),
            ("defillama.yields_url", self.defillama.yields_url.as_str()),
            ("dexscreener.base_url", self.dexscreener.base_url.as_str()),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid(key, format!("'{url}' is not an http(s) URL")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn shipped_settings_file_matches_defaults() {
        let shipped = Settings::from_toml(include_str!("../../config/settings.toml")).unwrap();
        assert_eq!(shipped, Settings::default());
    }

    #[test]
    fn empty_file_gives_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.coingecko.base_url(), coingecko::DEMO_BASE_URL);
        assert_eq!(settings.export.markets_top_n, 100);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let settings = Settings::from_toml(
            r#"
[coingecko]
pages = 3
token_ids = ["bitcoin"]

[export]
tvl_window_days = 7
"#,
        )
        .unwrap();
        assert_eq!(settings.coingecko.pages, 3);
        assert_eq!(settings.coingecko.per_page, 200);
        assert_eq!(settings.coingecko.token_ids, vec!["bitcoin"]);
        assert_eq!(settings.export.tvl_window_days, 7);
        assert_eq!(settings.export.markets_top_n, 100);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            Settings::from_toml("[coingecko]\npage = 2\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn validation_errors_name_the_key() {
        let err = Settings::from_toml("[coingecko]\nper_page = 500\n").unwrap_err();
        assert!(err.to_string().contains("coingecko.per_page"), "{err}");
        let err = Settings::from_toml("[dexscreener]\nbase_url = \"ftp://x\"\n").unwrap_err();
        assert!(err.to_string().contains("dexscreener.base_url"), "{err}");
    }

    #[test]
    fn env_overlay() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[
                (ENV_API_KEY, " secret "),
                (ENV_API_TIER, "Pro"),
                (ENV_DATA_DIR, "/tmp/etl"),
                (ENV_TOKEN_IDS, "bitcoin, ethereum,"),
            ]))
            .unwrap();
        assert_eq!(settings.coingecko.api_key.as_deref(), Some("secret"));
        assert_eq!(settings.coingecko.tier, ApiTier::Pro);
        assert_eq!(settings.coingecko.base_url(), coingecko::PRO_BASE_URL);
        assert_eq!(settings.paths.raw_dir, PathBuf::from("/tmp/etl/raw"));
        assert_eq!(settings.paths.export_dir, PathBuf::from("/tmp/etl/tableau"));
        assert_eq!(settings.coingecko.token_ids, vec!["bitcoin", "ethereum"]);
    }

    #[test]
    fn bad_env_values_fail() {
        let mut settings = Settings::default();
        assert!(settings.apply_env(env(&[(ENV_API_TIER, "platinum")])).is_err());
        let mut settings = Settings::default();
        assert!(settings.apply_env(env(&[(ENV_PER_PAGE, "lots")])).is_err());
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut settings = Settings::default();
        settings.apply_env(env(&[(ENV_API_KEY, "  ")])).unwrap();
        assert_eq!(settings.coingecko.api_key, None);
    }

    #[test]
    fn missing_api_key_is_not_serialized() {
        let text = toml::to_string(&Settings::default()).unwrap();
        assert!(!text.contains("api_key"));
        assert!(Settings::from_toml(&text).is_ok());
    }
}
