//! Serializable subsystem configuration.
//!
//! Loaded from TOML by the host. Every section has defaults, so an empty file
//! yields a working configuration.

use crate::data::provider::DataError;
use crate::data::sources::{alpha_vantage, ft, stooq, yahoo};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PriceVaultConfig {
    pub cache: CacheConfig,
    pub merge: MergeConfig,
    pub sources: BTreeMap<String, SourceConfig>,
    pub breaker: BreakerConfig,
    pub metadata: MetadataConfig,
    pub fx: FxConfig,
    pub synthetic: SyntheticConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Local directory, or an `http(s)://` object-storage prefix.
    pub base_location: String,
    /// Never fetch; cache misses fail with `NoCachedData`.
    pub offline: bool,
    /// Capacity of the in-process sub-range result cache. Zero disables it.
    pub memo_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            base_location: "data/prices".into(),
            offline: false,
            memo_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MergeConfig {
    /// Stop calling sources once this share of expected business days is covered.
    pub min_coverage: f64,
    /// Source priority for ordinary tickers.
    pub order: Vec<String>,
    /// Source priority for 12-character security identifiers.
    pub isin_order: Vec<String>,
    /// Longest provider retry-after the engine will sleep through before retrying.
    pub max_retry_wait_secs: u64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            min_coverage: 0.95,
            order: vec![
                yahoo::SOURCE_ID.into(),
                stooq::SOURCE_ID.into(),
                alpha_vantage::SOURCE_ID.into(),
                ft::SOURCE_ID.into(),
            ],
            isin_order: vec![ft::SOURCE_ID.into()],
            max_retry_wait_secs: 30,
        }
    }
}

impl MergeConfig {
    pub fn max_retry_wait(&self) -> Duration {
        Duration::from_secs(self.max_retry_wait_secs)
    }
}

/// Per-source settings, keyed by source id under `[sources.<id>]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    /// Request-rate budget. Zero means unlimited.
    pub requests_per_minute: u32,
    pub api_key: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            timeout_secs: 20,
            requests_per_minute: 0,
            api_key: None,
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetadataConfig {
    /// Directories holding `<exchange>/<symbol>.json` documents, searched in order.
    pub roots: Vec<PathBuf>,
    /// Optional `{exchange: {ticker|"*": factor}}` document.
    pub scaling_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FxConfig {
    pub base_currency: String,
    /// Days loaded before the requested date when resolving a single rate.
    /// The window ends at the requested date, or today if that is earlier.
    pub window_days: u32,
    /// Constant `currency -> base` rates used when no series can be assembled.
    pub fallback_rates: HashMap<String, f64>,
}

impl Default for FxConfig {
    fn default() -> Self {
        Self {
            base_currency: "GBP".into(),
            window_days: 7,
            fallback_rates: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyntheticConfig {
    /// `CASH.GBP` style tickers generate constant unit series.
    pub cash_prefix: String,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            cash_prefix: "CASH".into(),
        }
    }
}

/// Source ids this build knows how to construct.
pub const KNOWN_SOURCES: [&str; 4] = [
    yahoo::SOURCE_ID,
    stooq::SOURCE_ID,
    alpha_vantage::SOURCE_ID,
    ft::SOURCE_ID,
];

impl PriceVaultConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, DataError> {
        toml::from_str(text).map_err(|e| DataError::Config(format!("invalid TOML: {e}")))
    }

    /// Read a TOML file, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, DataError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DataError::Config(format!("read {}: {e}", path.display())))?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Settings for `id`, falling back to defaults when the section is absent.
    pub fn source(&self, id: &str) -> SourceConfig {
        self.sources.get(id).cloned().unwrap_or_default()
    }

    /// Apply `PRICEVAULT_OFFLINE`, `PRICEVAULT_CACHE` and `ALPHAVANTAGE_API_KEY`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("PRICEVAULT_OFFLINE") {
            self.cache.offline = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = var("PRICEVAULT_CACHE") {
            if !v.trim().is_empty() {
                self.cache.base_location = v.trim().to_string();
            }
        }
        if let Some(v) = var("ALPHAVANTAGE_API_KEY") {
            if !v.trim().is_empty() {
                self.sources
                    .entry(alpha_vantage::SOURCE_ID.to_string())
                    .or_default()
                    .api_key = Some(v.trim().to_string());
            }
        }
    }

    pub fn validate(&self) -> Result<(), DataError> {
        let m = &self.merge;
        if !(m.min_coverage > 0.0 && m.min_coverage <= 1.0) {
            return Err(DataError::Config(format!(
                "merge.min_coverage must be in (0, 1], got {}",
                m.min_coverage
            )));
        }
        if m.order.is_empty() {
            return Err(DataError::Config("merge.order must name at least one source".into()));
        }
        for id in m.order.iter().chain(&m.isin_order).chain(self.sources.keys()) {
            if !KNOWN_SOURCES.contains(&id.as_str()) {
                return Err(DataError::Config(format!("unknown source id '{id}'")));
            }
        }
        for (id, s) in &self.sources {
            if s.timeout_secs == 0 {
                return Err(DataError::Config(format!("sources.{id}.timeout_secs must be > 0")));
            }
        }
        if self.fx.base_currency.trim().len() != 3 {
            return Err(DataError::Config(format!(
                "fx.base_currency must be a 3-letter code, got '{}'",
                self.fx.base_currency
            )));
        }
        Ok(())
    }
}
