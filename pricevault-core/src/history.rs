//! The subsystem entry point.
//!
//! `history` runs the whole pipeline: synthetic check, resolve, rolling
//! cache (which drives the merge engine on a miss), then FX conversion if
//! the caller asked for a base currency.

use crate::clock::{Clock, SystemClock};
use crate::config::PriceVaultConfig;
use crate::data::cache::{CacheStatus, SeriesCache};
use crate::data::fx::{normalize_currency, FxService};
use crate::data::merge::{MergeEngine, MergeSettings};
use crate::data::metadata::MetadataStore;
use crate::data::provider::{DataError, PriceSource};
use crate::data::rate_limit::{BreakerSettings, RateLimiter};
use crate::data::resolver::{ResolvedInstrument, SymbolResolver};
use crate::data::rolling::RollingStore;
use crate::data::scaling::ScalingOverrides;
use crate::data::sources::build_sources;
use crate::data::storage::{open_storage, SeriesStorage};
use crate::data::synthetic::SyntheticSeries;
use crate::domain::PriceBar;
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One caller request.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRequest {
    pub symbol: String,
    /// Caller-supplied exchange. `None` or empty defers to suffix and metadata.
    pub exchange: Option<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Convert prices into this currency when it differs from the instrument's.
    pub base_currency: Option<String>,
}

impl HistoryRequest {
    pub fn new(symbol: impl Into<String>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: None,
            start,
            end,
            base_currency: None,
        }
    }

    pub fn on_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    pub fn in_currency(mut self, currency: impl Into<String>) -> Self {
        self.base_currency = Some(currency.into());
        self
    }
}

pub struct PriceHistory {
    resolver: SymbolResolver,
    metadata: Arc<MetadataStore>,
    store: Arc<RollingStore>,
    fx: FxService,
    synthetic: SyntheticSeries,
}

impl PriceHistory {
    /// Wire everything from configuration with the wall clock and real sources.
    pub fn from_config(config: &PriceVaultConfig) -> Result<Self, DataError> {
        PriceHistoryBuilder::new(config.clone()).build()
    }

    pub fn builder(config: PriceVaultConfig) -> PriceHistoryBuilder {
        PriceHistoryBuilder::new(config)
    }

    /// Daily bars for the request, clipped to `[start, end]`, ascending, one per date.
    ///
    /// Partial coverage is not an error; an empty vector means nothing could be assembled.
    pub fn history(&self, req: &HistoryRequest) -> Result<Vec<PriceBar>, DataError> {
        if let Some(cash) = self.synthetic.recognise(&req.symbol, &self.metadata) {
            debug!(symbol = %cash.symbol, currency = %cash.currency, "synthetic cash series");
            let bars = self.synthetic.generate(&cash, req.start, req.end);
            return match &req.base_currency {
                Some(base) if !same_currency(base, &cash.currency) => {
                    self.fx.convert_bars(bars, &cash.currency, base)
                }
                _ => Ok(bars),
            };
        }

        let resolved = self.resolve(req)?;
        let bars = self.store.load_resolved(&resolved, req.start, req.end)?;

        let Some(base) = &req.base_currency else {
            return Ok(bars);
        };
        match resolved.currency() {
            Some(ccy) if !same_currency(&ccy, base) => self.fx.convert_bars(bars, &ccy, base),
            Some(_) => Ok(bars),
            None => {
                warn!(symbol = %resolved.symbol, exchange = %resolved.exchange, "unknown instrument currency, not converting");
                Ok(bars)
            }
        }
    }

    pub fn resolve(&self, req: &HistoryRequest) -> Result<ResolvedInstrument, DataError> {
        self.resolver.resolve(&req.symbol, req.exchange.as_deref())
    }

    /// Rate converting one unit of `currency` into the configured base currency.
    pub fn rate_on(&self, currency: &str, date: NaiveDate) -> Result<f64, DataError> {
        self.fx.rate_on(currency, date)
    }

    pub fn cache_status(&self) -> Result<Vec<CacheStatus>, DataError> {
        self.store.cache().status()
    }

    pub fn store(&self) -> &Arc<RollingStore> {
        &self.store
    }
}

/// Same major currency and same unit, so `GBX` and `GBP` still differ.
fn same_currency(a: &str, b: &str) -> bool {
    normalize_currency(a) == normalize_currency(b)
}

/// Assembles a [`PriceHistory`], with seams for clock, storage and sources.
pub struct PriceHistoryBuilder {
    config: PriceVaultConfig,
    clock: Option<Arc<dyn Clock>>,
    storage: Option<Arc<dyn SeriesStorage>>,
    sources: Option<Vec<Arc<dyn PriceSource>>>,
    metadata: Option<MetadataStore>,
}

impl PriceHistoryBuilder {
    pub fn new(config: PriceVaultConfig) -> Self {
        Self {
            config,
            clock: None,
            storage: None,
            sources: None,
            metadata: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn SeriesStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn sources(mut self, sources: Vec<Arc<dyn PriceSource>>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn metadata(mut self, metadata: MetadataStore) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn build(self) -> Result<PriceHistory, DataError> {
        let config = self.config;
        config.validate()?;

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let storage = match self.storage {
            Some(s) => s,
            None => open_storage(&config.cache.base_location)?,
        };
        let sources = match self.sources {
            Some(s) => s,
            None => build_sources(&config)?,
        };
        let metadata = Arc::new(
            self.metadata
                .unwrap_or_else(|| MetadataStore::new(config.metadata.roots.clone())),
        );
        let scaling = match &config.metadata.scaling_file {
            Some(path) => ScalingOverrides::load(path)?,
            None => ScalingOverrides::default(),
        };

        let breaker = BreakerSettings {
            failure_threshold: config.breaker.failure_threshold.max(1),
            cooldown: Duration::from_secs(config.breaker.cooldown_secs),
        };
        let mut limiter = RateLimiter::new(clock.clone(), breaker);
        for (id, source_cfg) in &config.sources {
            limiter = limiter.with_budget(id, source_cfg.requests_per_minute);
        }

        let engine = MergeEngine::new(
            sources,
            Arc::new(limiter),
            clock.clone(),
            MergeSettings::from(&config.merge),
        )
        .with_scaling(scaling);

        let store = Arc::new(
            RollingStore::new(SeriesCache::new(storage), Arc::new(engine), clock)
                .offline(config.cache.offline)
                .with_memo_capacity(config.cache.memo_capacity),
        );
        let fx = FxService::new(store.clone(), &config.fx.base_currency, config.fx.window_days)
            .with_fallback_rates(&config.fx.fallback_rates);

        Ok(PriceHistory {
            resolver: SymbolResolver::new(metadata.clone()),
            metadata,
            store,
            fx,
            synthetic: SyntheticSeries::new(&config.synthetic.cash_prefix),
        })
    }
}
