//! Merge & coverage engine: walks sources in priority order and stops once
//! the merged series covers enough of the expected business days.
//!
//! Sources are called strictly one after another. Every per-source failure
//! is recovered here; the caller only ever sees the (possibly empty) merge.

use super::provider::{FetchError, PriceSource};
use super::rate_limit::{RateLimiter, SourceGate};
use super::scaling::ScalingOverrides;
use crate::clock::Clock;
use crate::config::MergeConfig;
use crate::domain::{is_isin, merge_series, DateWindow, PriceBar};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct MergeSettings {
    pub min_coverage: f64,
    pub order: Vec<String>,
    pub isin_order: Vec<String>,
    pub max_retry_wait: Duration,
}

impl From<&MergeConfig> for MergeSettings {
    fn from(c: &MergeConfig) -> Self {
        Self {
            min_coverage: c.min_coverage,
            order: c.order.clone(),
            isin_order: c.isin_order.clone(),
            max_retry_wait: c.max_retry_wait(),
        }
    }
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self::from(&MergeConfig::default())
    }
}

/// What happened when the engine got to one source.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// Call succeeded with this many rows inside the window.
    Rows(usize),
    /// Rate-limit state said no; the source was not called.
    Skipped(SourceGate),
    Failed(FetchError),
    /// Named in the order but not configured.
    Unconfigured,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceAttempt {
    pub source: String,
    pub outcome: AttemptOutcome,
}

/// Result of one merge run.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub bars: Vec<PriceBar>,
    pub coverage: f64,
    pub attempts: Vec<SourceAttempt>,
}

impl MergeOutcome {
    /// Number of sources actually called (retries not counted).
    pub fn calls(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| matches!(a.outcome, AttemptOutcome::Rows(_) | AttemptOutcome::Failed(_)))
            .count()
    }

    /// At least one source returned successfully, even if with no rows.
    pub fn answered(&self) -> bool {
        self.attempts.iter().any(|a| matches!(a.outcome, AttemptOutcome::Rows(_)))
    }
}

/// Distinct dates inside `window` divided by its business days, capped at 1.0.
///
/// A window without business days is trivially covered.
pub fn coverage_ratio(bars: &[PriceBar], window: DateWindow) -> f64 {
    let expected = window.business_day_count();
    if expected == 0 {
        return 1.0;
    }
    let present: BTreeSet<_> = bars.iter().filter(|b| window.contains(b.date)).map(|b| b.date).collect();
    (present.len() as f64 / expected as f64).min(1.0)
}

pub struct MergeEngine {
    sources: HashMap<String, Arc<dyn PriceSource>>,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    scaling: ScalingOverrides,
    settings: MergeSettings,
}

impl MergeEngine {
    pub fn new(
        sources: Vec<Arc<dyn PriceSource>>,
        limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
        settings: MergeSettings,
    ) -> Self {
        Self {
            sources: sources.into_iter().map(|s| (s.id().to_string(), s)).collect(),
            limiter,
            clock,
            scaling: ScalingOverrides::default(),
            settings,
        }
    }

    pub fn with_scaling(mut self, scaling: ScalingOverrides) -> Self {
        self.scaling = scaling;
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Source order for `symbol`: the dedicated route for security identifiers,
    /// the normal priority list otherwise.
    pub fn order_for(&self, symbol: &str) -> &[String] {
        if is_isin(symbol) && !self.settings.isin_order.is_empty() {
            &self.settings.isin_order
        } else {
            &self.settings.order
        }
    }

    /// Fetch and merge `[window.start, window.end]` for `(symbol, exchange)`.
    pub fn fetch(&self, symbol: &str, exchange: &str, window: DateWindow) -> MergeOutcome {
        let mut merged: Vec<PriceBar> = Vec::new();
        let mut attempts = Vec::new();
        let mut coverage = coverage_ratio(&merged, window);

        if window.business_day_count() == 0 {
            debug!(symbol, exchange, %window, "no business days to fetch");
            return MergeOutcome {
                bars: merged,
                coverage,
                attempts,
            };
        }

        for id in self.order_for(symbol) {
            let Some(source) = self.sources.get(id) else {
                attempts.push(SourceAttempt {
                    source: id.clone(),
                    outcome: AttemptOutcome::Unconfigured,
                });
                continue;
            };

            let gate = self.limiter.gate(id);
            if !gate.is_open() {
                debug!(source = %id, ?gate, "source gated, skipping");
                attempts.push(SourceAttempt {
                    source: id.clone(),
                    outcome: AttemptOutcome::Skipped(gate),
                });
                continue;
            }

            let outcome = match self.call_source(source.as_ref(), symbol, exchange, window) {
                Ok(mut rows) => {
                    rows.retain(|b| window.contains(b.date) && b.is_sane());
                    self.scaling.apply(exchange, symbol, &mut rows);
                    let n = rows.len();
                    merged = merge_series(merged, rows);
                    coverage = coverage_ratio(&merged, window);
                    info!(source = %id, symbol, exchange, %window, rows = n, coverage, "source ok");
                    AttemptOutcome::Rows(n)
                }
                Err(e) => AttemptOutcome::Failed(e),
            };
            attempts.push(SourceAttempt {
                source: id.clone(),
                outcome,
            });

            if coverage >= self.settings.min_coverage {
                debug!(symbol, coverage, threshold = self.settings.min_coverage, "coverage reached");
                break;
            }
        }

        if coverage < self.settings.min_coverage {
            warn!(
                symbol,
                exchange,
                %window,
                coverage,
                rows = merged.len(),
                "coverage below threshold after all sources"
            );
        }

        MergeOutcome {
            bars: merged,
            coverage,
            attempts,
        }
    }

    /// Call one source, retrying once after a short explicit retry-after.
    /// Updates rate-limit state for every outcome.
    fn call_source(
        &self,
        source: &dyn PriceSource,
        symbol: &str,
        exchange: &str,
        window: DateWindow,
    ) -> Result<Vec<PriceBar>, FetchError> {
        let id = source.id();
        self.limiter.await_budget(id);
        let mut result = source.fetch(symbol, exchange, window.start, window.end);

        let retry = match &result {
            Err(FetchError::RateLimited { retry_after: Some(wait) }) if *wait <= self.settings.max_retry_wait => {
                Some(*wait)
            }
            _ => None,
        };
        if let Some(wait) = retry {
            info!(source = id, symbol, wait_secs = wait.as_secs_f64(), "rate limited, retrying once");
            self.clock.sleep(wait);
            self.limiter.await_budget(id);
            result = source.fetch(symbol, exchange, window.start, window.end);
        }

        match &result {
            Ok(_) => self.limiter.record_success(id),
            Err(FetchError::RateLimited { retry_after: None }) => self.limiter.disable_for_today(id),
            Err(FetchError::RateLimited { retry_after: Some(wait) }) => self.limiter.block_for(id, *wait),
            Err(FetchError::Unavailable(msg)) => {
                warn!(source = id, symbol, error = %msg, "source unavailable");
                self.limiter.record_failure(id);
            }
            Err(e) => warn!(source = id, symbol, exchange, error = %e, "source failed"),
        }
        result
    }
}
