//! Rolling cache store.
//!
//! One persisted series per `(symbol, exchange)`, extended on demand:
//! normalize the window to business days, work out which edges the cache
//! is missing, fetch only those through the merge engine, merge with the
//! cached rows and rewrite the whole file. Callers get rows clipped to the
//! window they asked for.
//!
//! Alongside the rows, each key records the span of dates the sources have
//! already answered for. Coverage is judged against that span, so a holiday
//! or a pre-listing day at a window edge is asked about once, not on every
//! request. A tail that reached the day it was checked on is asked again the
//! next day, in case its bar was not published yet.
//!
//! The read, fetch, merge and write cycle for one key runs under a per-key
//! lock. A second caller waiting on the lock re-reads the file once it gets
//! in, so its delta lands on top of the first caller's. The lock entry is
//! dropped once no caller is left on it.

use super::cache::{assess_coverage, series_span, CacheKey, CheckedSpan, CoverageResult, SeriesCache};
use super::memo::{BoundedCache, MemoKey};
use super::merge::MergeEngine;
use super::provider::DataError;
use super::resolver::ResolvedInstrument;
use crate::clock::Clock;
use crate::domain::{clip, merge_series, validate_exchange, validate_ticker, DateWindow, PriceBar};
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct RollingStore {
    cache: SeriesCache,
    engine: Arc<MergeEngine>,
    clock: Arc<dyn Clock>,
    offline: bool,
    locks: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
    memo: Mutex<BoundedCache<MemoKey, Vec<PriceBar>>>,
}

impl RollingStore {
    pub fn new(cache: SeriesCache, engine: Arc<MergeEngine>, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache,
            engine,
            clock,
            offline: false,
            locks: Mutex::new(HashMap::new()),
            memo: Mutex::new(BoundedCache::new(256)),
        }
    }

    /// Never fetch. Anything the cache can't fully serve fails with `NoCachedData`.
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn with_memo_capacity(mut self, capacity: usize) -> Self {
        self.memo = Mutex::new(BoundedCache::new(capacity));
        self
    }

    pub fn cache(&self) -> &SeriesCache {
        &self.cache
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Load a resolved instrument, keyed by its metadata exchange when it has one.
    pub fn load_resolved(
        &self,
        instrument: &ResolvedInstrument,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, DataError> {
        let key_exchange = instrument.cache_exchange();
        if key_exchange != instrument.exchange {
            info!(
                symbol = %instrument.symbol,
                requested = %instrument.exchange,
                cache_key = %key_exchange,
                "using metadata exchange as cache key"
            );
        }
        self.load(&instrument.symbol, key_exchange, start, end)
    }

    /// Rows for `(symbol, exchange)` in `[start, end]`, extending the cache as needed.
    pub fn load(
        &self,
        symbol: &str,
        exchange: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, DataError> {
        if start > end {
            return Ok(Vec::new());
        }
        // Both parts end up in a file name or object URL.
        let key = CacheKey::new(symbol, exchange);
        validate_ticker(&key.symbol)
            .and_then(|()| validate_exchange(&key.exchange))
            .map_err(|reason| DataError::InvalidSymbol {
                symbol: key.symbol.clone(),
                reason,
            })?;
        let today = self.clock.today();
        let memo_key = MemoKey {
            symbol: key.symbol.clone(),
            exchange: key.exchange.clone(),
            start,
            end,
            as_of: today,
        };
        if let Some(hit) = self.memo.lock().get(&memo_key) {
            debug!(key = %key, "memo hit");
            return Ok(hit);
        }

        let lock = self.key_lock(&key);
        let result = {
            let _guard = lock.lock();
            self.load_locked(&key, start, end, today)
        };
        self.release_lock(&key, lock);

        let (rows, settled) = result?;
        if settled {
            self.memo.lock().insert(memo_key, rows.clone());
        }
        Ok(rows)
    }

    /// One read, fetch, merge and write cycle. The flag says whether the
    /// window is now fully accounted for and the rows can be memoized.
    fn load_locked(
        &self,
        key: &CacheKey,
        start: NaiveDate,
        end: NaiveDate,
        today: NaiveDate,
    ) -> Result<(Vec<PriceBar>, bool), DataError> {
        let cached = self.cache.read(key)?.unwrap_or_default();
        let checked = self.cache.read_span(key)?.and_then(|s| s.settled(today));
        let covered = match (series_span(&cached), checked) {
            (Some(a), Some(b)) => Some(a.hull(b)),
            (a, b) => a.or(b),
        };

        let Some(window) = DateWindow::new(start, end.min(today)).normalized() else {
            debug!(key = %key, %start, %end, "no business days up to today in window");
            return Ok((clip(&cached, start, end), true));
        };

        let coverage = assess_coverage(covered, window);
        if coverage == CoverageResult::FullyCovered {
            debug!(key = %key, %window, "served from cache");
            return Ok((clip(&cached, start, end), true));
        }

        if self.offline {
            return Err(DataError::NoCachedData {
                symbol: key.symbol.clone(),
                exchange: key.exchange.clone(),
            });
        }

        let mut fetched = Vec::new();
        let mut answered = covered;
        for range in coverage.missing_ranges(window) {
            info!(key = %key, %range, "fetching delta");
            let outcome = self.engine.fetch(&key.symbol, &key.exchange, range);
            if outcome.answered() {
                answered = Some(answered.map_or(range, |a| a.hull(range)));
            }
            fetched.extend(outcome.bars);
        }

        let mut persisted = true;
        let rows = if fetched.is_empty() {
            cached
        } else {
            let combined = merge_series(cached, fetched);
            match self.cache.write(key, &combined) {
                Ok(()) => info!(key = %key, rows = combined.len(), "cache extended"),
                Err(e) => {
                    persisted = false;
                    error!(key = %key, error = %e, "failed to persist series, serving unsaved data");
                }
            }
            combined
        };

        // Only record dates whose rows made it to storage.
        if persisted && answered != covered {
            if let Some(span) = answered {
                if let Err(e) = self.cache.write_span(key, &CheckedSpan::new(span, today)) {
                    warn!(key = %key, error = %e, "failed to record checked span");
                }
            }
        }
        self.invalidate(key);

        let settled = persisted && assess_coverage(answered, window) == CoverageResult::FullyCovered;
        Ok((clip(&rows, start, end), settled))
    }

    fn key_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        self.locks.lock().entry(key.clone()).or_default().clone()
    }

    /// Drop the key's lock entry once nobody else holds or waits on it.
    fn release_lock(&self, key: &CacheKey, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock();
        let ours = locks.get(key).is_some_and(|l| Arc::ptr_eq(l, &lock));
        if ours && Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
    }

    fn invalidate(&self, key: &CacheKey) {
        self.memo
            .lock()
            .retain(|m| !(m.symbol == key.symbol && m.exchange == key.exchange));
    }
}
