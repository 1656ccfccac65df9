//! PriceBar, the fundamental market data unit.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Daily OHLCV bar for one instrument on one date, tagged with the source that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub symbol: String,
    pub exchange: String,
    pub source: String,
}

impl PriceBar {
    /// Returns true if any OHLC field is NaN (void bar).
    pub fn is_void(&self) -> bool {
        self.open.is_nan() || self.high.is_nan() || self.low.is_nan() || self.close.is_nan()
    }

    /// Basic OHLC sanity check: high >= low, high >= open, high >= close, etc.
    pub fn is_sane(&self) -> bool {
        if self.is_void() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.close > 0.0
    }

    /// Multiply the price columns by `factor`. Volume is a count and stays as-is.
    pub fn scale_prices(&mut self, factor: f64) {
        self.open *= factor;
        self.high *= factor;
        self.low *= factor;
        self.close *= factor;
    }
}

/// Merge `overlay` onto `base`, keyed by date.
///
/// On a date collision the overlay row wins. The result is sorted ascending
/// with at most one row per date.
pub fn merge_series(
    base: impl IntoIterator<Item = PriceBar>,
    overlay: impl IntoIterator<Item = PriceBar>,
) -> Vec<PriceBar> {
    let mut by_date: BTreeMap<NaiveDate, PriceBar> = BTreeMap::new();
    for bar in base.into_iter().chain(overlay) {
        by_date.insert(bar.date, bar);
    }
    by_date.into_values().collect()
}

/// Rows of a sorted series that fall inside `[start, end]`.
pub fn clip(bars: &[PriceBar], start: NaiveDate, end: NaiveDate) -> Vec<PriceBar> {
    bars.iter()
        .filter(|b| b.date >= start && b.date <= end)
        .cloned()
        .collect()
}
