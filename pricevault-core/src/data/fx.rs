//! FX conversion on top of the rolling store.
//!
//! A pair `{CCY}{BASE}` is just another instrument on exchange `FX`: its
//! series is fetched, merged and cached exactly like a price series, so a
//! rate once fetched is never fetched again. The close is the number of
//! BASE units per CCY unit.

use super::provider::DataError;
use super::rolling::RollingStore;
use crate::domain::{PriceBar, FX_EXCHANGE};
use chrono::{Duration, NaiveDate};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Split a currency into its major code and the multiplier from minor units.
///
/// London quotes pence as `GBX` or `GBp`; both are 0.01 GBP.
pub fn normalize_currency(code: &str) -> (String, f64) {
    let code = code.trim();
    if code == "GBp" || code.eq_ignore_ascii_case("GBX") {
        ("GBP".to_string(), 0.01)
    } else {
        (code.to_ascii_uppercase(), 1.0)
    }
}

pub fn pair_symbol(from: &str, to: &str) -> String {
    format!("{from}{to}")
}

/// Dated closes of one pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateSeries {
    rates: BTreeMap<NaiveDate, f64>,
}

impl RateSeries {
    pub fn from_bars(bars: &[PriceBar]) -> Self {
        Self {
            rates: bars
                .iter()
                .filter(|b| b.close.is_finite() && b.close > 0.0)
                .map(|b| (b.date, b.close))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// Latest rate on or before `date`; failing that, the earliest one after it.
    pub fn as_of(&self, date: NaiveDate) -> Option<f64> {
        self.rates
            .range(..=date)
            .next_back()
            .or_else(|| self.rates.range(date..).next())
            .map(|(_, r)| *r)
    }
}

pub struct FxService {
    store: Arc<RollingStore>,
    base: String,
    window_days: i64,
    fallback: HashMap<String, f64>,
}

impl FxService {
    pub fn new(store: Arc<RollingStore>, base_currency: &str, window_days: u32) -> Self {
        Self {
            store,
            base: normalize_currency(base_currency).0,
            window_days: i64::from(window_days.max(1)),
            fallback: HashMap::new(),
        }
    }

    /// Constant `currency -> base` rates for degraded mode.
    pub fn with_fallback_rates(mut self, rates: &HashMap<String, f64>) -> Self {
        self.fallback = rates
            .iter()
            .map(|(ccy, rate)| (ccy.to_ascii_uppercase(), *rate))
            .collect();
        self
    }

    /// Rate converting one unit of `currency` into the base currency on `date`.
    pub fn rate_on(&self, currency: &str, date: NaiveDate) -> Result<f64, DataError> {
        self.rate(currency, &self.base, date)
    }

    /// Rate converting one unit of `from` into `to` on `date`.
    pub fn rate(&self, from: &str, to: &str, date: NaiveDate) -> Result<f64, DataError> {
        let (from_major, from_mult) = normalize_currency(from);
        let (to_major, to_mult) = normalize_currency(to);
        let unit = from_mult / to_mult;
        if from_major == to_major {
            return Ok(unit);
        }

        // Never look past the requested date or today.
        let end = date.min(self.store.today());
        let series = self.series(&from_major, &to_major, end - Duration::days(self.window_days), end);
        if let Some(rate) = series.as_of(date) {
            return Ok(rate * unit);
        }
        self.fallback_rate(&from_major, &to_major, date)
            .map(|rate| rate * unit)
            .ok_or_else(|| DataError::NoFxRate {
                currency: from.to_string(),
                date,
            })
    }

    /// Convert bars quoted in `from` into `to`, loading the pair series once.
    pub fn convert_bars(&self, bars: Vec<PriceBar>, from: &str, to: &str) -> Result<Vec<PriceBar>, DataError> {
        let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
            return Ok(bars);
        };
        let (from_major, from_mult) = normalize_currency(from);
        let (to_major, to_mult) = normalize_currency(to);
        let unit = from_mult / to_mult;

        if from_major == to_major {
            return Ok(scale_all(bars, |_| Some(unit)));
        }

        let series = self.series(
            &from_major,
            &to_major,
            first.date - Duration::days(self.window_days),
            last.date,
        );
        let fallback = if needs_fallback(&series, &bars) {
            self.fallback_rate(&from_major, &to_major, last.date)
        } else {
            None
        };
        if let Some(bar) = bars.iter().find(|b| series.as_of(b.date).or(fallback).is_none()) {
            return Err(DataError::NoFxRate {
                currency: from.to_string(),
                date: bar.date,
            });
        }
        debug!(from = %from_major, to = %to_major, rows = bars.len(), "converting bars");
        Ok(scale_all(bars, |date| series.as_of(date).or(fallback).map(|r| r * unit)))
    }

    fn series(&self, from: &str, to: &str, start: NaiveDate, end: NaiveDate) -> RateSeries {
        match self.store.load(&pair_symbol(from, to), FX_EXCHANGE, start, end) {
            Ok(bars) => RateSeries::from_bars(&bars),
            Err(e) => {
                warn!(pair = %pair_symbol(from, to), error = %e, "FX series unavailable");
                RateSeries::default()
            }
        }
    }

    fn fallback_rate(&self, from: &str, to: &str, date: NaiveDate) -> Option<f64> {
        if to != self.base {
            return None;
        }
        let rate = self.fallback.get(from).copied()?;
        warn!(currency = from, %date, rate, "using fallback FX rate");
        Some(rate)
    }
}

/// True when some bar has no rate in `series`.
fn needs_fallback(series: &RateSeries, bars: &[PriceBar]) -> bool {
    bars.iter().any(|b| series.as_of(b.date).is_none())
}

fn scale_all(bars: Vec<PriceBar>, rate_for: impl Fn(NaiveDate) -> Option<f64>) -> Vec<PriceBar> {
    bars.into_iter()
        .map(|mut bar| {
            if let Some(rate) = rate_for(bar.date) {
                bar.scale_prices(rate);
            }
            bar
        })
        .collect()
}
