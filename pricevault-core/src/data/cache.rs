//! Parquet series cache.
//!
//! Layout: `{base}/{SYMBOL}_{EXCHANGE}.parquet`, one file per instrument,
//! columns `Date, Open, High, Low, Close, Volume, Ticker, Source`.
//!
//! Features:
//! - Whole-file rewrite on every extension (read, merge, write back)
//! - Integrity validation on load (schema check, row count > 0)
//! - Quarantine for corrupt files (`{filename}.quarantined`)
//! - A `{SYMBOL}_{EXCHANGE}.span.json` record of the dates the sources have
//!   already been asked about, so holidays and pre-listing days at the
//!   window edges are not fetched again
//! - Coverage assessment against a requested window

use super::provider::DataError;
use super::storage::SeriesStorage;
use crate::domain::{DateWindow, PriceBar};
use chrono::{Duration, NaiveDate};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, warn};

const EXTENSION: &str = "parquet";
const SPAN_EXTENSION: &str = "span.json";

/// Identity of one cached series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub symbol: String,
    pub exchange: String,
}

impl CacheKey {
    /// Keys are upper-cased so `gsk`/`l` and `GSK`/`L` share a file.
    pub fn new(symbol: &str, exchange: &str) -> Self {
        Self {
            symbol: symbol.trim().to_ascii_uppercase(),
            exchange: exchange.trim().to_ascii_uppercase(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}_{}.{EXTENSION}", self.symbol, self.exchange)
    }

    /// Name of the checked-span record kept next to the series.
    pub fn span_name(&self) -> String {
        format!("{}_{}.{SPAN_EXTENSION}", self.symbol, self.exchange)
    }

    /// Inverse of [`file_name`](Self::file_name). Exchange codes never contain `_`.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(&format!(".{EXTENSION}"))?;
        let (symbol, exchange) = stem.rsplit_once('_')?;
        if symbol.is_empty() || exchange.is_empty() {
            return None;
        }
        Some(Self::new(symbol, exchange))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.symbol, self.exchange)
    }
}

/// Summary of one cached series.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheStatus {
    pub symbol: String,
    pub exchange: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub bar_count: usize,
    pub size_bytes: usize,
}

/// How well the cache covers the requested window.
#[derive(Debug, Clone, PartialEq)]
pub enum CoverageResult {
    NotCached,
    FullyCovered,
    /// The ranges that still have to be fetched, at most one on each side.
    PartiallyCovered { missing: Vec<DateWindow> },
}

impl CoverageResult {
    /// Windows to fetch for `window` under this result.
    pub fn missing_ranges(&self, window: DateWindow) -> Vec<DateWindow> {
        match self {
            CoverageResult::NotCached => vec![window],
            CoverageResult::FullyCovered => Vec::new(),
            CoverageResult::PartiallyCovered { missing } => missing.clone(),
        }
    }
}

/// Dates the sources have been asked about for one key, whether or not
/// they returned a row for each of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckedSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Day of the last extension.
    pub checked_on: NaiveDate,
}

impl CheckedSpan {
    pub fn new(window: DateWindow, checked_on: NaiveDate) -> Self {
        Self {
            start: window.start,
            end: window.end,
            checked_on,
        }
    }

    /// The part of the span that still counts as checked on `today`.
    ///
    /// A bar may not be published yet on the day it is asked for, so a tail
    /// reaching `checked_on` only counts on that same day.
    pub fn settled(&self, today: NaiveDate) -> Option<DateWindow> {
        let end = if self.checked_on < today && self.end >= self.checked_on {
            self.checked_on - Duration::days(1)
        } else {
            self.end
        };
        let window = DateWindow::new(self.start, end);
        (!window.is_empty()).then_some(window)
    }
}

/// First and last date of a sorted series.
pub fn series_span(bars: &[PriceBar]) -> Option<DateWindow> {
    match (bars.first(), bars.last()) {
        (Some(first), Some(last)) => Some(DateWindow::new(first.date, last.date)),
        _ => None,
    }
}

/// Compare the span the cache already accounts for against `window`.
///
/// Only the span's edges matter. Missing ranges run from the window edge to
/// the day next to the span's edge, so the span stays contiguous.
pub fn assess_coverage(covered: Option<DateWindow>, window: DateWindow) -> CoverageResult {
    let Some(covered) = covered else {
        return CoverageResult::NotCached;
    };
    if covered.start <= window.start && covered.end >= window.end {
        return CoverageResult::FullyCovered;
    }

    let mut missing = Vec::new();
    if window.start < covered.start {
        missing.push(DateWindow::new(window.start, covered.start - Duration::days(1)));
    }
    if window.end > covered.end {
        missing.push(DateWindow::new(covered.end + Duration::days(1), window.end));
    }
    CoverageResult::PartiallyCovered { missing }
}

/// Parquet-backed series cache over any [`SeriesStorage`].
#[derive(Clone)]
pub struct SeriesCache {
    storage: Arc<dyn SeriesStorage>,
}

impl SeriesCache {
    pub fn new(storage: Arc<dyn SeriesStorage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<dyn SeriesStorage> {
        &self.storage
    }

    /// Load the cached series for `key`, ascending by date.
    ///
    /// A file that fails validation is quarantined and reported as absent.
    pub fn read(&self, key: &CacheKey) -> Result<Option<Vec<PriceBar>>, DataError> {
        let name = key.file_name();
        let Some(bytes) = self.storage.read(&name)? else {
            return Ok(None);
        };
        match decode(&bytes, &key.exchange) {
            Ok(mut bars) => {
                bars.sort_by_key(|b| b.date);
                bars.dedup_by_key(|b| b.date);
                debug!(key = %key, rows = bars.len(), "cache hit");
                Ok(Some(bars))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "corrupt cache file");
                if let Err(qe) = self.storage.quarantine(&name) {
                    warn!(key = %key, error = %qe, "quarantine failed");
                }
                // The span no longer has rows behind it.
                let span = key.span_name();
                if self.storage.read(&span)?.is_some() {
                    if let Err(qe) = self.storage.quarantine(&span) {
                        warn!(key = %key, error = %qe, "span quarantine failed");
                    }
                }
                Ok(None)
            }
        }
    }

    /// The checked span recorded for `key`. An unreadable record counts as absent.
    pub fn read_span(&self, key: &CacheKey) -> Result<Option<CheckedSpan>, DataError> {
        let Some(bytes) = self.storage.read(&key.span_name())? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(span) => Ok(Some(span)),
            Err(e) => {
                warn!(key = %key, error = %e, "ignoring unreadable span record");
                Ok(None)
            }
        }
    }

    pub fn write_span(&self, key: &CacheKey, span: &CheckedSpan) -> Result<(), DataError> {
        let bytes = serde_json::to_vec(span).map_err(|e| DataError::Storage(format!("span record: {e}")))?;
        self.storage.write(&key.span_name(), &bytes)?;
        debug!(key = %key, start = %span.start, end = %span.end, "span recorded");
        Ok(())
    }

    /// Replace the whole series for `key`.
    pub fn write(&self, key: &CacheKey, bars: &[PriceBar]) -> Result<(), DataError> {
        if bars.is_empty() {
            return Err(DataError::Storage("no bars to cache".into()));
        }
        let bytes = encode(bars, &key.symbol)?;
        self.storage.write(&key.file_name(), &bytes)?;
        debug!(key = %key, rows = bars.len(), bytes = bytes.len(), "cache written");
        Ok(())
    }

    /// Every cached series with its date range and row count.
    pub fn status(&self) -> Result<Vec<CacheStatus>, DataError> {
        let mut out = Vec::new();
        for name in self.storage.list()? {
            let Some(key) = CacheKey::parse(&name) else {
                continue;
            };
            let size_bytes = self.storage.read(&name)?.map(|b| b.len()).unwrap_or(0);
            let bars = self.read(&key)?.unwrap_or_default();
            out.push(CacheStatus {
                symbol: key.symbol,
                exchange: key.exchange,
                start_date: bars.first().map(|b| b.date),
                end_date: bars.last().map(|b| b.date),
                bar_count: bars.len(),
                size_bytes,
            });
        }
        Ok(out)
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

/// Encode bars as a parquet file in memory.
pub fn encode(bars: &[PriceBar], ticker: &str) -> Result<Vec<u8>, DataError> {
    let dates: Vec<i32> = bars.iter().map(|b| (b.date - epoch()).num_days() as i32).collect();
    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<u64> = bars.iter().map(|b| b.volume).collect();
    let tickers: Vec<String> = bars.iter().map(|_| ticker.to_string()).collect();
    let sources: Vec<String> = bars.iter().map(|b| b.source.clone()).collect();

    let mut df = DataFrame::new(vec![
        Column::new("Date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| DataError::ParquetError(format!("date cast: {e}")))?,
        Column::new("Open".into(), opens),
        Column::new("High".into(), highs),
        Column::new("Low".into(), lows),
        Column::new("Close".into(), closes),
        Column::new("Volume".into(), volumes),
        Column::new("Ticker".into(), tickers),
        Column::new("Source".into(), sources),
    ])
    .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))?;

    let mut buf = Vec::new();
    ParquetWriter::new(&mut buf)
        .finish(&mut df)
        .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
    Ok(buf)
}

/// Decode and validate a parquet file. Rows are tagged with `exchange`.
pub fn decode(bytes: &[u8], exchange: &str) -> Result<Vec<PriceBar>, DataError> {
    let df = ParquetReader::new(Cursor::new(bytes.to_vec()))
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read: {e}")))?;

    if df.height() == 0 {
        return Err(DataError::ParquetError("empty parquet file".into()));
    }

    let col = |name: &str| {
        df.column(name)
            .map_err(|_| DataError::ParquetError(format!("missing column '{name}'")))
    };
    let type_err =
        |name: &str, e: PolarsError| DataError::ParquetError(format!("{name} column type: {e}"));

    let date_ca = col("Date")?.date().map_err(|e| type_err("Date", e))?;
    let open_ca = col("Open")?.f64().map_err(|e| type_err("Open", e))?;
    let high_ca = col("High")?.f64().map_err(|e| type_err("High", e))?;
    let low_ca = col("Low")?.f64().map_err(|e| type_err("Low", e))?;
    let close_ca = col("Close")?.f64().map_err(|e| type_err("Close", e))?;
    let vol_ca = col("Volume")?.u64().map_err(|e| type_err("Volume", e))?;
    let ticker_ca = col("Ticker")?.str().map_err(|e| type_err("Ticker", e))?;
    let source_ca = col("Source")?.str().map_err(|e| type_err("Source", e))?;

    let mut bars = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let days = date_ca
            .get(i)
            .ok_or_else(|| DataError::ParquetError(format!("null date at row {i}")))?;
        bars.push(PriceBar {
            date: epoch() + Duration::days(days as i64),
            open: open_ca.get(i).unwrap_or(f64::NAN),
            high: high_ca.get(i).unwrap_or(f64::NAN),
            low: low_ca.get(i).unwrap_or(f64::NAN),
            close: close_ca.get(i).unwrap_or(f64::NAN),
            volume: vol_ca.get(i).unwrap_or(0),
            symbol: ticker_ca.get(i).unwrap_or_default().to_string(),
            exchange: exchange.to_string(),
            source: source_ca.get(i).unwrap_or_default().to_string(),
        });
    }
    Ok(bars)
}
