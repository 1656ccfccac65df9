//! Stooq CSV download source.
//!
//! Free, no key. Stooq answers with a plain-text notice instead of CSV when
//! the daily hit quota runs out, which we treat as a daily rate limit.

use super::http;
use crate::data::provider::{check_ticker, DataError, FetchError, PriceSource};
use crate::domain::exchange::{self, FX_EXCHANGE};
use crate::domain::PriceBar;
use chrono::NaiveDate;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;

pub const SOURCE_ID: &str = "stooq";
pub const DEFAULT_BASE_URL: &str = "https://stooq.com";

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "Date")]
    date: NaiveDate,
    #[serde(rename = "Open")]
    open: f64,
    #[serde(rename = "High")]
    high: f64,
    #[serde(rename = "Low")]
    low: f64,
    #[serde(rename = "Close")]
    close: f64,
    #[serde(rename = "Volume", default)]
    volume: Option<f64>,
}

pub struct StooqSource {
    client: Client,
    base_url: String,
}

impl StooqSource {
    pub fn new(base_url: Option<&str>, timeout: Duration) -> Result<Self, DataError> {
        Ok(Self {
            client: http::build_client(timeout)?,
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string(),
        })
    }

    /// Stooq spelling: `gsk.uk`, `aapl.us`, `gbpusd`. `None` for unsupported exchanges.
    pub fn wire_symbol(symbol: &str, exchange: &str) -> Option<String> {
        if exchange::is_fx(exchange) {
            return Some(symbol.to_ascii_lowercase());
        }
        let suffix = exchange::lookup(exchange)?.stooq_suffix?;
        Some(format!("{}.{suffix}", symbol.to_ascii_lowercase()))
    }
}

/// Parse a Stooq daily CSV body.
pub fn parse_csv(body: &str, symbol: &str, exchange: &str) -> Result<Vec<PriceBar>, FetchError> {
    let trimmed = body.trim_start();
    if trimmed.starts_with("Exceeded the daily hits limit") {
        return Err(FetchError::RateLimited { retry_after: None });
    }
    if trimmed.starts_with("No data") {
        return Err(FetchError::NotFound {
            symbol: symbol.to_string(),
        });
    }
    if !trimmed.starts_with("Date,") {
        let head: String = trimmed.chars().take(60).collect();
        return Err(FetchError::Malformed(format!("unexpected CSV header: {head:?}")));
    }

    let mut reader = csv::Reader::from_reader(trimmed.as_bytes());
    let mut bars = Vec::new();
    for row in reader.deserialize::<CsvRow>() {
        let row = row.map_err(|e| FetchError::Malformed(format!("CSV row for {symbol}: {e}")))?;
        bars.push(PriceBar {
            date: row.date,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume.map(|v| v.max(0.0) as u64).unwrap_or(0),
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            source: SOURCE_ID.to_string(),
        });
    }
    bars.sort_by_key(|b| b.date);
    bars.dedup_by_key(|b| b.date);
    Ok(bars)
}

impl PriceSource for StooqSource {
    fn id(&self) -> &str {
        SOURCE_ID
    }

    fn fetch(
        &self,
        symbol: &str,
        exchange: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, FetchError> {
        check_ticker(symbol)?;
        let wire = Self::wire_symbol(symbol, exchange).ok_or_else(|| FetchError::NotFound {
            symbol: format!("{symbol} (stooq has no market for exchange '{exchange}')"),
        })?;
        let d1 = start.format("%Y%m%d").to_string();
        let d2 = end.format("%Y%m%d").to_string();
        let request = self.client.get(format!("{}/q/d/l/", self.base_url)).query(&[
            ("s", wire.as_str()),
            ("d1", d1.as_str()),
            ("d2", d2.as_str()),
            ("i", "d"),
        ]);
        let body = http::send(request, symbol)?
            .text()
            .map_err(http::transport_error)?;
        let tag = if exchange::is_fx(exchange) { FX_EXCHANGE } else { exchange };
        parse_csv(&body, symbol, tag)
    }
}
