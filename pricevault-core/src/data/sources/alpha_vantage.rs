//! Alpha Vantage source.
//!
//! Keyed API with a small daily quota. When the quota is spent the API still
//! answers 200 but swaps the time series for a `Note` or `Information`
//! message; that is reported as a rate limit with no retry time, which
//! disables the source until the next calendar day.

use super::http;
use crate::data::provider::{check_ticker, DataError, FetchError, PriceSource};
use crate::domain::exchange::{self, FX_EXCHANGE};
use crate::domain::PriceBar;
use chrono::NaiveDate;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

pub const SOURCE_ID: &str = "alpha_vantage";
pub const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co";

/// TIME_SERIES_DAILY and FX_DAILY share this shape apart from the series key.
#[derive(Debug, Deserialize)]
struct DailyResponse {
    #[serde(rename = "Time Series (Daily)")]
    equity_series: Option<HashMap<String, DailyQuote>>,
    #[serde(rename = "Time Series FX (Daily)")]
    fx_series: Option<HashMap<String, DailyQuote>>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DailyQuote {
    #[serde(rename = "1. open")]
    open: String,
    #[serde(rename = "2. high")]
    high: String,
    #[serde(rename = "3. low")]
    low: String,
    #[serde(rename = "4. close")]
    close: String,
    #[serde(rename = "5. volume")]
    volume: Option<String>,
}

pub struct AlphaVantageSource {
    client: Client,
    base_url: String,
    api_key: String,
}

impl AlphaVantageSource {
    pub fn new(api_key: &str, base_url: Option<&str>, timeout: Duration) -> Result<Self, DataError> {
        if api_key.trim().is_empty() {
            return Err(DataError::Config("alpha_vantage requires an api_key".into()));
        }
        Ok(Self {
            client: http::build_client(timeout)?,
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
        })
    }

    /// Alpha Vantage spelling: `GSK.LON`, `AAPL`. `None` for unsupported exchanges.
    pub fn wire_symbol(symbol: &str, exchange: &str) -> Option<String> {
        let suffix = exchange::lookup(exchange)?.alpha_vantage_suffix?;
        Some(format!("{symbol}{suffix}"))
    }
}

fn parse_price(field: &str, value: &str, date: &str) -> Result<f64, FetchError> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| FetchError::Malformed(format!("{field} {value:?} on {date}")))
}

/// Parse a TIME_SERIES_DAILY or FX_DAILY body, keeping rows inside `[start, end]`.
pub fn parse_daily(
    body: &str,
    symbol: &str,
    exchange: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<PriceBar>, FetchError> {
    let resp: DailyResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::Malformed(format!("alpha vantage JSON for {symbol}: {e}")))?;

    if resp.note.is_some() || resp.information.is_some() {
        return Err(FetchError::RateLimited { retry_after: None });
    }
    if let Some(msg) = resp.error_message {
        return Err(FetchError::NotFound {
            symbol: format!("{symbol} ({msg})"),
        });
    }
    let series = resp
        .equity_series
        .or(resp.fx_series)
        .ok_or_else(|| FetchError::Malformed("no time series in response".into()))?;

    let mut bars = Vec::new();
    for (day, q) in series {
        let date = NaiveDate::parse_from_str(&day, "%Y-%m-%d")
            .map_err(|_| FetchError::Malformed(format!("bad date key {day:?}")))?;
        if date < start || date > end {
            continue;
        }
        let volume = match q.volume.as_deref() {
            Some(v) => parse_price("volume", v, &day)?.max(0.0) as u64,
            None => 0,
        };
        bars.push(PriceBar {
            date,
            open: parse_price("open", &q.open, &day)?,
            high: parse_price("high", &q.high, &day)?,
            low: parse_price("low", &q.low, &day)?,
            close: parse_price("close", &q.close, &day)?,
            volume,
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            source: SOURCE_ID.to_string(),
        });
    }
    bars.sort_by_key(|b| b.date);
    Ok(bars)
}

impl PriceSource for AlphaVantageSource {
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
        let url = format!("{}/query", self.base_url);

        let request = if exchange::is_fx(exchange) {
            let (from, to) = exchange::split_pair(symbol).ok_or_else(|| FetchError::InvalidSymbol {
                symbol: symbol.to_string(),
                reason: "FX pair must be six letters".into(),
            })?;
            self.client.get(url).query(&[
                ("function", "FX_DAILY"),
                ("from_symbol", from),
                ("to_symbol", to),
                ("outputsize", "full"),
                ("apikey", self.api_key.as_str()),
            ])
        } else {
            let wire = Self::wire_symbol(symbol, exchange).ok_or_else(|| FetchError::NotFound {
                symbol: format!("{symbol} (alpha vantage has no market for exchange '{exchange}')"),
            })?;
            self.client.get(url).query(&[
                ("function", "TIME_SERIES_DAILY"),
                ("symbol", wire.as_str()),
                ("outputsize", "full"),
                ("apikey", self.api_key.as_str()),
            ])
        };

        let body = http::send(request, symbol)?
            .text()
            .map_err(http::transport_error)?;
        let tag = if exchange::is_fx(exchange) { FX_EXCHANGE } else { exchange };
        parse_daily(&body, symbol, tag, start, end)
    }
}
