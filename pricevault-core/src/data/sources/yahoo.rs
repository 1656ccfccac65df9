//! Yahoo Finance data source.
//!
//! Fetches daily OHLCV bars from Yahoo's v8 chart API and parses the response.
//! Yahoo is free but throttles with HTTP 429 plus a `Retry-After` header, so it
//! is an explicit-delay source.
//!
//! Yahoo Finance has no official API and is subject to unannounced format changes.

use super::http;
use crate::data::provider::{check_ticker, DataError, FetchError, PriceSource};
use crate::domain::exchange::{self, FX_EXCHANGE};
use crate::domain::PriceBar;
use chrono::NaiveDate;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;

pub const SOURCE_ID: &str = "yahoo";
pub const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com";

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(default)]
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    /// Exchange offset from UTC in seconds.
    #[serde(default)]
    gmtoffset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<u64>>,
}

pub struct YahooSource {
    client: Client,
    base_url: String,
}

impl YahooSource {
    pub fn new(base_url: Option<&str>, timeout: Duration) -> Result<Self, DataError> {
        Ok(Self {
            client: http::build_client(timeout)?,
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string(),
        })
    }

    /// Yahoo spelling of `(symbol, exchange)`: `GSK.L`, `AAPL`, `GBPUSD=X`.
    pub fn wire_symbol(symbol: &str, exchange: &str) -> String {
        if exchange::is_fx(exchange) {
            return format!("{symbol}=X");
        }
        match exchange::lookup(exchange) {
            Some(info) => format!("{symbol}{}", info.yahoo_suffix),
            None if exchange.is_empty() => symbol.to_string(),
            None => format!("{symbol}.{exchange}"),
        }
    }

    fn chart_url(&self, wire_symbol: &str, start: NaiveDate, end: NaiveDate) -> String {
        let start_ts = start.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc().timestamp();
        let end_ts = end.and_hms_opt(23, 59, 59).unwrap_or_default().and_utc().timestamp();
        format!(
            "{}/v8/finance/chart/{wire_symbol}?period1={start_ts}&period2={end_ts}&interval=1d",
            self.base_url
        )
    }
}

/// Parse a chart API body into bars tagged for `(symbol, exchange)`.
pub fn parse_chart(
    body: &str,
    symbol: &str,
    exchange: &str,
) -> Result<Vec<PriceBar>, FetchError> {
    let resp: ChartResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::Malformed(format!("chart JSON for {symbol}: {e}")))?;

    let result = resp.chart.result.ok_or_else(|| match resp.chart.error {
        Some(err) if err.code == "Not Found" => FetchError::NotFound {
            symbol: symbol.to_string(),
        },
        Some(err) => FetchError::Malformed(format!("{}: {}", err.code, err.description)),
        None => FetchError::Malformed("empty result with no error".into()),
    })?;

    let data = result
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::Malformed("result array is empty".into()))?;

    // No timestamps means no trading in the window.
    let Some(timestamps) = data.timestamp else {
        return Ok(Vec::new());
    };

    let quote = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::Malformed("no quote data".into()))?;

    // Daily bars are stamped at the local open, so take the date in exchange time.
    let offset = data.meta.and_then(|m| m.gmtoffset).unwrap_or(0);

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let date = chrono::DateTime::from_timestamp(ts + offset, 0)
            .map(|dt| dt.date_naive())
            .ok_or_else(|| FetchError::Malformed(format!("invalid timestamp: {ts}")))?;

        let open = quote.open.get(i).copied().flatten();
        let high = quote.high.get(i).copied().flatten();
        let low = quote.low.get(i).copied().flatten();
        let close = quote.close.get(i).copied().flatten();
        let volume = quote.volume.get(i).copied().flatten();

        // Holidays come back as all-null rows
        let Some(close) = close else {
            continue;
        };

        bars.push(PriceBar {
            date,
            open: open.unwrap_or(close),
            high: high.unwrap_or(close),
            low: low.unwrap_or(close),
            close,
            volume: volume.unwrap_or(0),
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            source: SOURCE_ID.to_string(),
        });
    }

    bars.sort_by_key(|b| b.date);
    bars.dedup_by_key(|b| b.date);
    Ok(bars)
}

impl PriceSource for YahooSource {
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
        let wire = Self::wire_symbol(symbol, exchange);
        let resp = http::send(self.client.get(self.chart_url(&wire, start, end)), symbol)?;
        let body = resp.text().map_err(http::transport_error)?;
        let tag = if exchange::is_fx(exchange) { FX_EXCHANGE } else { exchange };
        parse_chart(&body, symbol, tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{"chart":{"result":[{"meta":{"currency":"GBp"},
        "timestamp":[1704182400,1704268800,1704355200],
        "indicators":{"quote":[{
            "open":[1520.0,null,1531.0],
            "high":[1530.5,null,1540.0],
            "low":[1510.0,null,1525.0],
            "close":[1525.0,null,1538.5],
            "volume":[4200000,null,3900000]}]}}],"error":null}}"#;

    #[test]
    fn parses_chart_and_skips_null_rows() {
        let bars = parse_chart(BODY, "GSK", "L").unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(bars[1].date, NaiveDate::from_ymd_opt(2024, 1, 4).unwrap());
        assert_eq!(bars[1].close, 1538.5);
        assert_eq!(bars[0].volume, 4_200_000);
        assert!(bars.iter().all(|b| b.source == SOURCE_ID && b.exchange == "L"));
    }

    #[test]
    fn dates_follow_exchange_time() {
        // 10:00 AEDT on Mon 2024-01-08 is 23:00 UTC on the Sunday.
        let body = r#"{"chart":{"result":[{"meta":{"currency":"AUD","gmtoffset":39600},
            "timestamp":[1704668400],
            "indicators":{"quote":[{"open":[7.1],"high":[7.2],"low":[7.0],"close":[7.15],"volume":[1000]}]}}],
            "error":null}}"#;
        let bars = parse_chart(body, "BHP", "AX").unwrap();
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 8).unwrap());
    }

    #[test]
    fn not_found_error_maps() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        assert!(matches!(
            parse_chart(body, "NOPE", "L"),
            Err(FetchError::NotFound { .. })
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            parse_chart("<html>oops</html>", "GSK", "L"),
            Err(FetchError::Malformed(_))
        ));
    }

    #[test]
    fn missing_timestamps_is_empty_window() {
        let body = r#"{"chart":{"result":[{"indicators":{"quote":[{"open":[],"high":[],"low":[],"close":[],"volume":[]}]}}],"error":null}}"#;
        assert!(parse_chart(body, "GSK", "L").unwrap().is_empty());
    }

    #[test]
    fn wire_symbols() {
        assert_eq!(YahooSource::wire_symbol("GSK", "L"), "GSK.L");
        assert_eq!(YahooSource::wire_symbol("AAPL", "US"), "AAPL");
        assert_eq!(YahooSource::wire_symbol("GBPUSD", "FX"), "GBPUSD=X");
        assert_eq!(YahooSource::wire_symbol("XYZ", "NZ"), "XYZ.NZ");
    }

    #[test]
    fn invalid_symbol_fails_before_network() {
        let source = YahooSource::new(Some("http://127.0.0.1:9"), Duration::from_secs(1)).unwrap();
        let d = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert!(matches!(
            source.fetch("BAD SYMBOL", "L", d, d),
            Err(FetchError::InvalidSymbol { .. })
        ));
    }
}
