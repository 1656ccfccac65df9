//! FT markets scrape source.
//!
//! Last resort in the normal order, and the dedicated route for ISIN-keyed
//! funds that no quote API lists. Two requests per fetch: the tearsheet page
//! yields the internal `xid`, then the historical-prices endpoint returns an
//! HTML table fragment wrapped in JSON.

use super::http;
use crate::data::provider::{check_ticker, DataError, FetchError, PriceSource};
use crate::domain::exchange;
use crate::domain::{is_isin, PriceBar};
use chrono::NaiveDate;
use reqwest::blocking::Client;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

pub const SOURCE_ID: &str = "ft";
pub const DEFAULT_BASE_URL: &str = "https://markets.ft.com";

#[derive(Debug, Deserialize)]
struct HistoricalPrices {
    html: String,
}

/// Widget config carried in the tearsheet's `data-mod-config` attribute.
#[derive(Debug, Deserialize)]
struct ModConfig {
    xid: Option<serde_json::Value>,
}

fn config_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("[data-mod-config]").expect("valid config selector"))
}

fn row_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("tr").expect("valid row selector"))
}

fn cell_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("td").expect("valid cell selector"))
}

fn span_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("span").expect("valid span selector"))
}

pub struct FtSource {
    client: Client,
    base_url: String,
}

impl FtSource {
    pub fn new(base_url: Option<&str>, timeout: Duration) -> Result<Self, DataError> {
        Ok(Self {
            client: http::build_client(timeout)?,
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string(),
        })
    }

    /// FT tearsheet symbol: `GB00B4PQW151:GBP` for funds, `GSK:LSE` for equities.
    pub fn wire_symbol(symbol: &str, exchange: &str) -> Option<String> {
        if exchange::is_fx(exchange) {
            return None;
        }
        if is_isin(symbol) {
            let currency = match exchange::currency_of(exchange) {
                Some(ccy) => ccy.to_string(),
                None if exchange.len() == 3 => exchange.to_ascii_uppercase(),
                None => return None,
            };
            return Some(format!("{symbol}:{currency}"));
        }
        let venue = exchange::lookup(exchange)?.ft_venue?;
        Some(format!("{symbol}:{venue}"))
    }

    fn lookup_xid(&self, wire: &str, symbol: &str) -> Result<String, FetchError> {
        let section = if is_isin(symbol) { "funds" } else { "equities" };
        let request = self
            .client
            .get(format!("{}/data/{section}/tearsheet/historical", self.base_url))
            .query(&[("s", wire)]);
        let page = http::send(request, symbol)?
            .text()
            .map_err(http::transport_error)?;
        extract_xid(&page).ok_or_else(|| FetchError::NotFound {
            symbol: symbol.to_string(),
        })
    }
}

/// Pull the internal instrument id out of a tearsheet page.
pub fn extract_xid(page: &str) -> Option<String> {
    let doc = Html::parse_document(page);
    doc.select(config_selector())
        .filter_map(|el| el.value().attr("data-mod-config"))
        .filter_map(|raw| serde_json::from_str::<ModConfig>(raw).ok())
        .find_map(|config| match config.xid? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn parse_number(text: &str) -> Option<f64> {
    text.trim().replace(',', "").parse::<f64>().ok()
}

/// Volumes come as `3.90m`, `1.2k`, `123,456` or `--`.
fn parse_volume(text: &str) -> u64 {
    let t = text.trim().replace(',', "").to_ascii_lowercase();
    let (digits, multiplier) = match t.chars().last() {
        Some('k') => (&t[..t.len() - 1], 1e3),
        Some('m') => (&t[..t.len() - 1], 1e6),
        Some('b') => (&t[..t.len() - 1], 1e9),
        _ => (t.as_str(), 1.0),
    };
    digits
        .parse::<f64>()
        .map(|v| (v * multiplier).round().max(0.0) as u64)
        .unwrap_or(0)
}

/// Date cells carry a long and a short rendering; the long one comes first.
fn parse_date_cell(cell: ElementRef<'_>) -> Option<NaiveDate> {
    let text = cell.select(span_selector()).next().map(text_of).unwrap_or_else(|| text_of(cell));
    NaiveDate::parse_from_str(&text, "%A, %B %d, %Y")
        .or_else(|_| NaiveDate::parse_from_str(&text, "%a, %b %d, %Y"))
        .ok()
}

/// Parse the historical-prices JSON wrapper and its HTML rows.
pub fn parse_history(
    body: &str,
    symbol: &str,
    exchange: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<PriceBar>, FetchError> {
    let wrapper: HistoricalPrices = serde_json::from_str(body)
        .map_err(|e| FetchError::Malformed(format!("ft history JSON for {symbol}: {e}")))?;

    // Bare rows only parse as table rows inside a table.
    let table = Html::parse_fragment(&format!("<table>{}</table>", wrapper.html));
    let mut bars = Vec::new();
    for row in table.select(row_selector()) {
        let cells: Vec<ElementRef<'_>> = row.select(cell_selector()).collect();
        if cells.len() < 5 {
            continue;
        }
        let date = parse_date_cell(cells[0])
            .ok_or_else(|| FetchError::Malformed(format!("ft date cell {:?}", text_of(cells[0]))))?;
        if date < start || date > end {
            continue;
        }
        let price = |i: usize| {
            let text = text_of(cells[i]);
            parse_number(&text).ok_or_else(|| FetchError::Malformed(format!("ft price cell {text:?}")))
        };
        bars.push(PriceBar {
            date,
            open: price(1)?,
            high: price(2)?,
            low: price(3)?,
            close: price(4)?,
            volume: cells.get(5).map(|c| parse_volume(&text_of(*c))).unwrap_or(0),
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            source: SOURCE_ID.to_string(),
        });
    }
    bars.sort_by_key(|b| b.date);
    bars.dedup_by_key(|b| b.date);
    Ok(bars)
}

impl PriceSource for FtSource {
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
            symbol: format!("{symbol} (ft has no venue for exchange '{exchange}')"),
        })?;
        let xid = self.lookup_xid(&wire, symbol)?;

        let start_param = start.format("%Y/%m/%d").to_string();
        let end_param = end.format("%Y/%m/%d").to_string();
        let request = self
            .client
            .get(format!("{}/data/equities/ajax/get-historical-prices", self.base_url))
            .query(&[
                ("startDate", start_param.as_str()),
                ("endDate", end_param.as_str()),
                ("symbol", xid.as_str()),
            ]);
        let body = http::send(request, symbol)?
            .text()
            .map_err(http::transport_error)?;
        parse_history(&body, symbol, exchange, start, end)
    }
}
