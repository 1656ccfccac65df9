//! Synthetic constant series for cash pseudo-instruments.
//!
//! `CASH.GBP` (or any symbol with a document in the metadata `CASH/` folder)
//! is worth exactly 1.0 of its currency on every business day. Nothing is
//! fetched or persisted.

use crate::data::metadata::MetadataStore;
use crate::domain::calendar::business_days;
use crate::domain::PriceBar;
use chrono::NaiveDate;

pub const CASH_SOURCE: &str = "cash";

/// A recognised cash instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashInstrument {
    pub symbol: String,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct SyntheticSeries {
    prefix: String,
}

impl SyntheticSeries {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim().to_ascii_uppercase(),
        }
    }

    /// Recognise `{prefix}.{CCY}` tickers, or symbols documented as cash in metadata.
    pub fn recognise(&self, raw: &str, metadata: &MetadataStore) -> Option<CashInstrument> {
        let upper = raw.trim().to_ascii_uppercase();
        if let Some(ccy) = upper
            .strip_prefix(&self.prefix)
            .and_then(|rest| rest.strip_prefix('.'))
        {
            if ccy.len() == 3 && ccy.chars().all(|c| c.is_ascii_alphabetic()) {
                return Some(CashInstrument {
                    symbol: upper.clone(),
                    currency: ccy.to_string(),
                });
            }
        }
        let hit = metadata.find_cash(&upper)?;
        let currency = hit
            .doc
            .currency
            .map(|c| c.to_ascii_uppercase())
            .unwrap_or_else(|| upper.clone());
        Some(CashInstrument {
            symbol: upper,
            currency,
        })
    }

    /// One unit bar per business day in `[start, end]`.
    pub fn generate(&self, cash: &CashInstrument, start: NaiveDate, end: NaiveDate) -> Vec<PriceBar> {
        business_days(start, end)
            .into_iter()
            .map(|date| PriceBar {
                date,
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 0,
                symbol: cash.symbol.clone(),
                exchange: cash.currency.clone(),
                source: CASH_SOURCE.to_string(),
            })
            .collect()
    }
}
