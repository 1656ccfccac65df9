//! Source trait and structured error types.
//!
//! The PriceSource trait abstracts over the external providers (Yahoo, Stooq,
//! Alpha Vantage, FT) so the merge engine can walk an ordered list of them and
//! tests can substitute fakes.

use crate::domain::PriceBar;
use chrono::NaiveDate;
use std::time::Duration;
use thiserror::Error;

/// Per-source failure. Always recovered inside the merge engine, never surfaced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    /// Provider refused the request. `retry_after` is set when the provider said
    /// how long to wait; `None` means a quota that resets with the calendar day.
    #[error("rate limited by provider (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("symbol not found: {symbol}")]
    NotFound { symbol: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    /// Timeout, connection failure or unexpected HTTP status.
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("invalid symbol '{symbol}': {reason}")]
    InvalidSymbol { symbol: String, reason: String },
}

/// Errors surfaced to callers of the subsystem.
///
/// These are designed to be displayable in both CLI and service contexts.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("invalid symbol '{symbol}': {reason}")]
    InvalidSymbol { symbol: String, reason: String },

    #[error("cannot resolve an exchange for '{symbol}' (no suffix, argument or metadata)")]
    UnresolvableExchange { symbol: String },

    #[error("no cached data for {symbol}_{exchange} and outbound fetches are disabled")]
    NoCachedData { symbol: String, exchange: String },

    #[error("no FX rate for {currency} on {date} and no fallback configured")]
    NoFxRate { currency: String, date: NaiveDate },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("metadata error: {0}")]
    Metadata(String),
}

/// One external provider of daily bars.
///
/// Implementations validate the ticker before any network call, normalize the
/// provider's wire format into [`PriceBar`]s and tag every row with [`id`](Self::id).
/// They know nothing about caching or rate-limit state.
pub trait PriceSource: Send + Sync {
    /// Stable identifier, also written into the `Source` column.
    fn id(&self) -> &str;

    /// Fetch daily bars for `symbol` on `exchange` over `[start, end]`, ascending by date.
    fn fetch(
        &self,
        symbol: &str,
        exchange: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, FetchError>;
}

/// Shared pre-flight check for adapters.
pub fn check_ticker(symbol: &str) -> Result<(), FetchError> {
    crate::domain::validate_ticker(symbol).map_err(|reason| FetchError::InvalidSymbol {
        symbol: symbol.to_string(),
        reason,
    })
}
