//! PriceVault Core: historical daily-bar retrieval and rolling cache.
//!
//! This crate contains:
//! - Domain types (bars, business-day calendar, exchange table, ticker rules)
//! - Source adapters for Yahoo, Stooq, Alpha Vantage and FT behind one trait
//! - Symbol/exchange resolution over suffixes, caller input and metadata
//! - A merge & coverage engine driven by per-source rate-limit state
//! - A rolling parquet cache extended by date deltas
//! - FX conversion and synthetic cash series
//!
//! Everything is synchronous. Time comes from an injected [`clock::Clock`].

pub mod clock;
pub mod config;
pub mod data;
pub mod domain;
pub mod history;

pub use config::PriceVaultConfig;
pub use data::{DataError, FetchError, PriceSource};
pub use domain::PriceBar;
pub use history::{HistoryRequest, PriceHistory, PriceHistoryBuilder};
