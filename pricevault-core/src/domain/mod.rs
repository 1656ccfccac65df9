//! Domain types for pricevault

pub mod bar;
pub mod calendar;
pub mod exchange;
pub mod symbol;

pub use bar::{clip, merge_series, PriceBar};
pub use calendar::DateWindow;
pub use exchange::{ExchangeInfo, FX_EXCHANGE};
pub use symbol::{is_isin, validate_exchange, validate_ticker};
