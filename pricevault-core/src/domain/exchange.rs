//! Exchange codes and their per-provider spellings.
//!
//! Exchange codes are Yahoo-style suffixes (`L` for London, `DE` for Xetra, ...)
//! plus `US` for bare-ticker US listings and `FX` for currency pairs. Each
//! adapter turns `(symbol, exchange)` into its own wire symbol from this table.

/// Pseudo-exchange under which FX pair series are stored and fetched.
pub const FX_EXCHANGE: &str = "FX";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeInfo {
    pub code: &'static str,
    /// Appended to the ticker for Yahoo, e.g. `.L`. Empty for US listings.
    pub yahoo_suffix: &'static str,
    pub stooq_suffix: Option<&'static str>,
    pub alpha_vantage_suffix: Option<&'static str>,
    /// Venue code used in FT tearsheet symbols, e.g. `GSK:LSE`.
    pub ft_venue: Option<&'static str>,
    pub currency: &'static str,
}

const fn ex(
    code: &'static str,
    yahoo_suffix: &'static str,
    stooq_suffix: Option<&'static str>,
    alpha_vantage_suffix: Option<&'static str>,
    ft_venue: Option<&'static str>,
    currency: &'static str,
) -> ExchangeInfo {
    ExchangeInfo {
        code,
        yahoo_suffix,
        stooq_suffix,
        alpha_vantage_suffix,
        ft_venue,
        currency,
    }
}

static EXCHANGES: &[ExchangeInfo] = &[
    ex("US", "", Some("us"), Some(""), None, "USD"),
    ex("L", ".L", Some("uk"), Some(".LON"), Some("LSE"), "GBP"),
    ex("DE", ".DE", Some("de"), Some(".DEX"), Some("GER"), "EUR"),
    ex("F", ".F", None, Some(".FRK"), Some("FRA"), "EUR"),
    ex("PA", ".PA", None, Some(".PAR"), Some("PAR"), "EUR"),
    ex("AS", ".AS", None, Some(".AMS"), Some("AEX"), "EUR"),
    ex("MI", ".MI", None, Some(".MIL"), Some("MIL"), "EUR"),
    ex("IR", ".IR", None, None, Some("ISE"), "EUR"),
    ex("SW", ".SW", None, None, Some("SWX"), "CHF"),
    ex("TO", ".TO", None, Some(".TRT"), Some("TOR"), "CAD"),
    ex("AX", ".AX", None, None, Some("ASX"), "AUD"),
    ex("HK", ".HK", Some("hk"), None, Some("HKG"), "HKD"),
    ex("T", ".T", Some("jp"), None, Some("TYO"), "JPY"),
];

/// Look up an exchange code, case-insensitively.
pub fn lookup(code: &str) -> Option<&'static ExchangeInfo> {
    EXCHANGES.iter().find(|e| e.code.eq_ignore_ascii_case(code))
}

pub fn is_known(code: &str) -> bool {
    lookup(code).is_some()
}

/// Trading currency for an exchange, if the table knows it.
pub fn currency_of(code: &str) -> Option<&'static str> {
    lookup(code).map(|e| e.currency)
}

pub fn is_fx(code: &str) -> bool {
    code.eq_ignore_ascii_case(FX_EXCHANGE)
}

/// Split a six-letter pair symbol like `GBPUSD` into `("GBP", "USD")`.
pub fn split_pair(pair: &str) -> Option<(&str, &str)> {
    (pair.len() == 6 && pair.is_ascii()).then(|| pair.split_at(3))
}
