//! Ticker well-formedness rules.

/// Longest ticker any adapter will accept.
pub const MAX_TICKER_LEN: usize = 32;

/// Check a raw ticker before it gets anywhere near the network.
///
/// Returns the reason on rejection.
pub fn validate_ticker(ticker: &str) -> Result<(), String> {
    if ticker.is_empty() {
        return Err("ticker is empty".into());
    }
    if ticker.len() > MAX_TICKER_LEN {
        return Err(format!("ticker longer than {MAX_TICKER_LEN} characters"));
    }
    if let Some(c) = ticker
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '=' | '&' | '_' | ':')))
    {
        return Err(format!("illegal character {c:?}"));
    }
    Ok(())
}

/// Longest exchange code accepted.
pub const MAX_EXCHANGE_LEN: usize = 8;

/// Check an exchange code. Codes become part of cache file names and
/// object URLs, so only ASCII letters and digits pass.
pub fn validate_exchange(code: &str) -> Result<(), String> {
    if code.is_empty() {
        return Err("exchange is empty".into());
    }
    if code.len() > MAX_EXCHANGE_LEN {
        return Err(format!("exchange longer than {MAX_EXCHANGE_LEN} characters"));
    }
    if let Some(c) = code.chars().find(|c| !c.is_ascii_alphanumeric()) {
        return Err(format!("illegal character {c:?} in exchange"));
    }
    Ok(())
}

/// True for 12-character security identifiers: two country letters,
/// nine alphanumerics, one check digit (e.g. `GB00B4PQW151`).
pub fn is_isin(id: &str) -> bool {
    let bytes = id.as_bytes();
    bytes.len() == 12
        && bytes[..2].iter().all(u8::is_ascii_uppercase)
        && bytes[2..11]
            .iter()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        && bytes[11].is_ascii_digit()
}

/// Split `GSK.L` into `("GSK", Some("L"))`. Splits on the last dot only.
pub fn split_suffix(ticker: &str) -> (&str, Option<&str>) {
    match ticker.rsplit_once('.') {
        Some((base, suffix)) if !base.is_empty() && !suffix.is_empty() => (base, Some(suffix)),
        _ => (ticker, None),
    }
}
