//! Per-exchange price scaling overrides.
//!
//! Some providers quote in a different unit than callers expect, e.g. pence
//! instead of pounds on the London exchange. The override document maps
//! exchange to ticker to factor; `"*"` covers every ticker on an exchange
//! that has no entry of its own:
//!
//! ```json
//! { "L": { "*": 0.01, "BP.A": 1.0 } }
//! ```

use crate::data::provider::DataError;
use crate::domain::PriceBar;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

const WILDCARD: &str = "*";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScalingOverrides {
    // Exchange and ticker keys are stored upper-cased.
    by_exchange: HashMap<String, HashMap<String, f64>>,
}

impl ScalingOverrides {
    pub fn from_json_str(text: &str) -> Result<Self, DataError> {
        let raw: HashMap<String, HashMap<String, f64>> = serde_json::from_str(text)
            .map_err(|e| DataError::Metadata(format!("invalid scaling overrides: {e}")))?;
        let mut by_exchange = HashMap::new();
        for (exchange, tickers) in raw {
            let tickers: HashMap<String, f64> = tickers
                .into_iter()
                .map(|(ticker, factor)| (ticker.to_ascii_uppercase(), factor))
                .collect();
            if let Some((ticker, factor)) = tickers.iter().find(|(_, f)| !(f.is_finite() && **f > 0.0)) {
                return Err(DataError::Metadata(format!(
                    "scaling factor for {exchange}/{ticker} must be positive, got {factor}"
                )));
            }
            by_exchange.insert(exchange.to_ascii_uppercase(), tickers);
        }
        Ok(Self { by_exchange })
    }

    pub fn load(path: &Path) -> Result<Self, DataError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DataError::Metadata(format!("read {}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Factor for `symbol` on `exchange`. Ticker-specific entries beat the wildcard.
    pub fn factor(&self, exchange: &str, symbol: &str) -> Option<f64> {
        let tickers = self.by_exchange.get(&exchange.to_ascii_uppercase())?;
        tickers
            .get(&symbol.to_ascii_uppercase())
            .or_else(|| tickers.get(WILDCARD))
            .copied()
    }

    /// Scale freshly fetched rows in place.
    pub fn apply(&self, exchange: &str, symbol: &str, bars: &mut [PriceBar]) {
        let Some(factor) = self.factor(exchange, symbol) else {
            return;
        };
        if factor == 1.0 {
            return;
        }
        debug!(symbol, exchange, factor, rows = bars.len(), "scaling fetched rows");
        for bar in bars.iter_mut() {
            bar.scale_prices(factor);
        }
    }
}
