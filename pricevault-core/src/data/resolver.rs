//! Symbol/exchange resolution.
//!
//! Priority, highest first:
//! 1. an exchange suffix embedded in the ticker (`GSK.L`), when it names a known exchange
//! 2. the exchange argument supplied by the caller
//! 3. the exchange recorded in instrument metadata
//!
//! The metadata exchange is always reported separately, since the rolling
//! store prefers it as the cache key.

use crate::data::metadata::{InstrumentMetadata, MetadataStore};
use crate::data::provider::DataError;
use crate::domain::exchange;
use crate::domain::symbol::split_suffix;
use crate::domain::{validate_exchange, validate_ticker};
use std::sync::Arc;
use tracing::{debug, warn};

/// Which priority level supplied the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOrigin {
    Suffix,
    Caller,
    Metadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInstrument {
    pub symbol: String,
    pub exchange: String,
    pub origin: ExchangeOrigin,
    pub metadata_exchange: Option<String>,
    pub metadata: Option<InstrumentMetadata>,
}

impl ResolvedInstrument {
    /// Exchange used for the cache key: metadata first, so one instrument keeps one file.
    pub fn cache_exchange(&self) -> &str {
        self.metadata_exchange.as_deref().unwrap_or(&self.exchange)
    }

    /// Trading currency from metadata, else from the exchange table.
    pub fn currency(&self) -> Option<String> {
        self.metadata
            .as_ref()
            .and_then(|m| m.currency.clone())
            .or_else(|| exchange::currency_of(self.cache_exchange()).map(str::to_string))
    }
}

pub struct SymbolResolver {
    metadata: Arc<MetadataStore>,
}

impl SymbolResolver {
    pub fn new(metadata: Arc<MetadataStore>) -> Self {
        Self { metadata }
    }

    /// Resolve a raw ticker and optional caller exchange. An empty exchange counts as none.
    pub fn resolve(&self, raw: &str, exchange_arg: Option<&str>) -> Result<ResolvedInstrument, DataError> {
        let raw = raw.trim();
        validate_ticker(raw).map_err(|reason| DataError::InvalidSymbol {
            symbol: raw.to_string(),
            reason,
        })?;

        let (symbol, suffix_exchange) = match split_suffix(raw) {
            (base, Some(suffix)) if exchange::is_known(suffix) => (base, Some(suffix.to_ascii_uppercase())),
            _ => (raw, None),
        };
        let symbol = symbol.to_ascii_uppercase();
        let caller_exchange = exchange_arg
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(|e| checked_exchange(&symbol, e.to_ascii_uppercase(), "caller"))
            .transpose()?;

        let hit = self.metadata.find(&symbol);
        let metadata_exchange = hit
            .as_ref()
            .map(|h| checked_exchange(&symbol, h.exchange.clone(), "metadata"))
            .transpose()?;

        if let (Some(s), Some(c)) = (&suffix_exchange, &caller_exchange) {
            if s != c {
                warn!(symbol = %symbol, suffix = %s, caller = %c, "ticker suffix overrides caller exchange");
            }
        }

        let (exchange, origin) = if let Some(e) = suffix_exchange {
            (e, ExchangeOrigin::Suffix)
        } else if let Some(e) = caller_exchange {
            (e, ExchangeOrigin::Caller)
        } else if let Some(e) = metadata_exchange.clone() {
            (e, ExchangeOrigin::Metadata)
        } else {
            return Err(DataError::UnresolvableExchange { symbol });
        };

        if let Some(m) = &metadata_exchange {
            if *m != exchange {
                warn!(symbol = %symbol, resolved = %exchange, metadata = %m, ?origin, "exchange disagrees with metadata");
            }
        }
        debug!(symbol = %symbol, exchange = %exchange, ?origin, "resolved");

        Ok(ResolvedInstrument {
            symbol,
            exchange,
            origin,
            metadata_exchange,
            metadata: hit.map(|h| h.doc),
        })
    }
}

fn checked_exchange(symbol: &str, code: String, origin: &str) -> Result<String, DataError> {
    validate_exchange(&code).map_err(|reason| DataError::InvalidSymbol {
        symbol: symbol.to_string(),
        reason: format!("{origin} exchange {code:?}: {reason}"),
    })?;
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn resolver_with(docs: &[(&str, &str)]) -> (tempfile::TempDir, SymbolResolver) {
        let dir = tempfile::tempdir().unwrap();
        for (rel, body) in docs {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }
        let store = MetadataStore::new(vec![dir.path().to_path_buf()]);
        (dir, SymbolResolver::new(Arc::new(store)))
    }

    #[test]
    fn metadata_supplies_missing_exchange() {
        let (_dir, resolver) = resolver_with(&[("L/GSK.json", r#"{"symbol":"GSK"}"#)]);
        let r = resolver.resolve("GSK", Some("")).unwrap();
        assert_eq!(r.symbol, "GSK");
        assert_eq!(r.exchange, "L");
        assert_eq!(r.origin, ExchangeOrigin::Metadata);
        assert_eq!(r.cache_exchange(), "L");
    }

    #[test]
    fn suffix_beats_caller() {
        let (_dir, resolver) = resolver_with(&[]);
        let r = resolver.resolve("gsk.l", Some("US")).unwrap();
        assert_eq!((r.symbol.as_str(), r.exchange.as_str()), ("GSK", "L"));
        assert_eq!(r.origin, ExchangeOrigin::Suffix);
    }

    #[test]
    fn unknown_suffix_is_part_of_symbol() {
        let (_dir, resolver) = resolver_with(&[]);
        let r = resolver.resolve("BRK.B", Some("US")).unwrap();
        assert_eq!(r.symbol, "BRK.B");
        assert_eq!(r.exchange, "US");
    }

    #[test]
    fn caller_beats_metadata_but_metadata_keys_cache() {
        let (_dir, resolver) = resolver_with(&[("L/GSK.json", r#"{"symbol":"GSK","currency":"GBX"}"#)]);
        let r = resolver.resolve("GSK", Some("US")).unwrap();
        assert_eq!(r.exchange, "US");
        assert_eq!(r.origin, ExchangeOrigin::Caller);
        assert_eq!(r.metadata_exchange.as_deref(), Some("L"));
        assert_eq!(r.cache_exchange(), "L");
        assert_eq!(r.currency().as_deref(), Some("GBX"));
    }

    #[test]
    fn unresolvable_without_any_source() {
        let (_dir, resolver) = resolver_with(&[]);
        assert!(matches!(
            resolver.resolve("GSK", None),
            Err(DataError::UnresolvableExchange { .. })
        ));
        assert!(matches!(
            resolver.resolve("GB00B4PQW151", None),
            Err(DataError::UnresolvableExchange { .. })
        ));
    }

    #[test]
    fn invalid_ticker_fails_fast() {
        let (_dir, resolver) = resolver_with(&[]);
        assert!(matches!(
            resolver.resolve("GS K", Some("L")),
            Err(DataError::InvalidSymbol { .. })
        ));
    }

    #[test]
    fn path_like_exchanges_are_rejected() {
        let (_dir, resolver) = resolver_with(&[]);
        for exchange in ["/../../X", "L/..", "TOOLONGCODE"] {
            assert!(
                matches!(resolver.resolve("GSK", Some(exchange)), Err(DataError::InvalidSymbol { .. })),
                "{exchange}"
            );
        }
    }

    #[test]
    fn metadata_exchange_override_is_validated() {
        let (_dir, resolver) = resolver_with(&[("L/GSK.json", r#"{"symbol":"GSK","exchange":"../../X"}"#)]);
        assert!(matches!(
            resolver.resolve("GSK", None),
            Err(DataError::InvalidSymbol { .. })
        ));
        assert!(matches!(
            resolver.resolve("GSK", Some("L")),
            Err(DataError::InvalidSymbol { .. })
        ));
    }

    #[test]
    fn currency_falls_back_to_exchange_table() {
        let (_dir, resolver) = resolver_with(&[]);
        let r = resolver.resolve("SAP.DE", None).unwrap();
        assert_eq!(r.currency().as_deref(), Some("EUR"));
    }
}
