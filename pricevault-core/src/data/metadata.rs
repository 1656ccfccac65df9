//! Per-instrument metadata documents.
//!
//! Layout under each root: `<EXCHANGE>/<SYMBOL>.json`, plus a `CASH/` folder
//! of cash pseudo-instruments keyed by currency code (`CASH/GBP.json`).
//! Lookups are case-insensitive on both the exchange folder and the file stem.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const CASH_FOLDER: &str = "CASH";
const EXTENSION: &str = "json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentMetadata {
    pub symbol: String,
    /// Overrides the folder name when set.
    pub exchange: Option<String>,
    pub name: Option<String>,
    /// Trading currency, e.g. `GBP`, `GBX`, `USD`.
    pub currency: Option<String>,
    pub isin: Option<String>,
    /// Free-form instrument kind (`equity`, `fund`, `cash`, ...).
    pub kind: Option<String>,
}

/// A metadata document found on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataHit {
    pub exchange: String,
    pub doc: InstrumentMetadata,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    roots: Vec<PathBuf>,
}

impl MetadataStore {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Find the metadata for `symbol` across all exchanges and roots.
    ///
    /// Roots are searched in order and exchange folders alphabetically; the
    /// first hit wins. Hits on a second exchange are logged as ambiguous.
    pub fn find(&self, symbol: &str) -> Option<MetadataHit> {
        let mut hits = Vec::new();
        for root in &self.roots {
            for dir in sorted_subdirs(root) {
                let Some(folder) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                    continue;
                };
                if folder.eq_ignore_ascii_case(CASH_FOLDER) {
                    continue;
                }
                if let Some(hit) = read_doc_in(&dir, &folder, symbol) {
                    hits.push(hit);
                }
            }
        }

        let mut hits = hits.into_iter();
        let first = hits.next()?;
        for other in hits {
            if !other.exchange.eq_ignore_ascii_case(&first.exchange) {
                warn!(
                    symbol,
                    chosen = %first.exchange,
                    ignored = %other.exchange,
                    path = %other.path.display(),
                    "metadata found on more than one exchange"
                );
            }
        }
        debug!(symbol, exchange = %first.exchange, "metadata hit");
        Some(first)
    }

    /// Cash pseudo-instrument document for `symbol` (normally a currency code).
    pub fn find_cash(&self, symbol: &str) -> Option<MetadataHit> {
        self.roots.iter().find_map(|root| {
            let dir = sorted_subdirs(root).into_iter().find(|d| {
                d.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.eq_ignore_ascii_case(CASH_FOLDER))
            })?;
            read_doc_in(&dir, CASH_FOLDER, symbol)
        })
    }
}

fn sorted_subdirs(root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs
}

/// Case-insensitive `<symbol>.json` lookup inside one exchange folder.
fn read_doc_in(dir: &Path, folder: &str, symbol: &str) -> Option<MetadataHit> {
    let entries = fs::read_dir(dir).ok()?;
    let path = entries.filter_map(Result::ok).map(|e| e.path()).find(|p| {
        p.extension().and_then(|e| e.to_str()) == Some(EXTENSION)
            && p.file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s.eq_ignore_ascii_case(symbol))
    })?;

    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable metadata");
            return None;
        }
    };
    let mut doc: InstrumentMetadata = match serde_json::from_str(&text) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "invalid metadata document");
            return None;
        }
    };
    if doc.symbol.is_empty() {
        doc.symbol = symbol.to_ascii_uppercase();
    }
    let exchange = doc
        .exchange
        .clone()
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| folder.to_string())
        .to_ascii_uppercase();
    Some(MetadataHit { exchange, doc, path })
}
