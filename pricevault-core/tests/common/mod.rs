//! Shared fakes for integration tests. No test touches the network.

#![allow(dead_code)]

use chrono::NaiveDate;
use parking_lot::Mutex;
use pricevault_core::clock::ManualClock;
use pricevault_core::data::storage::{MemoryStorage, SeriesStorage};
use pricevault_core::data::{DataError, MetadataStore};
use pricevault_core::domain::calendar::business_days;
use pricevault_core::{FetchError, PriceBar, PriceHistory, PriceSource, PriceVaultConfig};
use std::path::Path;
use std::sync::Arc;

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

/// One recorded `fetch` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub symbol: String,
    pub exchange: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Source that serves a constant bar on every business day asked for,
/// or a fixed failure when one is set. Every call is recorded.
///
/// Gaps can be set up the way real providers leave them: single days with
/// no bar (holidays, a bar not yet published) and nothing before a listing date.
pub struct FakeSource {
    id: &'static str,
    close: f64,
    failure: Mutex<Option<FetchError>>,
    gaps: Mutex<Vec<NaiveDate>>,
    listed: Mutex<Option<NaiveDate>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeSource {
    pub fn new(id: &'static str, close: f64) -> Arc<Self> {
        Arc::new(Self {
            id,
            close,
            failure: Mutex::new(None),
            gaps: Mutex::new(Vec::new()),
            listed: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(id: &'static str, err: FetchError) -> Arc<Self> {
        let source = Self::new(id, 1.0);
        source.set_failure(Some(err));
        source
    }

    pub fn set_failure(&self, err: Option<FetchError>) {
        *self.failure.lock() = err;
    }

    /// Days left out of every response. Replaces any earlier set.
    pub fn set_gaps(&self, days: &[NaiveDate]) {
        *self.gaps.lock() = days.to_vec();
    }

    /// No bars before `date`.
    pub fn set_listed(&self, date: NaiveDate) {
        *self.listed.lock() = Some(date);
    }

    /// `(start, end)` of every call so far.
    pub fn ranges(&self) -> Vec<(NaiveDate, NaiveDate)> {
        self.calls.lock().iter().map(|c| (c.start, c.end)).collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl PriceSource for FakeSource {
    fn id(&self) -> &str {
        self.id
    }

    fn fetch(
        &self,
        symbol: &str,
        exchange: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, FetchError> {
        self.calls.lock().push(Call {
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            start,
            end,
        });
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }
        let gaps = self.gaps.lock().clone();
        let listed = *self.listed.lock();
        Ok(business_days(start, end)
            .into_iter()
            .filter(|date| !gaps.contains(date) && listed.map_or(true, |l| *date >= l))
            .map(|date| PriceBar {
                date,
                open: self.close,
                high: self.close,
                low: self.close,
                close: self.close,
                volume: 100,
                symbol: symbol.to_string(),
                exchange: exchange.to_string(),
                source: self.id.to_string(),
            })
            .collect())
    }
}

/// Storage whose writes always fail. Reads see nothing.
pub struct ReadOnlyStorage;

impl SeriesStorage for ReadOnlyStorage {
    fn read(&self, _name: &str) -> Result<Option<Vec<u8>>, DataError> {
        Ok(None)
    }

    fn write(&self, name: &str, _bytes: &[u8]) -> Result<(), DataError> {
        Err(DataError::Storage(format!("{name}: read-only storage")))
    }

    fn list(&self) -> Result<Vec<String>, DataError> {
        Ok(Vec::new())
    }

    fn quarantine(&self, _name: &str) -> Result<(), DataError> {
        Ok(())
    }

    fn describe(&self) -> String {
        "read-only".into()
    }
}

/// Everything a facade test needs to poke at afterwards.
pub struct Harness {
    pub history: PriceHistory,
    pub clock: Arc<ManualClock>,
    pub storage: Arc<dyn SeriesStorage>,
}

/// Config whose merge order matches the given fake sources.
pub fn config_for(sources: &[Arc<FakeSource>]) -> PriceVaultConfig {
    let mut config = PriceVaultConfig::default();
    config.merge.order = sources.iter().map(|s| s.id().to_string()).collect();
    config
}

pub fn harness(
    config: PriceVaultConfig,
    sources: &[Arc<FakeSource>],
    storage: Arc<dyn SeriesStorage>,
    metadata_root: Option<&Path>,
    today: NaiveDate,
) -> Harness {
    let clock = Arc::new(ManualClock::on(today));
    let metadata = match metadata_root {
        Some(root) => MetadataStore::new(vec![root.to_path_buf()]),
        None => MetadataStore::empty(),
    };
    let history = PriceHistory::builder(config)
        .clock(clock.clone())
        .storage(storage.clone())
        .sources(sources.iter().map(|s| s.clone() as Arc<dyn PriceSource>).collect())
        .metadata(metadata)
        .build()
        .unwrap();
    Harness {
        history,
        clock,
        storage,
    }
}

/// Harness over fresh in-memory storage, no metadata, dated 2024-03-01.
pub fn simple(sources: &[Arc<FakeSource>]) -> Harness {
    harness(
        config_for(sources),
        sources,
        Arc::new(MemoryStorage::new()),
        None,
        d(2024, 3, 1),
    )
}

pub fn write_metadata(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

pub fn assert_sorted_unique(bars: &[PriceBar]) {
    for w in bars.windows(2) {
        assert!(w[0].date < w[1].date, "{} then {}", w[0].date, w[1].date);
    }
}
