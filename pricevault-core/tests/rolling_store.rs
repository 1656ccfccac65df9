//! End-to-end behaviour of the rolling cache behind the `PriceHistory` facade.
//!
//! Every test runs against fake sources and a manual clock; storage is either
//! in memory or a temp directory.

mod common;

use common::*;
use pricevault_core::data::cache::{CacheKey, SeriesCache};
use pricevault_core::data::storage::{LocalDirStorage, MemoryStorage, SeriesStorage};
use pricevault_core::domain::calendar::business_days;
use pricevault_core::{DataError, FetchError, HistoryRequest, PriceBar, PriceVaultConfig};
use std::collections::HashMap;
use std::sync::Arc;

fn seed(storage: &Arc<dyn SeriesStorage>, symbol: &str, exchange: &str, start: (u32, u32), end: (u32, u32)) {
    let bars: Vec<PriceBar> = business_days(d(2024, start.0, start.1), d(2024, end.0, end.1))
        .into_iter()
        .map(|date| PriceBar {
            date,
            open: 9.0,
            high: 9.0,
            low: 9.0,
            close: 9.0,
            volume: 1,
            symbol: symbol.into(),
            exchange: exchange.into(),
            source: "stooq".into(),
        })
        .collect();
    SeriesCache::new(storage.clone())
        .write(&CacheKey::new(symbol, exchange), &bars)
        .unwrap();
}

fn gsk(start: (u32, u32), end: (u32, u32)) -> HistoryRequest {
    HistoryRequest::new("GSK", d(2024, start.0, start.1), d(2024, end.0, end.1)).on_exchange("L")
}

#[test]
fn empty_exchange_resolves_through_metadata() {
    let meta = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    write_metadata(meta.path(), "L/GSK.json", r#"{"symbol": "GSK", "currency": "GBX"}"#);

    let yahoo = FakeSource::new("yahoo", 14.2);
    let storage: Arc<dyn SeriesStorage> = Arc::new(LocalDirStorage::new(cache_dir.path()));
    let h = harness(
        config_for(&[yahoo.clone()]),
        &[yahoo.clone()],
        storage,
        Some(meta.path()),
        d(2024, 3, 1),
    );

    let req = HistoryRequest::new("GSK", d(2024, 1, 1), d(2024, 1, 10)).on_exchange("");
    let rows = h.history.history(&req).unwrap();

    assert_eq!(rows.len(), 8);
    assert!(cache_dir.path().join("GSK_L.parquet").exists());
    assert_eq!(yahoo.calls()[0].exchange, "L");
}

#[test]
fn only_the_missing_edge_is_fetched() {
    let storage: Arc<dyn SeriesStorage> = Arc::new(MemoryStorage::new());
    seed(&storage, "GSK", "L", (1, 1), (1, 5));
    let yahoo = FakeSource::new("yahoo", 14.2);
    let h = harness(config_for(&[yahoo.clone()]), &[yahoo.clone()], storage, None, d(2024, 3, 1));

    let rows = h.history.history(&gsk((1, 1), (1, 10))).unwrap();

    assert_eq!(
        yahoo.calls(),
        vec![Call {
            symbol: "GSK".into(),
            exchange: "L".into(),
            start: d(2024, 1, 6),
            end: d(2024, 1, 10),
        }]
    );
    assert_eq!(rows.len(), 8);
    assert_sorted_unique(&rows);
    // Cached rows are kept as they were.
    assert_eq!(rows[0].close, 9.0);
    assert_eq!(rows[7].close, 14.2);
}

#[test]
fn persisted_series_serves_a_fresh_process() {
    let cache_dir = tempfile::tempdir().unwrap();

    let first_source = FakeSource::new("yahoo", 14.2);
    let first = harness(
        config_for(&[first_source.clone()]),
        &[first_source.clone()],
        Arc::new(LocalDirStorage::new(cache_dir.path())),
        None,
        d(2024, 3, 1),
    );
    let written = first.history.history(&gsk((1, 1), (1, 31))).unwrap();
    assert_eq!(first_source.call_count(), 1);

    let second_source = FakeSource::new("yahoo", 99.0);
    let second = harness(
        config_for(&[second_source.clone()]),
        &[second_source.clone()],
        Arc::new(LocalDirStorage::new(cache_dir.path())),
        None,
        d(2024, 3, 1),
    );
    let read = second.history.history(&gsk((1, 1), (1, 31))).unwrap();

    assert_eq!(second_source.call_count(), 0);
    let dates = |rows: &[PriceBar]| rows.iter().map(|b| (b.date, b.close)).collect::<Vec<_>>();
    assert_eq!(dates(&written), dates(&read));
}

#[test]
fn repeated_and_narrower_requests_do_not_fetch() {
    let yahoo = FakeSource::new("yahoo", 14.2);
    let h = simple(&[yahoo.clone()]);

    let first = h.history.history(&gsk((1, 1), (1, 31))).unwrap();
    let again = h.history.history(&gsk((1, 1), (1, 31))).unwrap();
    let inner = h.history.history(&gsk((1, 10), (1, 12))).unwrap();

    assert_eq!(first, again);
    assert_eq!(inner.len(), 3);
    assert_eq!(yahoo.call_count(), 1);
}

#[test]
fn offline_mode_only_serves_full_coverage() {
    let storage: Arc<dyn SeriesStorage> = Arc::new(MemoryStorage::new());
    seed(&storage, "GSK", "L", (1, 1), (1, 31));
    let yahoo = FakeSource::new("yahoo", 14.2);
    let mut config = config_for(&[yahoo.clone()]);
    config.cache.offline = true;
    let h = harness(config, &[yahoo.clone()], storage, None, d(2024, 3, 1));

    let rows = h.history.history(&gsk((1, 8), (1, 12))).unwrap();
    assert_eq!(rows.len(), 5);

    let err = h.history.history(&gsk((1, 1), (2, 15))).unwrap_err();
    assert!(matches!(err, DataError::NoCachedData { .. }), "{err:?}");

    let err = h
        .history
        .history(&HistoryRequest::new("AZN", d(2024, 1, 1), d(2024, 1, 5)).on_exchange("L"))
        .unwrap_err();
    assert!(matches!(err, DataError::NoCachedData { .. }), "{err:?}");
    assert_eq!(yahoo.call_count(), 0);
}

#[test]
fn weekend_edges_are_normalized_before_fetching() {
    let yahoo = FakeSource::new("yahoo", 14.2);
    let h = simple(&[yahoo.clone()]);

    // Saturday 6th to Sunday 14th.
    let rows = h.history.history(&gsk((1, 6), (1, 14))).unwrap();

    assert_eq!(rows.len(), 5);
    let call = &yahoo.calls()[0];
    assert_eq!((call.start, call.end), (d(2024, 1, 8), d(2024, 1, 12)));
}

#[test]
fn weekend_only_window_fetches_nothing() {
    let yahoo = FakeSource::new("yahoo", 14.2);
    let h = simple(&[yahoo.clone()]);

    let rows = h.history.history(&gsk((1, 6), (1, 7))).unwrap();

    assert!(rows.is_empty());
    assert_eq!(yahoo.call_count(), 0);
}

#[test]
fn cash_series_is_synthetic() {
    let yahoo = FakeSource::new("yahoo", 14.2);
    let h = simple(&[yahoo.clone()]);

    let rows = h
        .history
        .history(&HistoryRequest::new("CASH.GBP", d(2024, 1, 1), d(2024, 1, 10)))
        .unwrap();

    assert_eq!(rows.len(), 8);
    assert!(rows.iter().all(|b| b.close == 1.0 && b.volume == 0 && b.source == "cash"));
    assert_eq!(yahoo.call_count(), 0);
    assert!(h.storage.list().unwrap().is_empty());
}

#[test]
fn cash_in_another_currency_goes_through_fx_cache() {
    let yahoo = FakeSource::new("yahoo", 1.25);
    let h = simple(&[yahoo.clone()]);

    let rows = h
        .history
        .history(&HistoryRequest::new("CASH.GBP", d(2024, 1, 1), d(2024, 1, 10)).in_currency("USD"))
        .unwrap();

    assert_eq!(rows.len(), 8);
    assert!(rows.iter().all(|b| (b.close - 1.25).abs() < 1e-12));
    let call = &yahoo.calls()[0];
    assert_eq!((call.symbol.as_str(), call.exchange.as_str()), ("GBPUSD", "FX"));
    assert_eq!(h.storage.list().unwrap(), vec!["GBPUSD_FX.parquet".to_string()]);
}

#[test]
fn fx_rates_fall_back_to_configured_constants() {
    let yahoo = FakeSource::failing("yahoo", FetchError::Unavailable("down".into()));
    let mut config = config_for(&[yahoo.clone()]);
    config.fx.fallback_rates = HashMap::from([("USD".to_string(), 0.8)]);
    let h = harness(config, &[yahoo.clone()], Arc::new(MemoryStorage::new()), None, d(2024, 3, 1));

    let rate = h.history.rate_on("USD", d(2024, 2, 1)).unwrap();
    assert_eq!(rate, 0.8);

    let err = h.history.rate_on("JPY", d(2024, 2, 1)).unwrap_err();
    assert!(matches!(err, DataError::NoFxRate { .. }), "{err:?}");
}

#[test]
fn pence_convert_without_fetching() {
    let yahoo = FakeSource::new("yahoo", 1.25);
    let h = simple(&[yahoo.clone()]);

    assert_eq!(h.history.rate_on("GBX", d(2024, 2, 1)).unwrap(), 0.01);
    assert_eq!(h.history.rate_on("GBP", d(2024, 2, 1)).unwrap(), 1.0);
    assert_eq!(yahoo.call_count(), 0);
}

#[test]
fn failed_write_still_returns_fetched_rows() {
    let yahoo = FakeSource::new("yahoo", 14.2);
    let h = harness(
        config_for(&[yahoo.clone()]),
        &[yahoo.clone()],
        Arc::new(ReadOnlyStorage),
        None,
        d(2024, 3, 1),
    );

    let rows = h.history.history(&gsk((1, 1), (1, 10))).unwrap();
    assert_eq!(rows.len(), 8);
}

#[test]
fn corrupt_cache_file_is_quarantined_and_refetched() {
    let cache_dir = tempfile::tempdir().unwrap();
    std::fs::write(cache_dir.path().join("GSK_L.parquet"), b"not parquet").unwrap();
    let yahoo = FakeSource::new("yahoo", 14.2);
    let h = harness(
        config_for(&[yahoo.clone()]),
        &[yahoo.clone()],
        Arc::new(LocalDirStorage::new(cache_dir.path())),
        None,
        d(2024, 3, 1),
    );

    let rows = h.history.history(&gsk((1, 1), (1, 10))).unwrap();

    assert_eq!(rows.len(), 8);
    assert_eq!(yahoo.call_count(), 1);
    assert!(cache_dir.path().join("GSK_L.parquet.quarantined").exists());
}

#[test]
fn exchange_scaling_applies_to_fetched_rows() {
    let dir = tempfile::tempdir().unwrap();
    let scaling = dir.path().join("scaling.json");
    std::fs::write(&scaling, r#"{ "L": { "*": 0.01 } }"#).unwrap();

    let yahoo = FakeSource::new("yahoo", 1420.0);
    let mut config = config_for(&[yahoo.clone()]);
    config.metadata.scaling_file = Some(scaling);
    let h = harness(config, &[yahoo.clone()], Arc::new(MemoryStorage::new()), None, d(2024, 3, 1));

    let rows = h.history.history(&gsk((1, 1), (1, 5))).unwrap();
    assert!(rows.iter().all(|b| (b.close - 14.2).abs() < 1e-9));
}

#[test]
fn concurrent_requests_for_one_key_both_land() {
    let yahoo = FakeSource::new("yahoo", 14.2);
    let h = simple(&[yahoo.clone()]);

    std::thread::scope(|s| {
        s.spawn(|| h.history.history(&gsk((1, 1), (1, 5))).unwrap());
        s.spawn(|| h.history.history(&gsk((1, 8), (1, 12))).unwrap());
    });
    assert_eq!(yahoo.call_count(), 2);

    let rows = h.history.history(&gsk((1, 1), (1, 12))).unwrap();
    assert_eq!(rows.len(), 10);
    assert_sorted_unique(&rows);
    assert_eq!(yahoo.call_count(), 2);
}

#[test]
fn cache_status_reports_each_series() {
    let yahoo = FakeSource::new("yahoo", 14.2);
    let h = simple(&[yahoo.clone()]);
    h.history.history(&gsk((1, 1), (1, 10))).unwrap();

    let status = h.history.cache_status().unwrap();
    assert_eq!(status.len(), 1);
    assert_eq!((status[0].symbol.as_str(), status[0].exchange.as_str()), ("GSK", "L"));
    assert_eq!(status[0].start_date, Some(d(2024, 1, 1)));
    assert_eq!(status[0].end_date, Some(d(2024, 1, 10)));
    assert_eq!(status[0].bar_count, 8);
}

#[test]
fn invalid_config_is_rejected_at_build() {
    let mut config = PriceVaultConfig::default();
    config.merge.min_coverage = 0.0;
    let built = pricevault_core::PriceHistory::builder(config)
        .storage(Arc::new(MemoryStorage::new()))
        .sources(Vec::new())
        .build();
    assert!(matches!(built, Err(DataError::Config(_))));
}

#[test]
fn holiday_at_window_start_is_asked_about_once() {
    // 1 January is a London holiday; providers send nothing for it.
    let yahoo = FakeSource::new("yahoo", 14.2);
    yahoo.set_gaps(&[d(2024, 1, 1)]);
    let h = simple(&[yahoo.clone()]);

    for _ in 0..3 {
        let rows = h.history.history(&gsk((1, 1), (1, 5))).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].date, d(2024, 1, 2));
    }
    assert_eq!(yahoo.ranges(), vec![(d(2024, 1, 1), d(2024, 1, 5))]);

    let fresh = FakeSource::new("yahoo", 99.0);
    let next = harness(config_for(&[fresh.clone()]), &[fresh.clone()], h.storage.clone(), None, d(2024, 3, 1));
    assert_eq!(next.history.history(&gsk((1, 1), (1, 5))).unwrap().len(), 4);
    assert_eq!(fresh.call_count(), 0);
}

#[test]
fn dates_before_listing_are_not_asked_again() {
    let yahoo = FakeSource::new("yahoo", 14.2);
    yahoo.set_listed(d(2024, 2, 1));
    let h = simple(&[yahoo.clone()]);

    assert!(h.history.history(&gsk((1, 1), (1, 31))).unwrap().is_empty());
    assert!(h.history.history(&gsk((1, 1), (1, 31))).unwrap().is_empty());
    assert!(h.history.history(&gsk((1, 8), (1, 12))).unwrap().is_empty());
    assert_eq!(yahoo.call_count(), 1);

    let rows = h.history.history(&gsk((1, 15), (2, 9))).unwrap();
    assert_eq!(rows.len(), 7);
    assert_eq!(rows[0].date, d(2024, 2, 1));
    assert_eq!(
        yahoo.ranges(),
        vec![(d(2024, 1, 1), d(2024, 1, 31)), (d(2024, 2, 1), d(2024, 2, 9))]
    );
}

#[test]
fn gappy_source_falls_through_to_the_next() {
    let yahoo = FakeSource::new("yahoo", 14.2);
    yahoo.set_gaps(&[d(2024, 1, 3), d(2024, 1, 4)]);
    let stooq = FakeSource::new("stooq", 14.3);
    let h = simple(&[yahoo.clone(), stooq.clone()]);

    let rows = h.history.history(&gsk((1, 1), (1, 10))).unwrap();

    assert_eq!(rows.len(), 8);
    assert_sorted_unique(&rows);
    assert_eq!((yahoo.call_count(), stooq.call_count()), (1, 1));
    let on_gap = rows.iter().find(|b| b.date == d(2024, 1, 3)).unwrap();
    assert_eq!(on_gap.source, "stooq");

    h.history.history(&gsk((1, 1), (1, 10))).unwrap();
    assert_eq!((yahoo.call_count(), stooq.call_count()), (1, 1));
}

#[test]
fn unpublished_bar_for_today_is_asked_again_next_day() {
    let yahoo = FakeSource::new("yahoo", 14.2);
    yahoo.set_gaps(&[d(2024, 3, 1)]);
    let h = simple(&[yahoo.clone()]);

    assert_eq!(h.history.history(&gsk((2, 26), (3, 1))).unwrap().len(), 4);
    assert_eq!(h.history.history(&gsk((2, 26), (3, 1))).unwrap().len(), 4);
    assert_eq!(yahoo.call_count(), 1);

    // Friday's bar shows up by Monday.
    yahoo.set_gaps(&[]);
    h.clock.advance(std::time::Duration::from_secs(3 * 24 * 3600));
    let rows = h.history.history(&gsk((2, 26), (3, 4))).unwrap();

    assert_eq!(rows.len(), 6);
    assert_eq!(
        yahoo.ranges(),
        vec![(d(2024, 2, 26), d(2024, 3, 1)), (d(2024, 3, 1), d(2024, 3, 4))]
    );
}

#[test]
fn offline_rate_lookup_uses_the_cached_series() {
    let storage: Arc<dyn SeriesStorage> = Arc::new(MemoryStorage::new());
    let yahoo = FakeSource::new("yahoo", 0.79);
    let online = harness(config_for(&[yahoo.clone()]), &[yahoo.clone()], storage.clone(), None, d(2024, 3, 1));

    assert_eq!(online.history.rate_on("USD", d(2024, 2, 26)).unwrap(), 0.79);
    // The lookup window ends on the requested date.
    assert_eq!(yahoo.ranges(), vec![(d(2024, 2, 19), d(2024, 2, 26))]);

    let mut config = config_for(&[yahoo.clone()]);
    config.cache.offline = true;
    config.fx.fallback_rates = HashMap::from([("USD".to_string(), 0.5)]);
    let offline = harness(config, &[yahoo.clone()], storage, None, d(2024, 3, 1));

    assert_eq!(offline.history.rate_on("USD", d(2024, 2, 26)).unwrap(), 0.79);
    assert_eq!(yahoo.call_count(), 1);
}

#[test]
fn future_rate_lookup_stops_at_today() {
    let yahoo = FakeSource::new("yahoo", 0.79);
    let h = simple(&[yahoo.clone()]);

    assert_eq!(h.history.rate_on("USD", d(2024, 3, 20)).unwrap(), 0.79);
    assert_eq!(yahoo.ranges(), vec![(d(2024, 2, 23), d(2024, 3, 1))]);
}

#[test]
fn path_like_exchange_is_rejected_before_any_io() {
    let yahoo = FakeSource::new("yahoo", 14.2);
    let h = simple(&[yahoo.clone()]);

    let req = HistoryRequest::new("GSK", d(2024, 1, 1), d(2024, 1, 5)).on_exchange("/../../X");
    let err = h.history.history(&req).unwrap_err();

    assert!(matches!(err, DataError::InvalidSymbol { .. }), "{err:?}");
    assert_eq!(yahoo.call_count(), 0);
    assert!(h.storage.list().unwrap().is_empty());
}
