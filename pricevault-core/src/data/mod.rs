//! Retrieval, merging and caching of daily price series.

pub mod cache;
pub mod fx;
pub mod memo;
pub mod merge;
pub mod metadata;
pub mod provider;
pub mod rate_limit;
pub mod resolver;
pub mod rolling;
pub mod scaling;
pub mod sources;
pub mod storage;
pub mod synthetic;

pub use cache::{CacheKey, CacheStatus, CoverageResult, SeriesCache};
pub use fx::FxService;
pub use merge::{coverage_ratio, MergeEngine, MergeOutcome, MergeSettings};
pub use metadata::{InstrumentMetadata, MetadataStore};
pub use provider::{DataError, FetchError, PriceSource};
pub use rate_limit::{BreakerSettings, RateLimiter, SourceGate};
pub use resolver::{ExchangeOrigin, ResolvedInstrument, SymbolResolver};
pub use rolling::RollingStore;
pub use scaling::ScalingOverrides;
pub use storage::{open_storage, HttpObjectStorage, LocalDirStorage, MemoryStorage, SeriesStorage};
pub use synthetic::SyntheticSeries;
