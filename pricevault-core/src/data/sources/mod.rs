//! Concrete source adapters and their construction from configuration.

pub mod alpha_vantage;
pub mod ft;
pub mod http;
pub mod stooq;
pub mod yahoo;

pub use alpha_vantage::AlphaVantageSource;
pub use ft::FtSource;
pub use stooq::StooqSource;
pub use yahoo::YahooSource;

use crate::config::PriceVaultConfig;
use crate::data::provider::{DataError, PriceSource};
use std::sync::Arc;
use tracing::{debug, info};

/// Build every enabled source the configuration can support.
///
/// Sources that are disabled, or keyed sources without a key, are left out;
/// the merge engine skips order entries it has no source for.
pub fn build_sources(config: &PriceVaultConfig) -> Result<Vec<Arc<dyn PriceSource>>, DataError> {
    let mut sources: Vec<Arc<dyn PriceSource>> = Vec::new();

    let yahoo_cfg = config.source(yahoo::SOURCE_ID);
    if yahoo_cfg.enabled {
        sources.push(Arc::new(YahooSource::new(
            yahoo_cfg.base_url.as_deref(),
            yahoo_cfg.timeout(),
        )?));
    }

    let stooq_cfg = config.source(stooq::SOURCE_ID);
    if stooq_cfg.enabled {
        sources.push(Arc::new(StooqSource::new(
            stooq_cfg.base_url.as_deref(),
            stooq_cfg.timeout(),
        )?));
    }

    let av_cfg = config.source(alpha_vantage::SOURCE_ID);
    match av_cfg.api_key.as_deref() {
        Some(key) if av_cfg.enabled => sources.push(Arc::new(AlphaVantageSource::new(
            key,
            av_cfg.base_url.as_deref(),
            av_cfg.timeout(),
        )?)),
        _ => info!("alpha_vantage disabled (no api_key configured)"),
    }

    let ft_cfg = config.source(ft::SOURCE_ID);
    if ft_cfg.enabled {
        sources.push(Arc::new(FtSource::new(ft_cfg.base_url.as_deref(), ft_cfg.timeout())?));
    }

    debug!(
        sources = ?sources.iter().map(|s| s.id().to_string()).collect::<Vec<_>>(),
        "built sources"
    );
    Ok(sources)
}
