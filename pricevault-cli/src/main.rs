//! PriceVault CLI: history, fx, and cache status commands.
//!
//! Commands:
//! - `history`: daily bars for one instrument, extending the cache as needed
//! - `fx`: conversion rate from a currency into the configured base
//! - `cache status`: report cached series, date ranges and sizes

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use pricevault_core::{HistoryRequest, PriceBar, PriceHistory, PriceVaultConfig};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "pricevault",
    about = "PriceVault CLI: historical daily prices with a rolling cache"
)]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Offline mode: serve only from cache.
    #[arg(long, global = true, default_value_t = false)]
    offline: bool,

    /// Cache location (directory or http(s) prefix). Overrides the config.
    #[arg(long, global = true)]
    cache: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Daily bars for one instrument.
    History {
        /// Ticker, optionally with an exchange suffix (e.g. GSK.L).
        symbol: String,

        /// Exchange code (e.g. L, US). Falls back to suffix and metadata.
        #[arg(long)]
        exchange: Option<String>,

        /// Start date (YYYY-MM-DD). Defaults to one year ago.
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        end: Option<String>,

        /// Convert prices into this currency.
        #[arg(long)]
        currency: Option<String>,

        /// Print CSV instead of a table.
        #[arg(long, default_value_t = false)]
        csv: bool,
    },
    /// Rate converting one unit of a currency into the base currency.
    Fx {
        /// Currency code (e.g. USD, GBX).
        currency: String,

        /// Date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        date: Option<String>,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report cached series, date ranges and sizes.
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    debug!(cache = %config.cache.base_location, offline = config.cache.offline, "configuration loaded");
    let history = PriceHistory::from_config(&config)?;

    match cli.command {
        Commands::History {
            symbol,
            exchange,
            start,
            end,
            currency,
            csv,
        } => run_history(&history, symbol, exchange, start, end, currency, csv),
        Commands::Fx { currency, date } => run_fx(&history, &config, &currency, date),
        Commands::Cache { action } => match action {
            CacheAction::Status => run_cache_status(&history, &config),
        },
    }
}

fn load_config(cli: &Cli) -> Result<PriceVaultConfig> {
    let mut config = match &cli.config {
        Some(path) => PriceVaultConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => {
            let mut config = PriceVaultConfig::default();
            config.apply_env(|key| std::env::var(key).ok());
            config
        }
    };
    if cli.offline {
        config.cache.offline = true;
    }
    if let Some(cache) = &cli.cache {
        config.cache.base_location = cache.clone();
    }
    config.validate()?;
    Ok(config)
}

fn parse_date(value: Option<&str>, default: NaiveDate) -> Result<NaiveDate> {
    value
        .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}'")))
        .transpose()
        .map(|d| d.unwrap_or(default))
}

fn run_history(
    history: &PriceHistory,
    symbol: String,
    exchange: Option<String>,
    start: Option<String>,
    end: Option<String>,
    currency: Option<String>,
    csv: bool,
) -> Result<()> {
    let today = chrono::Utc::now().date_naive();
    let start = parse_date(start.as_deref(), today - chrono::Duration::days(365))?;
    let end = parse_date(end.as_deref(), today)?;

    let mut req = HistoryRequest::new(symbol, start, end);
    req.exchange = exchange;
    req.base_currency = currency;

    let bars = history.history(&req)?;
    if bars.is_empty() {
        println!("No data for {} between {start} and {end}.", req.symbol);
        return Ok(());
    }

    if csv {
        println!("Date,Open,High,Low,Close,Volume,Source");
        for b in &bars {
            println!("{},{},{},{},{},{},{}", b.date, b.open, b.high, b.low, b.close, b.volume, b.source);
        }
    } else {
        print_bars(&bars);
    }
    Ok(())
}

fn print_bars(bars: &[PriceBar]) {
    println!(
        "{:<12} {:>12} {:>12} {:>12} {:>12} {:>14} {:<14}",
        "Date", "Open", "High", "Low", "Close", "Volume", "Source"
    );
    println!("{}", "-".repeat(94));
    for b in bars {
        println!(
            "{:<12} {:>12.4} {:>12.4} {:>12.4} {:>12.4} {:>14} {:<14}",
            b.date, b.open, b.high, b.low, b.close, b.volume, b.source
        );
    }
    println!();
    println!("{} bars", bars.len());
}

fn run_fx(history: &PriceHistory, config: &PriceVaultConfig, currency: &str, date: Option<String>) -> Result<()> {
    let date = parse_date(date.as_deref(), chrono::Utc::now().date_naive())?;
    let rate = history.rate_on(currency, date)?;
    println!("1 {currency} = {rate:.6} {} on {date}", config.fx.base_currency);
    Ok(())
}

fn run_cache_status(history: &PriceHistory, config: &PriceVaultConfig) -> Result<()> {
    let mut rows = history.cache_status()?;
    if rows.is_empty() {
        println!("Cache is empty: {}", config.cache.base_location);
        return Ok(());
    }
    rows.sort_by(|a, b| (&a.symbol, &a.exchange).cmp(&(&b.symbol, &b.exchange)));

    let total_size: u64 = rows.iter().map(|r| r.size_bytes as u64).sum();
    println!("Cache: {}", config.cache.base_location);
    println!("Series: {}", rows.len());
    println!("Total size: {}", format_size(total_size));
    println!();
    println!("{:<12} {:<6} {:<25} {:<12} {:>10}", "Symbol", "Exch", "Date Range", "Bars", "Size");
    println!("{}", "-".repeat(69));
    for r in &rows {
        let range = match (r.start_date, r.end_date) {
            (Some(s), Some(e)) => format!("{s} to {e}"),
            _ => "(empty)".to_string(),
        };
        println!(
            "{:<12} {:<6} {:<25} {:<12} {:>10}",
            r.symbol,
            r.exchange,
            range,
            format!("{} bars", r.bar_count),
            format_size(r.size_bytes as u64)
        );
    }

    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
