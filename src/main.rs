use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{self, EnvFilter};

use tickvault::engine::{ChainParams, QueryEngine, RangeParams};
use tickvault::envelope::{self, CacheState, Envelope, LatencyRecorder, Meta};
use tickvault::error::{EngineError, Result};
use tickvault::quality;
use tickvault::store::{Category, Granularity, Store};
use tickvault::universe::UniverseCatalog;
use tickvault::EngineConfig;

#[derive(Parser)]
#[command(author, version, about = "Historical market-data dataset engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report the dataset root and per-category partition counts
    Discover,
    /// Print the engine version envelope
    Version,
    /// List partition files per category
    ListDatasets,
    /// Range-scan bars for a symbol
    GetBars {
        #[arg(long)]
        symbol: String,
        /// Start date (YYYY-MM-DD, inclusive)
        #[arg(long)]
        from: String,
        /// End date (YYYY-MM-DD, inclusive)
        #[arg(long)]
        to: String,
        /// 1m, 5m or 1d
        #[arg(long, default_value = "1m")]
        granularity: String,
        /// indices, etfs or stocks
        #[arg(long, default_value = "stocks")]
        category: String,
        /// json (single envelope) or jsonl (record-framed stream)
        #[arg(long, default_value = "json")]
        format: String,
    },
    /// Options-chain projection for one trading day
    GetOptions {
        #[arg(long)]
        symbol: String,
        /// Trading day (YYYY-MM-DD)
        #[arg(long)]
        date: String,
        #[arg(long, default_value = "json")]
        format: String,
        /// Strikes above/below spot kept in focus
        #[arg(long, default_value_t = 10)]
        atm_window: u32,
    },
    /// Acquire raw bars from an upstream vendor (provider boundary)
    AcquireData {
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long, default_value = "1m")]
        interval: String,
        #[arg(long)]
        output: Option<String>,
    },
    /// Report the configured data-provider boundary
    ProviderStatus,
}

#[derive(Serialize)]
struct BarsPayload {
    bars: Vec<tickvault::engine::EquityBar>,
}

#[derive(Serialize)]
struct ChainPayload {
    underlying: String,
    truncated: bool,
    chain: Vec<tickvault::engine::ChainRow>,
}

#[derive(Serialize)]
struct DiscoverPayload {
    data_root: String,
    categories: Vec<CategoryStats>,
}

#[derive(Serialize)]
struct CategoryStats {
    category: Category,
    partitions: usize,
}

#[derive(Serialize)]
struct DatasetListing {
    category: Category,
    partitions: Vec<String>,
}

fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(()) => 0,
        Err(err) => {
            let envelope = Envelope::<()>::failure(&err, Meta::default());
            match serde_json::to_string_pretty(&envelope) {
                Ok(body) => println!("{body}"),
                Err(e) => eprintln!("error envelope encode failed: {e}"),
            }
            err.exit_code()
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<()> {
    let config = EngineConfig::from_env();
    let store = Arc::new(Store::open(config));
    let catalog = Arc::new(UniverseCatalog::builtin());
    let engine = QueryEngine::new(store.clone(), catalog);
    let recorder = LatencyRecorder::new();

    let result = dispatch(&cli.command, &store, &engine, &recorder);
    store.close();
    result
}

fn dispatch(
    command: &Commands,
    store: &Arc<Store>,
    engine: &QueryEngine,
    recorder: &LatencyRecorder,
) -> Result<()> {
    match command {
        Commands::Discover => {
            let categories = Category::ALL
                .iter()
                .map(|category| CategoryStats {
                    category: *category,
                    partitions: partition_files(store, *category).len(),
                })
                .collect();
            let payload = DiscoverPayload {
                data_root: store.config.data_root.display().to_string(),
                categories,
            };
            print_success(payload, Meta::default());
            Ok(())
        }
        Commands::Version => {
            let payload = serde_json::json!({
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            });
            print_success(payload, Meta::default());
            Ok(())
        }
        Commands::ListDatasets => {
            let listings: Vec<DatasetListing> = Category::ALL
                .iter()
                .map(|category| DatasetListing {
                    category: *category,
                    partitions: partition_files(store, *category),
                })
                .collect();
            print_success(listings, Meta::default());
            Ok(())
        }
        Commands::GetBars {
            symbol,
            from,
            to,
            granularity,
            category,
            format,
        } => {
            let params = RangeParams {
                category: Category::parse(category)?,
                symbol: symbol.clone(),
                from: parse_date(from)?,
                to: parse_date(to)?,
                granularity: Granularity::parse(granularity)?,
            };
            let started = Instant::now();
            let scan = engine.range_bars(&params)?;
            let first_byte = Instant::now();
            recorder.record("get-bars", started.elapsed().as_secs_f64() * 1000.0);

            let cache = if scan.info.cache_warm {
                CacheState::Warm
            } else {
                CacheState::Cold
            };
            let mut meta = Meta::for_rows(
                scan.bars.len(),
                started,
                Some(first_byte),
                cache,
                scan.info.source(),
            )
            .with_quality(quality::validate_equity_bars(&scan.bars));
            meta.latency = recorder.snapshot("get-bars");

            if format == "jsonl" {
                let stdout = std::io::stdout();
                let mut out = stdout.lock();
                envelope::stream_bars(&mut out, symbol, granularity, &scan.bars, &meta)?;
            } else {
                print_success(BarsPayload { bars: scan.bars }, meta);
            }
            Ok(())
        }
        Commands::GetOptions {
            symbol,
            date,
            format,
            atm_window,
        } => {
            let day = parse_date(date)?;
            let params = ChainParams {
                underlying: symbol.clone(),
                from: day,
                to: day,
                atm_window: *atm_window,
                dte_focus: Vec::new(),
            };
            let started = Instant::now();
            let chain = engine.options_chain(&params)?;
            let first_byte = Instant::now();
            recorder.record("get-options", started.elapsed().as_secs_f64() * 1000.0);

            let cache = if chain.info.cache_warm {
                CacheState::Warm
            } else {
                CacheState::Cold
            };
            let mut meta = Meta::for_rows(
                chain.rows.len(),
                started,
                Some(first_byte),
                cache,
                chain.info.source(),
            );
            meta.latency = recorder.snapshot("get-options");

            if format == "jsonl" {
                let stdout = std::io::stdout();
                let mut out = stdout.lock();
                envelope::stream_options(&mut out, &chain.underlying, &chain.rows, &meta)?;
            } else {
                print_success(
                    ChainPayload {
                        underlying: chain.underlying,
                        truncated: chain.truncated,
                        chain: chain.rows,
                    },
                    meta,
                );
            }
            Ok(())
        }
        Commands::AcquireData {
            symbol,
            from,
            to,
            interval,
            output,
        } => {
            tracing::info!(%symbol, %from, %to, %interval, ?output, "acquire-data requested");
            Err(EngineError::InvalidInput(format!(
                "acquire-data for {symbol} is served by the provider boundary, not the core \
                 engine; wire a DataProvider implementation and ingest its bars"
            )))
        }
        Commands::ProviderStatus => {
            print_success(tickvault::provider::unconfigured_status(), Meta::default());
            Ok(())
        }
    }
}

fn print_success<T: Serialize>(data: T, meta: Meta) {
    let envelope = Envelope::success(data, meta);
    match serde_json::to_string_pretty(&envelope) {
        Ok(body) => println!("{body}"),
        Err(e) => eprintln!("envelope encode failed: {e}"),
    }
}

fn parse_date(raw: &str) -> Result<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| EngineError::InvalidInput(format!("malformed date: {raw:?}")))
}

fn partition_files(store: &Arc<Store>, category: Category) -> Vec<String> {
    let dir = store.config.category_dir(category);
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(std::result::Result::ok)
        .filter_map(|e| {
            let path = e.path();
            if path.extension().is_some_and(|ext| ext == "db") {
                path.file_name().map(|n| n.to_string_lossy().to_string())
            } else {
                None
            }
        })
        .collect();
    names.sort();
    names
}
