//! Analysis Cache CLI
//!
//! Inspect and maintain an analysis cache from the command line.
//!
//! ```text
//! analysis-cache [--config cache.yaml] <get|set|remove|stats|clear|purge|sweep|pre-warm|export>
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use analysis_cache::cache::{load_warmup_file, warmup_items};
use analysis_cache::{
    spawn_sweeper, CacheConfig, CacheEntry, CacheFactory, CacheProvider, CacheStats, Expiry,
};
use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Fallback sweep interval when neither the flag nor the config sets one
const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 300;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Analysis Cache - inspect and maintain the multi-tier result cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cache configuration file (YAML or JSON)
    #[arg(long, env = "ANALYSIS_CACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Base directory of the default [memory, sqlite] stack
    #[arg(long, env = "ANALYSIS_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the cached value for a key
    Get { key: String },

    /// Store a value
    Set {
        key: String,
        value: String,
        /// Expire after this many seconds instead of the tier default
        #[arg(long)]
        ttl_seconds: Option<u64>,
    },

    /// Remove a key from every tier
    Remove { key: String },

    /// Show cache statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove every entry
    Clear,

    /// Delete expired entries once
    Purge,

    /// Delete expired entries periodically until interrupted
    Sweep {
        #[arg(long)]
        interval_seconds: Option<u64>,
    },

    /// Seed the cache with built-in analysis results
    PreWarm {
        /// JSON object of extra entries; overrides built-in keys
        #[arg(long)]
        warmup_file: Option<PathBuf>,
    },

    /// Write every live entry to a JSON file
    Export {
        #[arg(long)]
        export_file: PathBuf,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;
    let cache = CacheFactory::create(&config).context("failed to open cache")?;
    info!(kind = %cache.kind(), "cache opened");

    let code = run(&args.command, &config, Arc::clone(&cache)).await;

    if let Err(e) = cache.close() {
        warn!("error closing cache: {}", e);
    }
    code
}

fn load_config(args: &Args) -> anyhow::Result<CacheConfig> {
    match &args.config {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("cannot load config from {}", path.display())),
        None => {
            let base = args
                .cache_dir
                .clone()
                .unwrap_or_else(CacheConfig::default_base_dir);
            Ok(CacheConfig::default_tiered(base))
        }
    }
}

async fn run(
    command: &Command,
    config: &CacheConfig,
    cache: Arc<dyn CacheProvider>,
) -> anyhow::Result<ExitCode> {
    match command {
        Command::Get { key } => match cache.get(key) {
            Some(value) => {
                println!("{}", String::from_utf8_lossy(&value));
                Ok(ExitCode::SUCCESS)
            }
            None => {
                eprintln!("miss: {}", key);
                Ok(ExitCode::FAILURE)
            }
        },

        Command::Set {
            key,
            value,
            ttl_seconds,
        } => {
            let ttl = ttl_seconds.map_or(Expiry::Default, Expiry::seconds);
            cache
                .set(key, Bytes::from(value.clone()), ttl)
                .with_context(|| format!("cannot cache {}", key))?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Remove { key } => {
            if cache.remove(key) {
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("not cached: {}", key);
                Ok(ExitCode::FAILURE)
            }
        }

        Command::Stats { json } => {
            let stats = cache.stats();
            if *json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats, 0);
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Clear => {
            cache.clear().context("clear failed")?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Purge => {
            let purged = cache.purge_expired();
            println!("purged {} expired entries", purged);
            Ok(ExitCode::SUCCESS)
        }

        Command::Sweep { interval_seconds } => {
            let every = interval_seconds
                .map(Duration::from_secs)
                .or_else(|| config.sweep_interval())
                .unwrap_or(Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECONDS));
            anyhow::ensure!(!every.is_zero(), "sweep interval must be greater than zero");

            let sweeper = spawn_sweeper(cache, every);
            tokio::signal::ctrl_c()
                .await
                .context("cannot listen for Ctrl-C")?;
            info!("interrupt received, stopping sweeper");

            let total = sweeper.shutdown().await;
            println!("purged {} expired entries", total);
            Ok(ExitCode::SUCCESS)
        }

        Command::PreWarm { warmup_file } => {
            let extra = warmup_file
                .as_ref()
                .map(load_warmup_file)
                .transpose()
                .context("cannot load warm-up entries")?;
            let stored = cache.pre_warm(warmup_items(extra)).context("pre-warm failed")?;
            println!("cache pre-warmed with {} entries", stored);
            Ok(ExitCode::SUCCESS)
        }

        Command::Export { export_file } => {
            let entries = cache.entries().context("cannot list cache entries")?;
            let document = export_document(entries);
            let count = document.len();
            std::fs::write(
                export_file,
                serde_json::to_vec_pretty(&serde_json::Value::Object(document))?,
            )
            .with_context(|| format!("cannot write {}", export_file.display()))?;
            println!("exported {} entries to {}", count, export_file.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Key to value map; JSON payloads stay structured, other text becomes a string
fn export_document(entries: Vec<(String, CacheEntry)>) -> serde_json::Map<String, serde_json::Value> {
    let mut document = serde_json::Map::new();
    for (key, entry) in entries {
        let value = match serde_json::from_slice(entry.value()) {
            Ok(value) => value,
            Err(_) => match std::str::from_utf8(entry.value()) {
                Ok(text) => serde_json::Value::String(text.to_string()),
                Err(_) => {
                    warn!(key = %key, "skipping binary entry in export");
                    continue;
                }
            },
        };
        document.insert(key, value);
    }
    document
}

fn print_stats(stats: &CacheStats, depth: usize) {
    let pad = "  ".repeat(depth);
    println!("{}{}", pad, stats.kind);
    println!("{}  entries:     {}", pad, stats.size);
    println!(
        "{}  hits/misses: {}/{} ({:.1}%)",
        pad,
        stats.hits,
        stats.misses,
        stats.hit_rate * 100.0
    );
    println!("{}  sets:        {}", pad, stats.sets);
    println!("{}  evictions:   {}", pad, stats.evictions);
    println!("{}  expirations: {}", pad, stats.expirations);
    if let Some(pending) = stats.pending_expired {
        println!("{}  pending expired: {}", pad, pending);
    }
    if stats.promotions > 0 || stats.promotion_failures > 0 {
        println!(
            "{}  promotions:  {} ({} failed)",
            pad, stats.promotions, stats.promotion_failures
        );
    }
    if let Some(location) = &stats.location {
        println!("{}  location:    {}", pad, location);
    }
    for tier in &stats.tiers {
        print_stats(tier, depth + 1);
    }
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // stdout carries command output
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
