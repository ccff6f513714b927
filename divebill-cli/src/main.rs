mod cli;
mod output;

use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
#[cfg(feature = "colored-output")]
use colored::*;
use config_store::{StoreSettings, SupabaseStore};
use pricing_cache::{CacheConfig, PricingCache, ValueParsing};
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::cli::{Args, Commands, OutputFormat};

/// Default log filter directive.
const DEFAULT_LOG_FILTER: &str = "divebill=info,pricing_cache=info,config_store=info";
const VERBOSE_LOG_FILTER: &str = "divebill=debug,pricing_cache=debug,config_store=debug";
const QUIET_LOG_FILTER: &str = "warn";

/// How often `watch` checks that the change feed is still alive.
const FEED_CHECK_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let output_format = args.command.output_format();

    if let Err(e) = run(args).await {
        if output_format.is_json() {
            println!("{}", output::error_json(&format!("{e:#}")));
        } else {
            error!("Application error: {:#}", e);
            #[cfg(feature = "colored-output")]
            {
                eprintln!("{} {:#}", "Error:".red().bold(), e);
            }
            #[cfg(not(feature = "colored-output"))]
            {
                eprintln!("Error: {:#}", e);
            }
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    load_env(args.env_file.as_deref())?;
    init_logging(args.verbose, args.quiet, args.log_json)?;

    let settings = StoreSettings::from_env().context("failed to load store settings")?;
    info!(
        table = %settings.table,
        schema = %settings.schema,
        "Using configuration store at {}",
        settings.base_url
    );

    let store = SupabaseStore::new(settings).context("failed to create store client")?;
    let parsing = if args.lenient {
        ValueParsing::Lenient
    } else {
        ValueParsing::Strict
    };
    let config = CacheConfig::default()
        .with_ttl(Duration::from_secs(args.ttl_secs))
        .with_parsing(parsing);
    let cache = PricingCache::with_config(Arc::new(store), config);

    match args.command {
        Commands::Show { output, key } => show(&cache, output, key.as_deref()).await,
        Commands::Watch { output } => watch(&cache, output).await,
    }
}

async fn show(
    cache: &PricingCache<SupabaseStore>,
    format: OutputFormat,
    key: Option<&str>,
) -> Result<()> {
    let pricing = cache.get_config().await?;
    output::print(&pricing, format, key)
}

async fn watch(cache: &PricingCache<SupabaseStore>, format: OutputFormat) -> Result<()> {
    let pricing = cache.get_config().await?;
    output::print(&pricing, format, None)?;

    let changed = Arc::new(Notify::new());
    let subscription = {
        let changed = changed.clone();
        cache
            .subscribe_to_changes(move || changed.notify_one())
            .await?
    };
    info!("Watching pricing configuration, press Ctrl-C to stop");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut feed_check = tokio::time::interval(FEED_CHECK_INTERVAL);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("failed to listen for Ctrl-C")?;
                info!("Stopping watch");
                break;
            }

            _ = changed.notified() => match cache.get_config().await {
                Ok(pricing) => output::print(&pricing, format, None)?,
                Err(e) => warn!("Failed to reload pricing after change: {}", e),
            },

            _ = feed_check.tick() => {
                if !subscription.is_active() {
                    warn!("Change feed ended, stopping watch");
                    break;
                }
            }
        }
    }

    subscription.shutdown().await;
    Ok(())
}

/// Load `.env` (or the given file) into the process environment.
fn load_env(path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("failed to read env file {}", path.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
    Ok(())
}

/// Logs go to stderr so stdout stays clean for JSON output.
fn init_logging(verbose: bool, quiet: bool, json: bool) -> Result<()> {
    let default_filter = if verbose {
        VERBOSE_LOG_FILTER
    } else if quiet {
        QUIET_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
    }
    Ok(())
}
