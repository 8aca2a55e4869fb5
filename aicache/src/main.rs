use std::path::PathBuf;
use clap::{Parser, Subcommand};
use anyhow::Result;
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aicache::{
    collect_params, default_data_dir, derive_key, lookup, open_cache, parse_param, run_demo,
};
use aicache_core::AppConfig;

#[derive(Parser)]
#[command(name = "aicache")]
#[command(about = "Tiered AI-response cache", long_about = None)]
struct Cli {
    /// Directory of the file-backed cache tier
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the cache key of a request
    Key {
        model: String,
        prompt: String,

        /// Request parameter as name=value (repeatable)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
    },

    /// Look up a cached response
    Get {
        model: String,
        prompt: String,

        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
    },

    /// Store a response
    Set {
        model: String,
        prompt: String,
        response: String,

        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
    },

    /// Remove a response from both tiers
    Remove {
        model: String,
        prompt: String,

        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
    },

    /// Run concurrent requests through the batcher and report coalescing
    Demo {
        /// Number of requests to issue
        #[arg(short, long, default_value = "50")]
        requests: usize,

        /// Number of distinct prompts among them
        #[arg(short = 'k', long, default_value = "10")]
        distinct: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "aicache=info,aicache_core=info".into())
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load()?;
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);

    match cli.command {
        Commands::Key { model, prompt, params } => {
            let key = derive_key(&model, &prompt, &collect_params(params))?;
            println!("{}", key);
        }

        Commands::Get { model, prompt, params } => {
            let key = derive_key(&model, &prompt, &collect_params(params))?;
            let cache = open_cache(&data_dir, &config);

            let (value, tier) = lookup(&cache, &key).await?;
            tracing::debug!("Served {} from the {} tier", key.short(), tier);
            println!("{}", value);
        }

        Commands::Set { model, prompt, response, params } => {
            let key = derive_key(&model, &prompt, &collect_params(params))?;
            let cache = open_cache(&data_dir, &config);

            cache.set(&key, response).await;
            let stats = cache.stats().await;
            if stats.backend_errors > 0 {
                anyhow::bail!("Response cached in memory only; writing to {:?} failed", data_dir);
            }
            println!("Stored {}", key);
        }

        Commands::Remove { model, prompt, params } => {
            let key = derive_key(&model, &prompt, &collect_params(params))?;
            let cache = open_cache(&data_dir, &config);

            cache.remove(&key).await;
            println!("Removed {}", key);
        }

        Commands::Demo { requests, distinct } => {
            let report = run_demo(&config, requests, distinct).await?;

            println!("Requests:          {}", report.requests);
            println!("Distinct prompts:  {}", report.distinct);
            println!("Downstream calls:  {}", report.downstream_calls);
            println!("Failed requests:   {}", report.failures);
            println!(
                "Coalesced:         {} (batches: {}, size flushes: {}, timer flushes: {})",
                report.batch_stats.coalesced,
                report.batch_stats.batches,
                report.batch_stats.size_flushes,
                report.batch_stats.timer_flushes
            );
            println!("{}", report.cache_stats);
        }
    }

    Ok(())
}
