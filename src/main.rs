//! Administrative command-line tool for a strata cache directory.

mod cli;
mod error;
mod size;

use crate::cli::{Cli, Command};
use crate::error::{ErrorKind, Result};
use clap::Parser;
use exn::ResultExt;
use std::process::ExitCode;
use strata_cache::{Cache, CacheKey, CacheOptions};
use strata_config::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        },
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    if let Some(root) = cli.root {
        config.cache.root = root;
    }
    let cache = Cache::open(CacheOptions::from(&config.cache)).await.or_raise(|| ErrorKind::Cache)?;
    let result = execute(&cache, cli.command).await;
    cache.close().await;
    result
}

async fn execute(cache: &Cache, command: Command) -> Result<()> {
    match command {
        Command::Stats { json } => {
            let stats = cache.statistics().await.or_raise(|| ErrorKind::Cache)?;
            if json {
                let text = serde_json::to_string_pretty(&stats).or_raise(|| ErrorKind::Output)?;
                println!("{text}");
            } else {
                println!("cache root:             {}", cache.root().display());
                print!("{stats}");
            }
        },
        Command::Clear { classifications: true } => {
            let removed = cache.clear_classifications().await.or_raise(|| ErrorKind::Cache)?;
            println!("Removed {removed} classifications");
        },
        Command::Clear { classifications: false } => {
            let report = cache.clear_all().await.or_raise(|| ErrorKind::Cache)?;
            println!(
                "Removed {} structures, {} classifications and {} snapshots",
                report.structures, report.classifications, report.snapshots
            );
        },
        Command::ClearOne { key } => {
            let key: CacheKey = key.parse::<CacheKey>().or_raise(|| ErrorKind::InvalidArgument(key.clone()))?;
            if cache.clear_one(&key).await.or_raise(|| ErrorKind::Cache)? {
                println!("Removed {key}");
            } else {
                println!("No entry for {key}");
            }
        },
        Command::Evict { size } => {
            let report = cache.evict_to_target(size.0).await.or_raise(|| ErrorKind::Cache)?;
            println!(
                "Evicted {} entries, {} -> {} bytes",
                report.evicted(),
                report.before_bytes,
                report.after_bytes
            );
        },
        Command::Repair => {
            let report = cache.repair_from_backup().await.or_raise(|| ErrorKind::Cache)?;
            println!(
                "Scanned {} snapshots: restored {}, deleted {} corrupt",
                report.scanned, report.restored, report.purged
            );
        },
    }
    Ok(())
}
