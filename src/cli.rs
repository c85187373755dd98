use crate::size::ByteSize;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "strata", version)]
#[command(about = "Inspect and maintain a strata document cache", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, global = true, env = "STRATA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Cache directory, overriding the configured root
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print entry counts, sizes and the most accessed entries
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove every entry from every tier
    Clear {
        /// Only remove heading classifications
        #[arg(long)]
        classifications: bool,
    },
    /// Remove a single structure entry by key
    ClearOne {
        /// Structure cache key, as printed by `stats`
        key: String,
    },
    /// Evict least recently used entries down to a size (e.g. 512MB, 1GiB)
    Evict {
        size: ByteSize,
    },
    /// Restore durable entries from backup snapshots and delete corrupt snapshots
    Repair,
}
