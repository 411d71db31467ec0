//! Command-line interface definitions and dispatch.

mod cache;
mod quota;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use usage_governor::GovernorConfig;

#[derive(Parser, Debug)]
#[command(
    name = "usage-governor",
    version,
    about = "Inspect and manage LLM API usage quotas and the response cache"
)]
pub struct Cli {
    /// Config file (default: ~/.usage-governor/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding usage.json, responses.json and usage_log.jsonl
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show used vs limit for today and this month
    Status {
        /// Also show this user's usage
        #[arg(long)]
        user: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Ask whether a call would be allowed right now (exit code 1 if not)
    Check {
        #[arg(long)]
        user: Option<String>,
        /// Also apply the feature kill-switch
        #[arg(long)]
        feature: Option<String>,
    },
    /// Reset usage counters
    Reset {
        /// Reset only this user (global counters are kept)
        #[arg(long)]
        user: Option<String>,
    },
    /// List the feature allow-list
    Features,
    /// Per-feature calls, tokens and cost from the usage log
    Report,
    /// Response cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheSubcommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheSubcommand {
    /// Entry count and size
    Stats,
    /// Remove expired entries
    Purge,
    /// Remove all entries
    Clear,
}

/// Load config honoring `--config` and `--data-dir`.
fn load_config(cli: &Cli) -> Result<GovernorConfig> {
    let mut config = GovernorConfig::load(cli.config.as_deref()).context("failed to load config")?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }
    Ok(config)
}

/// Dispatch a parsed command line. Returns the process exit code.
pub fn run(cli: Cli) -> Result<i32> {
    let config = load_config(&cli)?;
    tracing::debug!(data_dir = %config.data_dir().display(), "loaded config");

    match cli.command {
        Command::Status { user, json } => quota::cmd_status(&config, user.as_deref(), json),
        Command::Check { user, feature } => {
            quota::cmd_check(&config, user.as_deref(), feature.as_deref())
        }
        Command::Reset { user } => quota::cmd_reset(&config, user.as_deref()),
        Command::Features => quota::cmd_features(&config),
        Command::Report => quota::cmd_report(&config),
        Command::Cache { action } => cache::cmd_cache(&config, action),
    }
}
