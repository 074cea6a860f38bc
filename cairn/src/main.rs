mod commands;
mod formatting;

use std::path::PathBuf;

use anyhow::Result;
use cairn_core::config::parse_log_level;
use clap::{Parser, Subcommand};
use tracing::Level;

use crate::commands::Overrides;

#[derive(Parser)]
#[command(name = "cairn")]
#[command(about = "Build cache for CI pipelines: archive directories, upload them and restore them")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file. Defaults to ./cairn.toml when present.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// trace, debug, info, warn or error
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(short, long, action, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Archive mounts and upload them under the cache key
    Rebuild {
        /// Paths to cache. Defaults to the configured mounts.
        mounts: Vec<String>,
        /// Skip mounts whose object already exists
        #[arg(long, action)]
        no_override: bool,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Download cached mounts and extract them
    Restore {
        /// Paths to restore. Defaults to everything stored under the key.
        mounts: Vec<String>,
        /// Fail when nothing is stored under the key
        #[arg(long, action)]
        fail_if_key_not_present: bool,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Print the cache key for the current build
    Key {
        #[arg(long, action)]
        json: bool,
        #[command(flatten)]
        overrides: Overrides,
    },
}

fn log_level(cli: &Cli) -> Result<Level> {
    if cli.quiet {
        return Ok(Level::ERROR);
    }
    if let Some(level) = &cli.log_level {
        return Ok(parse_log_level(level)?);
    }
    Ok(match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(log_level(&cli)?)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Rebuild {
            mounts,
            no_override,
            overrides,
        } => commands::cmd_rebuild(config_path, &overrides, mounts, no_override)?,
        Commands::Restore {
            mounts,
            fail_if_key_not_present,
            overrides,
        } => commands::cmd_restore(config_path, &overrides, mounts, fail_if_key_not_present)?,
        Commands::Key { json, overrides } => commands::cmd_key(config_path, &overrides, json)?,
    }

    Ok(())
}
