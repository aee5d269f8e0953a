//! Exposes the command line application.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pluginverifier_repository::config::Config;
use pluginverifier_repository::resources::SpaceAmount;
use pluginverifier_repository::{logging, metrics};

use crate::commands;

/// cachectl commands.
#[derive(Subcommand)]
enum Command {
    /// Print the files in a file repository and the space they take.
    Status {
        /// The repository directory. Defaults to `downloads` in the configured cache directory.
        dir: Option<PathBuf>,
    },

    /// Delete the least recently used files until the repository fits its disk space setting.
    ///
    /// Downloads that are still in progress are not touched.
    Cleanup {
        /// The repository directory. Defaults to `downloads` in the configured cache directory.
        dir: Option<PathBuf>,

        /// Only print the files that would be deleted.
        #[arg(long)]
        dry_run: bool,

        /// Overrides `repositories.downloads.max_space`, e.g. `5 GB`.
        #[arg(long, value_name = "SIZE")]
        max_space: Option<SpaceAmount>,

        /// Overrides `repositories.downloads.low_space_threshold`.
        #[arg(long, value_name = "SIZE")]
        low_space_threshold: Option<SpaceAmount>,
    },
}

/// Command line interface parser.
#[derive(Parser)]
#[command(name = "cachectl", version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config.as_deref()).context("failed loading config")?;

    logging::init_logging(&config);
    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )
        .context("failed to configure metrics")?;
    }

    match cli.command {
        Command::Status { dir } => commands::status(&repository_dir(&config, dir)?),
        Command::Cleanup {
            dir,
            dry_run,
            max_space,
            low_space_threshold,
        } => {
            let mut downloads = config.repositories.downloads;
            if max_space.is_some() {
                downloads.max_space = max_space;
            }
            if low_space_threshold.is_some() {
                downloads.low_space_threshold = low_space_threshold;
            }
            let disk_space = downloads
                .disk_space()
                .context("no disk space limit configured, pass --max-space")?;
            commands::cleanup(&repository_dir(&config, dir)?, disk_space, dry_run)
        }
    }
}

fn repository_dir(config: &Config, dir: Option<PathBuf>) -> Result<PathBuf> {
    dir.or_else(|| config.cache_dir("downloads"))
        .context("no repository directory given and no cache_dir configured")
}
