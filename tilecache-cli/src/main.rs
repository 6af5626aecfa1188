//! TileCache CLI - Command-line interface
//!
//! Inspects and fills a tile cache directory: storage statistics, single
//! tile lookups and region management.

mod commands;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tilecache::logging::{init_logging, DEFAULT_LOG_FILE};
use tracing::debug;

use commands::common::{default_config_path, default_log_dir, Settings, TileArgs};
use commands::region::RegionAction;
use error::CliError;

#[derive(Parser)]
#[command(name = "tilecache")]
#[command(version, about = "Disk-backed quadtree tile cache", long_about = None)]
struct Cli {
    /// Config file with [cache] and [provider] sections
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache directory, overriding the config file
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Directory for the log file
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show storage statistics
    Info,

    /// Fetch a tile through the cache
    Get {
        #[command(flatten)]
        tile: TileArgs,

        /// Write the tile to this file
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Check whether a tile is stored
    Exists {
        #[command(flatten)]
        tile: TileArgs,
    },

    /// Empty the main storage file, deleting its tiles (regions are kept)
    Flush,

    /// Manage named regions
    Region {
        #[command(subcommand)]
        action: RegionAction,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let log_dir = cli.log_dir.unwrap_or_else(default_log_dir);
    let _logging = init_logging(&log_dir, DEFAULT_LOG_FILE).map_err(CliError::LoggingInit)?;

    let config_path = cli.config.unwrap_or_else(default_config_path);
    debug!(config = %config_path.display(), "Loading settings");
    let settings = Settings::load(&config_path, cli.cache_dir)?;

    match cli.command {
        Commands::Info => commands::storage::info(&settings),
        Commands::Get { tile, output } => commands::tile::get(&settings, &tile, output),
        Commands::Exists { tile } => commands::tile::exists(&settings, &tile),
        Commands::Flush => commands::storage::flush(&settings),
        Commands::Region { action } => commands::region::run(&settings, action),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_region_download() {
        let cli = Cli::try_parse_from([
            "tilecache",
            "--cache-dir",
            "/tmp/tiles",
            "region",
            "download",
            "alps",
            "--min-lat",
            "45.8",
            "--min-lon",
            "6.0",
            "--max-lat",
            "47.8",
            "--max-lon",
            "10.5",
            "--max-zoom",
            "8",
        ])
        .unwrap();

        assert_eq!(cli.cache_dir, Some(PathBuf::from("/tmp/tiles")));
        match cli.command {
            Commands::Region {
                action:
                    RegionAction::Download {
                        name,
                        min_zoom,
                        max_zoom,
                        ..
                    },
            } => {
                assert_eq!(name, "alps");
                assert_eq!((min_zoom, max_zoom), (0, 8));
            }
            _ => panic!("expected region download"),
        }
    }

    #[test]
    fn test_parse_get_with_negative_longitude() {
        let cli = Cli::try_parse_from([
            "tilecache", "get", "--zoom", "12", "--lat", "40.7", "--lon", "-74.0",
        ])
        .unwrap();

        match cli.command {
            Commands::Get { tile, output } => {
                assert_eq!(tile.lon, Some(-74.0));
                assert!(output.is_none());
            }
            _ => panic!("expected get"),
        }
    }
}
