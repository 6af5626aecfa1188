//! Region management CLI commands.

use std::time::Duration;

use clap::Subcommand;
use indicatif::{ProgressBar, ProgressStyle};
use tilecache::cache::TileSource;
use tilecache::storage::{Region, RegionStatus};
use tracing::{info, warn};

use super::common::{BboxArgs, Settings};
use crate::error::CliError;

/// Region action subcommands.
#[derive(Debug, Subcommand)]
pub enum RegionAction {
    /// List regions and their status
    List,
    /// Register an empty region without downloading it
    Add {
        /// Region name
        name: String,
        #[command(flatten)]
        bbox: BboxArgs,
    },
    /// Rename a region
    Rename {
        /// Current name
        old: String,
        /// New name
        new: String,
    },
    /// Delete a region and its storage file
    Delete {
        /// Region name
        name: String,
    },
    /// Download every tile of an area into a region
    Download {
        /// Region name
        name: String,
        #[command(flatten)]
        bbox: BboxArgs,
        /// Lowest zoom level
        #[arg(long, default_value = "0")]
        min_zoom: u8,
        /// Highest zoom level
        #[arg(long)]
        max_zoom: u8,
    },
}

/// Run a region subcommand.
pub fn run(settings: &Settings, action: RegionAction) -> Result<(), CliError> {
    match action {
        RegionAction::List => list(settings),
        RegionAction::Add { name, bbox } => {
            let storage = settings.open_storage()?;
            let region = storage.region_add(&name, bbox.bbox()?)?;
            println!("Added region '{}' ({})", region.name, region.filename);
            Ok(())
        }
        RegionAction::Rename { old, new } => {
            let storage = settings.open_storage()?;
            storage.region_rename(&old, &new)?;
            println!("Renamed region '{}' to '{}'", old, new);
            Ok(())
        }
        RegionAction::Delete { name } => {
            let storage = settings.open_storage()?;
            let region = storage.region_delete(&name)?;
            println!("Deleted region '{}' ({})", region.name, region.filename);
            Ok(())
        }
        RegionAction::Download {
            name,
            bbox,
            min_zoom,
            max_zoom,
        } => download(settings, &name, &bbox, min_zoom, max_zoom),
    }
}

fn list(settings: &Settings) -> Result<(), CliError> {
    let storage = settings.open_storage()?;
    let regions = storage.regions();
    if regions.is_empty() {
        println!("No regions");
        return Ok(());
    }

    let stats = storage.stats();
    for region in &regions {
        let tiles = stats
            .regions
            .iter()
            .find(|(name, _)| name == &region.name)
            .map(|(_, file)| file.entries)
            .unwrap_or(0);
        print_region(region, tiles);
    }
    Ok(())
}

fn print_region(region: &Region, tiles: usize) {
    let b = &region.bbox;
    println!(
        "{:<20} {:<12} {:>8} tiles  [{:.4}, {:.4}] - [{:.4}, {:.4}]  {}",
        region.name,
        region.status.to_string(),
        tiles,
        b.min_lat,
        b.min_lon,
        b.max_lat,
        b.max_lon,
        region.timestamp.format("%Y-%m-%d %H:%M:%S")
    );
}

fn download(
    settings: &Settings,
    name: &str,
    bbox: &BboxArgs,
    min_zoom: u8,
    max_zoom: u8,
) -> Result<(), CliError> {
    if min_zoom > max_zoom {
        return Err(CliError::Usage(format!(
            "--min-zoom {} is above --max-zoom {}",
            min_zoom, max_zoom
        )));
    }

    let cache = settings.open_cache()?;
    let (_, mut rx) = cache.subscribe_channel();
    let total = cache.download_region(name, bbox.bbox()?, min_zoom..=max_zoom)?;

    let progress = ProgressBar::new(total as u64);
    progress.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} tiles ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    progress.enable_steady_tick(Duration::from_millis(200));

    let mut done = 0usize;
    let mut failed = 0usize;
    while done < total {
        let Some(notification) = rx.blocking_recv() else {
            break;
        };
        if notification.source != TileSource::Region(name.to_string()) {
            continue;
        }
        done += 1;
        if !notification.success {
            failed += 1;
            warn!(key = %notification.key, region = name, "Tile download failed");
        }
        progress.inc(1);
    }
    progress.finish_and_clear();
    cache.shutdown();

    let status = cache
        .storage()
        .region(name)
        .map(|r| r.status)
        .unwrap_or(RegionStatus::Invalid);
    info!(region = name, total, failed, status = %status, "Region download finished");

    println!(
        "Region '{}': {} tiles, {} failed, status {}",
        name, total, failed, status
    );
    if status == RegionStatus::Stored {
        Ok(())
    } else {
        Err(CliError::RegionIncomplete {
            name: name.to_string(),
            failed,
        })
    }
}
