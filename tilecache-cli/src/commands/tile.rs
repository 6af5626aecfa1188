//! Single tile commands.

use std::fs;
use std::path::PathBuf;

use tilecache::cache::{TileNotification, TileSource};
use tilecache::TileKey;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

use super::common::{Settings, TileArgs};
use crate::error::CliError;

/// Fetch one tile, from storage if present or else from the provider.
pub fn get(settings: &Settings, tile: &TileArgs, output: Option<PathBuf>) -> Result<(), CliError> {
    let key = tile.key()?;
    let cache = settings.open_cache()?;
    let (_, mut rx) = cache.subscribe_channel();

    cache.query(key);
    let notification = wait_for(&mut rx, key)?;
    cache.shutdown();

    let data = match notification.data {
        Some(data) if notification.success => data,
        _ => return Err(CliError::TileFailed(key.to_string())),
    };
    let from = match notification.source {
        TileSource::Storage => "storage",
        _ => "network",
    };

    match output {
        Some(path) => {
            fs::write(&path, &data).map_err(|error| CliError::FileWrite {
                path: path.clone(),
                error,
            })?;
            println!(
                "Tile {} ({} bytes, {}) written to {}",
                key,
                data.len(),
                from,
                path.display()
            );
        }
        None => println!("Tile {}: {} bytes from {}", key, data.len(), from),
    }
    Ok(())
}

/// Report whether a tile is stored and where.
pub fn exists(settings: &Settings, tile: &TileArgs) -> Result<(), CliError> {
    let key = tile.key()?;
    let storage = settings.open_storage()?;

    match storage.get_key_pair(&key) {
        Some(location) => println!(
            "Tile {} is stored in {} ({} bytes, used {} times)",
            key, location.file, location.entry.size, location.entry.counter
        ),
        None => println!("Tile {} is not stored", key),
    }
    Ok(())
}

/// Blocks until the query for `key` completes.
fn wait_for(
    rx: &mut UnboundedReceiver<TileNotification>,
    key: TileKey,
) -> Result<TileNotification, CliError> {
    while let Some(notification) = rx.blocking_recv() {
        if notification.key == key && !matches!(notification.source, TileSource::Region(_)) {
            return Ok(notification);
        }
        debug!(key = %notification.key, "Ignoring unrelated notification");
    }
    Err(CliError::TileFailed(key.to_string()))
}
