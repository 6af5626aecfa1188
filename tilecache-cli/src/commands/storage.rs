//! Storage inspection and maintenance commands.

use tilecache::config::format_size;
use tilecache::storage::{FileStats, Storage};
use tracing::info;

use super::common::Settings;
use crate::error::CliError;

/// Print per-file statistics.
pub fn info(settings: &Settings) -> Result<(), CliError> {
    let storage = settings.open_storage()?;
    let stats = storage.stats();

    println!("Cache directory: {}", storage.directory().display());
    println!("Provider:        {}", settings.provider.name);
    println!("Distinct tiles:  {}", stats.distinct_keys);
    println!();
    print_file("main", &stats.main);
    for (name, file) in &stats.regions {
        print_file(&format!("region {}", name), file);
    }
    Ok(())
}

/// Empty the main storage file, deleting every tile it holds.
///
/// Region files are left alone.
pub fn flush(settings: &Settings) -> Result<(), CliError> {
    let storage = settings.open_storage()?;
    let removed = empty_main(&storage)?;
    info!(directory = %storage.directory().display(), removed, "Main storage flushed");
    println!("Removed {} tiles from main storage", removed);
    Ok(())
}

/// Flushes the main file and returns how many tiles it held.
fn empty_main(storage: &Storage) -> Result<usize, CliError> {
    let removed = storage.stats().main.entries;
    storage.flush_main()?;
    Ok(removed)
}

fn print_file(label: &str, stats: &FileStats) {
    println!("{}:", label);
    println!("  Tiles:  {}", stats.entries);
    println!("  Blocks: {}", stats.blocks);
    println!(
        "  Size:   {} of {}",
        format_size(stats.file_size),
        format_size(stats.max_size)
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilecache::config::CacheConfig;
    use tilecache::coord::BoundingBox;
    use tilecache::TileKey;

    #[test]
    fn test_empty_main_reports_removed_tiles() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = Storage::open(&CacheConfig::new(dir.path()), 7).unwrap();
        storage.save_main(TileKey::new(1, 1, 4), b"a").unwrap();
        storage.save_main(TileKey::new(2, 1, 4), b"b").unwrap();
        storage
            .region_add("alps", BoundingBox::new(45.0, 5.0, 48.0, 11.0).unwrap())
            .unwrap();
        storage
            .save_separate("alps", TileKey::new(3, 1, 4), b"c")
            .unwrap();

        assert_eq!(empty_main(&storage).unwrap(), 2);
        assert_eq!(storage.stats().main.entries, 0);
        assert!(storage.is_exist(&TileKey::new(3, 1, 4)));
        assert_eq!(empty_main(&storage).unwrap(), 0);
    }
}
