//! Integration tests for the tile cache.
//!
//! These tests drive the public API end to end:
//! - query → worker → download → storage → observers
//! - persistence across reopen, including provider changes
//! - region downloads and region management
//!
//! Run with: `cargo test --test cache_integration`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use tilecache::cache::{Cache, TileNotification, TileSource};
use tilecache::config::CacheConfig;
use tilecache::coord::{tiles_in_bbox, BoundingBox};
use tilecache::provider::{Fetcher, ProviderError, UrlTemplateProvider};
use tilecache::storage::{RegionStatus, SaveOutcome, Storage, HEADER_SIZE};
use tilecache::TileKey;

// ============================================================================
// Helper Functions
// ============================================================================

/// Fetcher returning a payload derived from the URL, counting requests.
#[derive(Default)]
struct EchoFetcher {
    requests: AtomicUsize,
    fail_zoom: Option<String>,
}

impl EchoFetcher {
    fn failing_at_zoom(zoom: u8) -> Self {
        Self {
            requests: AtomicUsize::new(0),
            fail_zoom: Some(format!("/{}/", zoom)),
        }
    }

    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Fetcher for EchoFetcher {
    fn download(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match &self.fail_zoom {
            Some(marker) if url.contains(marker.as_str()) => Err(ProviderError::Status {
                status: 503,
                url: url.to_string(),
            }),
            _ => Ok(url.as_bytes().to_vec()),
        }
    }
}

fn provider(name: &str) -> UrlTemplateProvider {
    UrlTemplateProvider::new(name, "http://tiles.test/{z}/{x}/{y}.png").unwrap()
}

fn config(dir: &tempfile::TempDir) -> CacheConfig {
    CacheConfig::new(dir.path()).with_max_file_size(4 * 1024 * 1024)
}

/// Alps bounding box used by region tests.
fn alps() -> BoundingBox {
    BoundingBox::new(45.8, 6.0, 47.8, 10.5).unwrap()
}

/// Waits for the next notification, failing the test after a few seconds.
fn next(rx: &mut mpsc::UnboundedReceiver<TileNotification>) -> TileNotification {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        match rx.try_recv() {
            Ok(n) => return n,
            Err(mpsc::error::TryRecvError::Empty) if std::time::Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(e) => panic!("no notification: {:?}", e),
        }
    }
}

// ============================================================================
// Integration Tests
// ============================================================================

#[test]
fn test_storage_end_to_end() {
    let dir = tempfile::TempDir::new().unwrap();
    let storage = Storage::open(&config(&dir), 0).unwrap();
    let key = TileKey::new(1, 2, 3);

    assert_eq!(
        storage.save_main(key, b"abcd").unwrap(),
        SaveOutcome::Stored { evicted: None }
    );
    assert!(storage.is_exist(&key));

    let location = storage.get_key_pair(&key).unwrap();
    assert_eq!(storage.load(&location).unwrap().unwrap(), b"abcd");
    assert_eq!(storage.get_key_pair(&key).unwrap().entry.counter, 1);
    assert!(!storage.is_exist(&TileKey::new(9, 9, 9)));
}

/// Two queries for the same key are not merged.
#[test]
fn test_queries_are_not_deduplicated() {
    let dir = tempfile::TempDir::new().unwrap();
    let fetcher = Arc::new(EchoFetcher::default());
    let cache = Cache::open(config(&dir), provider("osm"), Arc::clone(&fetcher)).unwrap();
    let (_, mut rx) = cache.subscribe_channel();
    let key = TileKey::new(10, 20, 8);

    cache.query(key);
    cache.query(key);

    let first = next(&mut rx);
    let second = next(&mut rx);
    assert_eq!(first.key, key);
    assert_eq!(second.key, key);
    assert!(first.success && second.success);
    assert_eq!(first.source, TileSource::Network);
    assert_eq!(second.source, TileSource::Storage);
    assert_eq!(first.data, second.data);
    assert_eq!(fetcher.requests(), 1);
}

#[test]
fn test_tiles_survive_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let keys: Vec<TileKey> = (0..20).map(|i| TileKey::new(i, i + 1, 12)).collect();

    {
        let cache = Cache::open(config(&dir), provider("osm"), EchoFetcher::default()).unwrap();
        let (_, mut rx) = cache.subscribe_channel();
        for &key in &keys {
            cache.query(key);
        }
        for _ in &keys {
            assert!(next(&mut rx).success);
        }
    }

    let fetcher = Arc::new(EchoFetcher::default());
    let cache = Cache::open(config(&dir), provider("osm"), Arc::clone(&fetcher)).unwrap();
    for key in &keys {
        assert!(cache.is_exist(key));
    }

    let (_, mut rx) = cache.subscribe_channel();
    cache.query(keys[3]);
    let n = next(&mut rx);
    assert_eq!(n.source, TileSource::Storage);
    assert_eq!(
        n.data.as_deref(),
        Some("http://tiles.test/12/3/4.png".as_bytes())
    );
    assert_eq!(fetcher.requests(), 0);
}

#[test]
fn test_provider_change_discards_tiles() {
    let dir = tempfile::TempDir::new().unwrap();
    let key = TileKey::new(5, 5, 5);

    {
        let cache = Cache::open(config(&dir), provider("osm"), EchoFetcher::default()).unwrap();
        let (_, mut rx) = cache.subscribe_channel();
        cache.query(key);
        assert!(next(&mut rx).success);
    }

    let cache = Cache::open(config(&dir), provider("satellite"), EchoFetcher::default()).unwrap();
    assert!(!cache.is_exist(&key));
}

#[test]
fn test_region_download_lifecycle() {
    let dir = tempfile::TempDir::new().unwrap();
    let fetcher = Arc::new(EchoFetcher::default());
    let cache = Cache::open(config(&dir), provider("osm"), Arc::clone(&fetcher)).unwrap();
    let (_, mut rx) = cache.subscribe_channel();

    // One tile fetched beforehand is copied instead of downloaded again.
    let cached = tiles_in_bbox(&alps(), 4).unwrap()[0];
    cache.query(cached);
    assert!(next(&mut rx).success);

    let total = cache.download_region("alps", alps(), 4..=6).unwrap();
    for _ in 0..total {
        let n = next(&mut rx);
        assert!(n.success);
        assert_eq!(n.source, TileSource::Region("alps".to_string()));
    }
    assert_eq!(fetcher.requests(), total);

    let storage = cache.storage();
    assert_eq!(storage.region("alps").unwrap().status, RegionStatus::Stored);
    for zoom in 4..=6 {
        for key in tiles_in_bbox(&alps(), zoom).unwrap() {
            assert!(cache.is_exist(&key));
        }
    }

    // Deleting the region forgets tiles that only it held.
    storage.region_delete("alps").unwrap();
    assert!(cache.is_exist(&cached));
    let only_region = tiles_in_bbox(&alps(), 6).unwrap()[0];
    assert!(!cache.is_exist(&only_region));
}

#[test]
fn test_region_with_failures_is_invalid() {
    let dir = tempfile::TempDir::new().unwrap();
    let cache = Cache::open(
        config(&dir),
        provider("osm"),
        EchoFetcher::failing_at_zoom(5),
    )
    .unwrap();
    let (_, mut rx) = cache.subscribe_channel();

    let total = cache.download_region("alps", alps(), 4..=5).unwrap();
    let failures = (0..total).filter(|_| !next(&mut rx).success).count();

    assert_eq!(failures, tiles_in_bbox(&alps(), 5).unwrap().len());
    assert_eq!(
        cache.storage().region("alps").unwrap().status,
        RegionStatus::Invalid
    );
}

/// A region that outgrows its file ends invalid and keeps what it stored.
#[test]
fn test_region_overflowing_its_file_is_invalid() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = CacheConfig::new(dir.path())
        .with_max_file_size(HEADER_SIZE + 8 + 4 * 20 + 100)
        .with_eviction_tolerance(0)
        .with_block_capacity(4);
    let cache = Cache::open(config, provider("osm"), EchoFetcher::default()).unwrap();
    let (_, mut rx) = cache.subscribe_channel();

    let total = cache.download_region("alps", alps(), 4..=7).unwrap();
    assert!(total > 4);
    let failures = (0..total).filter(|_| !next(&mut rx).success).count();

    assert!(failures > 0);
    let storage = cache.storage();
    assert_eq!(storage.region("alps").unwrap().status, RegionStatus::Invalid);
    let stored = storage.stats().regions[0].1.entries;
    assert!(stored > 0);
    assert_eq!(stored, total - failures);
}

#[test]
fn test_region_status_persists() {
    let dir = tempfile::TempDir::new().unwrap();
    {
        let cache = Cache::open(config(&dir), provider("osm"), EchoFetcher::default()).unwrap();
        let (_, mut rx) = cache.subscribe_channel();
        let total = cache.download_region("alps", alps(), 3..=3).unwrap();
        for _ in 0..total {
            next(&mut rx);
        }
        cache.storage().region_rename("alps", "alpen").unwrap();
    }

    let cache = Cache::open(config(&dir), provider("osm"), EchoFetcher::default()).unwrap();
    let regions = cache.storage().regions();
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].name, "alpen");
    assert_eq!(regions[0].status, RegionStatus::Stored);
    assert_eq!(regions[0].bbox, alps());
}
