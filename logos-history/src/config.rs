//! History engine configuration.

use std::path::{Path, PathBuf};

/// Storage and cadence settings for a [`HistoryManager`](crate::HistoryManager).
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// RocksDB directory holding the operation log
    pub db_path: PathBuf,
    /// Directory holding one sub-directory of snapshot files per document
    pub snapshot_dir: PathBuf,
    /// Write a snapshot every N operations (default: 100, 0 disables)
    pub snapshot_cadence: u64,
    /// Snapshots waiting for the background writer before new ones are deferred (default: 16)
    pub snapshot_queue_depth: usize,
    /// fsync every operation append (default: true)
    pub sync_writes: bool,
    /// Undoable operations kept per session (default: 1000)
    pub undo_depth: usize,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 32MB)
    pub write_buffer_size: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self::new("data/history/operations.db", "data/history/snapshots")
    }
}

impl HistoryConfig {
    /// Production settings rooted at the given log and snapshot locations.
    pub fn new(db_path: impl Into<PathBuf>, snapshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            snapshot_dir: snapshot_dir.into(),
            snapshot_cadence: 100,
            snapshot_queue_depth: 16,
            sync_writes: true,
            undo_depth: 1000,
            block_cache_size: 64 * 1024 * 1024, // 64MB
            bloom_filter_bits: 10,
            max_open_files: 512,
            write_buffer_size: 32 * 1024 * 1024, // 32MB
        }
    }

    /// Create config for testing (small caches, everything under `dir`).
    pub fn for_testing(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            block_cache_size: 8 * 1024 * 1024, // 8MB
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024, // 4MB
            ..Self::new(dir.join("operations.db"), dir.join("snapshots"))
        }
    }

    /// Override the snapshot cadence.
    pub fn with_cadence(mut self, every: u64) -> Self {
        self.snapshot_cadence = every;
        self
    }

    /// Whether `seq` lands on a snapshot boundary.
    pub fn is_snapshot_boundary(&self, seq: u64) -> bool {
        self.snapshot_cadence > 0 && seq > 0 && seq % self.snapshot_cadence == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        let config = HistoryConfig::default();
        assert_eq!(config.db_path, PathBuf::from("data/history/operations.db"));
        assert_eq!(config.snapshot_dir, PathBuf::from("data/history/snapshots"));
        assert_eq!(config.snapshot_cadence, 100);
        assert!(config.sync_writes);
    }

    #[test]
    fn test_for_testing_nests_under_dir() {
        let config = HistoryConfig::for_testing("/tmp/logos");
        assert!(config.db_path.starts_with("/tmp/logos"));
        assert!(config.snapshot_dir.starts_with("/tmp/logos"));
        assert!(config.block_cache_size < HistoryConfig::default().block_cache_size);
    }

    #[test]
    fn test_snapshot_boundary() {
        let config = HistoryConfig::default().with_cadence(3);
        assert!(!config.is_snapshot_boundary(0));
        assert!(!config.is_snapshot_boundary(2));
        assert!(config.is_snapshot_boundary(3));
        assert!(config.is_snapshot_boundary(6));
        assert!(!HistoryConfig::default().with_cadence(0).is_snapshot_boundary(100));
    }
}
