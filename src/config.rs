//! Configuration for CaskDB
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{CaskError, Result};

/// Main configuration for a CaskDB instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding one database
    /// Internal structure:
    ///   {dir_path}/
    ///     ├── 000000000.data   (log files, highest id is active)
    ///     ├── hint_index       (after a merge)
    ///     ├── merge_FIN        (after a merge)
    ///     ├── seq_No           (between close and the next open)
    ///     └── flock            (directory lock)
    pub dir_path: PathBuf,

    /// Size threshold (bytes) at which the active file is rotated
    pub data_file_size: u64,

    // -------------------------------------------------------------------------
    // Durability Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the active file
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Which in-memory or on-disk structure maps keys to positions
    pub index_type: IndexType,

    // -------------------------------------------------------------------------
    // Merge Configuration
    // -------------------------------------------------------------------------
    /// Minimum reclaimable/total ratio before a merge is allowed, in (0, 1]
    pub merge_ratio: f32,

    // -------------------------------------------------------------------------
    // Startup Configuration
    // -------------------------------------------------------------------------
    /// Replay data files through a memory map at open
    pub mmap_at_startup: bool,
}

/// Sync strategy for appends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync once this many bytes have been appended since the last sync
    EveryNBytes { bytes: usize },

    /// leave flushing to the OS
    Never,
}

/// Index implementation selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// Ordered in-memory tree
    BTree,

    /// Adaptive radix tree
    Art,

    /// Persistent B+ tree stored next to the data files
    BPlusTree,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir_path: PathBuf::from("./caskdb_data"),
            data_file_size: 256 * 1024 * 1024, // 256 MB
            sync_strategy: SyncStrategy::Never,
            index_type: IndexType::BTree,
            merge_ratio: 0.5,
            mmap_at_startup: false,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject invalid settings before any I/O happens
    pub fn validate(&self) -> Result<()> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(CaskError::Config("database dir path is empty".to_string()));
        }
        if self.data_file_size == 0 {
            return Err(CaskError::Config(
                "data file size must be greater than 0".to_string(),
            ));
        }
        if !(self.merge_ratio > 0.0 && self.merge_ratio <= 1.0) {
            return Err(CaskError::Config(format!(
                "merge ratio must be in (0, 1], got {}",
                self.merge_ratio
            )));
        }
        if let SyncStrategy::EveryNBytes { bytes: 0 } = self.sync_strategy {
            return Err(CaskError::Config(
                "sync byte threshold must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory
    pub fn dir_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.dir_path = path.into();
        self
    }

    /// Set the rotation threshold (in bytes)
    pub fn data_file_size(mut self, size: u64) -> Self {
        self.config.data_file_size = size;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the index implementation
    pub fn index_type(mut self, index_type: IndexType) -> Self {
        self.config.index_type = index_type;
        self
    }

    /// Set the merge ratio
    pub fn merge_ratio(mut self, ratio: f32) -> Self {
        self.config.merge_ratio = ratio;
        self
    }

    /// Replay through memory maps at startup
    pub fn mmap_at_startup(mut self, enabled: bool) -> Self {
        self.config.mmap_at_startup = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

/// Options for a write batch
#[derive(Debug, Clone, Copy)]
pub struct WriteBatchOptions {
    /// Maximum number of pending writes a commit accepts
    pub max_batch_num: usize,

    /// fsync the active file once the batch is written
    pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self {
            max_batch_num: 10_000,
            sync_writes: true,
        }
    }
}

/// Options for a user iterator
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// Only visit keys starting with this prefix (empty = all keys)
    pub prefix: Vec<u8>,

    /// Iterate in descending key order
    pub reverse: bool,
}
