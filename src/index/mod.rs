//! Index Module
//!
//! Maps every live key to the position of its latest record.
//!
//! ## Implementations
//! - `BTreeIndex`: `BTreeMap` behind an `RwLock`, the general default
//! - `AdaptiveRadixTree`: adaptive radix tree, dense for shared prefixes
//! - `BPlusTreeIndex`: persistent B+ tree (redb), one durable transaction
//!   per mutation, survives restarts without replay
//!
//! ## Iterator isolation
//! The in-memory indexes copy a sorted snapshot when an iterator is created;
//! later mutations are invisible to it. The persistent index binds the
//! iterator to one read transaction instead, held until the iterator drops.

mod art;
mod bptree;
mod btree;

use std::path::Path;

use crate::config::IndexType;
use crate::data::LogRecordPos;
use crate::error::Result;

pub use art::AdaptiveRadixTree;
pub use bptree::{BPlusTreeIndex, BPTREE_INDEX_FILE_NAME};
pub use btree::BTreeIndex;

/// Key -> position map shared by the engine, batches and merges
///
/// Every implementation is safe under concurrent shared reads and
/// exclusive writes.
pub trait Indexer: Send + Sync {
    /// Insert or replace; returns the position that was replaced
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<Option<LogRecordPos>>;

    /// Current position of `key`
    fn get(&self, key: &[u8]) -> Result<Option<LogRecordPos>>;

    /// Remove `key`; returns the removed position and whether it existed
    fn delete(&self, key: &[u8]) -> Result<(Option<LogRecordPos>, bool)>;

    /// Number of keys
    fn size(&self) -> Result<usize>;

    /// Ordered cursor, ascending or descending by key bytes
    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>>;

    /// Make every earlier mutation durable
    fn sync(&self) -> Result<()> {
        Ok(())
    }

    /// Release resources held by the index
    fn close(&self) -> Result<()>;
}

/// Cursor over `(key, position)` pairs
pub trait IndexIterator {
    /// Back to the first entry
    fn rewind(&mut self) -> Result<()>;

    /// Position at the first key >= `key` (ascending) or <= `key` (descending)
    fn seek(&mut self, key: &[u8]) -> Result<()>;

    /// Advance one entry
    fn next(&mut self) -> Result<()>;

    /// Whether the cursor points at an entry
    fn valid(&self) -> bool;

    /// Key under the cursor; only call while `valid()`
    fn key(&self) -> &[u8];

    /// Position under the cursor; only call while `valid()`
    fn value(&self) -> LogRecordPos;
}

/// Build the index selected in the config
pub fn new_indexer(index_type: IndexType, dir: &Path, sync_writes: bool) -> Result<Box<dyn Indexer>> {
    Ok(match index_type {
        IndexType::BTree => Box::new(BTreeIndex::new()),
        IndexType::Art => Box::new(AdaptiveRadixTree::new()),
        IndexType::BPlusTree => Box::new(BPlusTreeIndex::open(dir, sync_writes)?),
    })
}

// =============================================================================
// Snapshot Iterator (in-memory indexes)
// =============================================================================

/// Iterator over a sorted copy of an in-memory index
///
/// `items` is already in iteration order (descending when `reverse`).
pub struct SnapshotIterator {
    items: Vec<(Vec<u8>, LogRecordPos)>,
    current: usize,
    reverse: bool,
}

impl SnapshotIterator {
    pub(crate) fn new(items: Vec<(Vec<u8>, LogRecordPos)>, reverse: bool) -> Self {
        Self {
            items,
            current: 0,
            reverse,
        }
    }
}

impl IndexIterator for SnapshotIterator {
    fn rewind(&mut self) -> Result<()> {
        self.current = 0;
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        // Binary search over the snapshot
        self.current = if self.reverse {
            self.items.partition_point(|(k, _)| k.as_slice() > key)
        } else {
            self.items.partition_point(|(k, _)| k.as_slice() < key)
        };
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        self.current += 1;
        Ok(())
    }

    fn valid(&self) -> bool {
        self.current < self.items.len()
    }

    fn key(&self) -> &[u8] {
        &self.items[self.current].0
    }

    fn value(&self) -> LogRecordPos {
        self.items[self.current].1
    }
}
