//! Persistent B+ tree index
//!
//! Stores `key -> encoded LogRecordPos` in a redb database next to the data
//! files. Every mutation is its own write transaction, so the index is
//! durable on its own and the engine skips replay when it is selected.

use std::ops::Bound;
use std::path::Path;

use redb::{
    Database, Durability, ReadOnlyTable, ReadTransaction, ReadableTable, ReadableTableMetadata,
    Table, TableDefinition,
};

use crate::data::LogRecordPos;
use crate::error::{CaskError, Result};

use super::{IndexIterator, Indexer};

/// File holding the persistent index inside the data directory
pub const BPTREE_INDEX_FILE_NAME: &str = "bptree_index";

const INDEX_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("bitcask-index");

fn index_err<E: Into<redb::Error>>(err: E) -> CaskError {
    CaskError::Index(err.into().to_string())
}

/// B+ tree index persisted with redb
pub struct BPlusTreeIndex {
    db: Database,
    sync_writes: bool,
}

impl BPlusTreeIndex {
    /// Open or create the index file in `dir`
    pub fn open(dir: &Path, sync_writes: bool) -> Result<Self> {
        let db = Database::create(dir.join(BPTREE_INDEX_FILE_NAME)).map_err(index_err)?;

        // Make sure the table exists so read transactions can open it
        let txn = db.begin_write().map_err(index_err)?;
        txn.open_table(INDEX_TABLE).map_err(index_err)?;
        txn.commit().map_err(index_err)?;

        Ok(Self { db, sync_writes })
    }

    fn update<T>(
        &self,
        f: impl FnOnce(&mut Table<'_, &'static [u8], &'static [u8]>) -> Result<T>,
    ) -> Result<T> {
        let mut txn = self.db.begin_write().map_err(index_err)?;
        if !self.sync_writes {
            txn.set_durability(Durability::None);
        }
        let out = {
            let mut table = txn.open_table(INDEX_TABLE).map_err(index_err)?;
            f(&mut table)?
        };
        txn.commit().map_err(index_err)?;
        Ok(out)
    }

    fn read_table(&self) -> Result<(ReadTransaction, ReadOnlyTable<&'static [u8], &'static [u8]>)> {
        let txn = self.db.begin_read().map_err(index_err)?;
        let table = txn.open_table(INDEX_TABLE).map_err(index_err)?;
        Ok((txn, table))
    }
}

impl Indexer for BPlusTreeIndex {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<Option<LogRecordPos>> {
        let encoded = pos.encode();
        self.update(|table| {
            let old = table
                .insert(key.as_slice(), encoded.as_slice())
                .map_err(index_err)?
                .map(|guard| LogRecordPos::decode(guard.value()));
            old.transpose()
        })
    }

    fn get(&self, key: &[u8]) -> Result<Option<LogRecordPos>> {
        let (_txn, table) = self.read_table()?;
        let found = table
            .get(key)
            .map_err(index_err)?
            .map(|guard| LogRecordPos::decode(guard.value()));
        found.transpose()
    }

    fn delete(&self, key: &[u8]) -> Result<(Option<LogRecordPos>, bool)> {
        let old = self.update(|table| {
            let old = table
                .remove(key)
                .map_err(index_err)?
                .map(|guard| LogRecordPos::decode(guard.value()));
            old.transpose()
        })?;
        Ok((old, old.is_some()))
    }

    fn size(&self) -> Result<usize> {
        let (_txn, table) = self.read_table()?;
        Ok(table.len().map_err(index_err)? as usize)
    }

    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>> {
        let (txn, table) = self.read_table()?;
        let mut iter = BPlusTreeIterator {
            _txn: txn,
            table,
            reverse,
            current: None,
        };
        iter.rewind()?;
        Ok(Box::new(iter))
    }

    fn sync(&self) -> Result<()> {
        // A durable commit also persists every earlier non-durable one
        let txn = self.db.begin_write().map_err(index_err)?;
        txn.commit().map_err(index_err)?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.sync()
    }
}

// =============================================================================
// Iterator
// =============================================================================

/// Live cursor bound to one read transaction
///
/// Sees the index as of its creation. The transaction is released when
/// the iterator is dropped.
pub struct BPlusTreeIterator {
    _txn: ReadTransaction,
    table: ReadOnlyTable<&'static [u8], &'static [u8]>,
    reverse: bool,
    current: Option<(Vec<u8>, LogRecordPos)>,
}

impl BPlusTreeIterator {
    /// Position on the first (or last, when `from_back`) entry of the range
    fn position<'a>(
        &mut self,
        range: (Bound<&'a [u8]>, Bound<&'a [u8]>),
        from_back: bool,
    ) -> Result<()> {
        let mut entries = self.table.range::<&[u8]>(range).map_err(index_err)?;
        let entry = if from_back {
            entries.next_back()
        } else {
            entries.next()
        };
        self.current = match entry {
            Some(entry) => {
                let (key, value) = entry.map_err(index_err)?;
                Some((key.value().to_vec(), LogRecordPos::decode(value.value())?))
            }
            None => None,
        };
        Ok(())
    }
}

impl IndexIterator for BPlusTreeIterator {
    fn rewind(&mut self) -> Result<()> {
        self.position((Bound::Unbounded, Bound::Unbounded), self.reverse)
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        if self.reverse {
            self.position((Bound::Unbounded, Bound::Included(key)), true)
        } else {
            self.position((Bound::Included(key), Bound::Unbounded), false)
        }
    }

    fn next(&mut self) -> Result<()> {
        let Some((key, _)) = self.current.take() else {
            return Ok(());
        };
        if self.reverse {
            self.position((Bound::Unbounded, Bound::Excluded(key.as_slice())), true)
        } else {
            self.position((Bound::Excluded(key.as_slice()), Bound::Unbounded), false)
        }
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> &[u8] {
        self.current.as_ref().map(|(key, _)| key.as_slice()).unwrap_or(&[])
    }

    fn value(&self) -> LogRecordPos {
        match &self.current {
            Some((_, pos)) => *pos,
            None => LogRecordPos {
                file_id: 0,
                offset: 0,
                size: 0,
            },
        }
    }
}
