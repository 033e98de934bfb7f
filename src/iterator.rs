//! User-facing ordered iterator
//!
//! Walks the index in key order and reads values on demand. Isolation
//! follows the underlying index: the in-memory indexes iterate a snapshot
//! taken at creation, the persistent index a read transaction.

use crate::config::IteratorOptions;
use crate::engine::Engine;
use crate::error::Result;
use crate::index::IndexIterator;

/// Ordered iterator over an engine's live keys
pub struct DbIterator<'a> {
    index_iter: Box<dyn IndexIterator>,
    engine: &'a Engine,
    options: IteratorOptions,
}

impl Engine {
    /// Create an iterator, positioned at the first matching key
    pub fn iter(&self, options: IteratorOptions) -> Result<DbIterator<'_>> {
        let index_iter = self.index.iterator(options.reverse)?;
        let mut iter = DbIterator {
            index_iter,
            engine: self,
            options,
        };
        iter.skip_to_prefix()?;
        Ok(iter)
    }
}

impl DbIterator<'_> {
    /// Back to the first matching key
    pub fn rewind(&mut self) -> Result<()> {
        self.index_iter.rewind()?;
        self.skip_to_prefix()
    }

    /// First matching key >= `key` (<= `key` when reversed)
    pub fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.index_iter.seek(key)?;
        self.skip_to_prefix()
    }

    /// Advance to the next matching key
    pub fn next(&mut self) -> Result<()> {
        self.index_iter.next()?;
        self.skip_to_prefix()
    }

    pub fn valid(&self) -> bool {
        self.index_iter.valid()
    }

    /// Key under the cursor; only call while `valid()`
    pub fn key(&self) -> &[u8] {
        self.index_iter.key()
    }

    /// Read the value under the cursor; only call while `valid()`
    pub fn value(&self) -> Result<Vec<u8>> {
        let pos = self.index_iter.value();
        let state = self.engine.state.read();
        Engine::value_at(&state, self.index_iter.key(), &pos)
    }

    fn skip_to_prefix(&mut self) -> Result<()> {
        let prefix = &self.options.prefix;
        if prefix.is_empty() {
            return Ok(());
        }

        while self.index_iter.valid() && !self.index_iter.key().starts_with(prefix) {
            self.index_iter.next()?;
        }
        Ok(())
    }
}
