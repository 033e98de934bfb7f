//! Write batches
//!
//! Buffers puts and deletes, then commits them as one atomic group.
//!
//! ## Commit Protocol
//! ```text
//! seq = ++engine.seq_no
//! [seq|k1 PUT] [seq|k2 DELETE] ... [seq|txn-fin TXN_FINISHED]
//! ```
//! Every record key carries the batch's sequence number. Replay applies a
//! group only after reading its commit marker, so a crash mid-commit leaves
//! none of the batch visible.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::config::{IndexType, WriteBatchOptions};
use crate::data::{key_with_seq_no, LogRecord, LogRecordPos, LogRecordType, TXN_FIN_KEY};
use crate::engine::Engine;
use crate::error::{CaskError, Result};

/// Pending writes bound to one engine
pub struct WriteBatch<'a> {
    /// Latest pending operation per key
    pending: Mutex<HashMap<Vec<u8>, LogRecord>>,
    engine: &'a Engine,
    options: WriteBatchOptions,
}

impl Engine {
    /// Start a new write batch
    ///
    /// With the persistent index, batches need the sequence number saved by
    /// the last clean close; a directory that was never closed cleanly
    /// cannot hand out safe sequence numbers.
    pub fn new_write_batch(&self, options: WriteBatchOptions) -> Result<WriteBatch<'_>> {
        if self.config.index_type == IndexType::BPlusTree
            && !self.seq_no_file_exists
            && !self.is_initial
        {
            return Err(CaskError::BatchUnavailable);
        }

        Ok(WriteBatch {
            pending: Mutex::new(HashMap::new()),
            engine: self,
            options,
        })
    }
}

impl WriteBatch<'_> {
    /// Stage a put; replaces any earlier pending operation on `key`
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CaskError::KeyEmpty);
        }

        let record = LogRecord::put(key.to_vec(), value.to_vec());
        self.pending.lock().insert(key.to_vec(), record);
        Ok(())
    }

    /// Stage a delete
    ///
    /// If the key is in neither the index nor this batch, nothing is staged.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CaskError::KeyEmpty);
        }

        let mut pending = self.pending.lock();
        if self.engine.index.get(key)?.is_none() {
            pending.remove(key);
            return Ok(());
        }

        pending.insert(key.to_vec(), LogRecord::delete(key.to_vec()));
        Ok(())
    }

    /// Number of staged operations
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Write every staged operation plus a commit marker, then apply them
    ///
    /// Other writers are excluded for the whole commit. An empty batch is a
    /// no-op. On success the batch is empty and can be reused.
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() > self.options.max_batch_num {
            return Err(CaskError::ExceedsMaxBatchSize {
                max: self.options.max_batch_num,
            });
        }

        let engine = self.engine;
        let mut state = engine.state.write();
        state.seq_no += 1;
        let seq_no = state.seq_no;

        // Step 1: Append the group
        let mut positions: Vec<(Vec<u8>, LogRecordType, LogRecordPos)> =
            Vec::with_capacity(pending.len());
        for (key, record) in pending.iter() {
            let stored = LogRecord {
                key: key_with_seq_no(key, seq_no),
                value: record.value.clone(),
                rec_type: record.rec_type,
            };
            let pos = engine.append_log_record(&mut state, &stored)?;
            positions.push((key.clone(), record.rec_type, pos));
        }

        // Step 2: Commit marker
        let marker = LogRecord {
            key: key_with_seq_no(TXN_FIN_KEY, seq_no),
            value: Vec::new(),
            rec_type: LogRecordType::TxnFinished,
        };
        let marker_pos = engine.append_log_record(&mut state, &marker)?;
        state.reclaim_size += marker_pos.size as u64;

        if self.options.sync_writes {
            if let Some(active) = &state.active_file {
                active.sync()?;
            }
        }

        // Step 3: Apply to the index
        for (key, rec_type, pos) in positions {
            let old = if rec_type == LogRecordType::Delete {
                state.reclaim_size += pos.size as u64;
                engine.index.delete(&key)?.0
            } else {
                engine.index.put(key, pos)?
            };
            if let Some(old) = old {
                state.reclaim_size += old.size as u64;
            }
        }

        tracing::debug!(seq_no, "write batch committed");
        pending.clear();
        Ok(())
    }
}
