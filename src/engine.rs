//! Engine Module
//!
//! The core storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Own the active file and the set of older files, rotate on size
//! - Rebuild the index by replaying data files at open
//! - Serve put/get/delete and full scans
//! - Track how many bytes a merge could reclaim

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use fs2::FileExt;
use parking_lot::RwLock;

use crate::config::{Config, IndexType, SyncStrategy};
use crate::data::{
    key_with_seq_no, parse_key_with_seq_no, DataFile, LogRecord, LogRecordPos,
    LogRecordType, DATA_FILE_SUFFIX, MERGE_FINISHED_FILE_NAME, NON_TXN_SEQ_NO, SEQ_NO_FILE_NAME,
};
use crate::error::{CaskError, Result};
use crate::fio::IoType;
use crate::index::{new_indexer, Indexer};
use crate::merge;
use crate::util;

/// Name of the lock file guarding a data directory
pub const FILE_LOCK_NAME: &str = "flock";

/// Key of the single record in the seq-no file
const SEQ_NO_KEY: &[u8] = b"seq_No";

/// Observational snapshot returned by [`Engine::stat`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Number of live keys
    pub key_num: usize,
    /// Active + older data files
    pub data_file_num: usize,
    /// Bytes a merge would reclaim
    pub reclaimable_size: u64,
    /// Bytes used by the data directory
    pub disk_size: u64,
}

/// Mutable state guarded by the engine lock
pub(crate) struct EngineState {
    /// The only writable file; `None` until the first write
    pub(crate) active_file: Option<DataFile>,

    /// Read-only files, shared with a running merge
    pub(crate) older_files: HashMap<u32, Arc<DataFile>>,

    /// Last sequence number handed to a write batch
    pub(crate) seq_no: u64,

    /// Bytes appended since the last sync
    bytes_since_sync: usize,

    /// Bytes held by records no index entry points at
    pub(crate) reclaim_size: u64,
}

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (put/delete/batch commit/rotation/merge freeze): take the
///   `state` lock exclusively, append, then update the index before
///   releasing it
/// - **Reads** (get/iterate/fold/stat): take the `state` lock shared and
///   read with positional I/O, so readers never block each other
/// - The index carries its own lock; a merge only calls `Indexer::get`
pub struct Engine {
    /// Engine configuration
    pub(crate) config: Config,

    /// Files, sequence number and accounting
    pub(crate) state: RwLock<EngineState>,

    /// Key -> position index
    pub(crate) index: Box<dyn Indexer>,

    /// Set while a merge runs
    pub(crate) is_merging: AtomicBool,

    /// The persistent index found a saved sequence number at open
    pub(crate) seq_no_file_exists: bool,

    /// The directory held no data when it was opened
    pub(crate) is_initial: bool,

    /// Held for the engine's lifetime; dropping it releases the directory
    file_lock: File,
}

/// Outcome of replaying the data files
struct ReplayOutcome {
    seq_no: u64,
    reclaim_size: u64,
    write_offset: u64,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Validate config, create the directory, take the directory lock
    /// 2. Install a finished merge, if any
    /// 3. Open every data file, the highest id becomes active
    /// 4. Rebuild the index (hint file + replay), or load the saved
    ///    sequence number for the persistent index
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let started = Instant::now();
        let dir = config.dir_path.clone();

        // Step 1: Create data directory if it doesn't exist
        let mut is_initial = false;
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
            is_initial = true;
        }

        // Step 2: Only one engine per directory
        let file_lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(FILE_LOCK_NAME))?;
        if file_lock.try_lock_exclusive().is_err() {
            return Err(CaskError::DatabaseInUse);
        }

        if fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .all(|entry| entry.file_name() == FILE_LOCK_NAME)
        {
            is_initial = true;
        }

        let index = new_indexer(
            config.index_type,
            &dir,
            config.sync_strategy == SyncStrategy::EveryWrite,
        )?;

        // Step 3: Move a completed merge into place before touching files
        let persistent = (config.index_type == IndexType::BPlusTree).then_some(index.as_ref());
        merge::install_merged_files(&dir, persistent)?;

        // Step 4: Open data files
        let io_type = if config.mmap_at_startup && config.index_type != IndexType::BPlusTree {
            IoType::MemoryMapped
        } else {
            IoType::Standard
        };
        let mut files = load_data_files(&dir, io_type)?;

        // Step 5: Rebuild the index
        let mut seq_no = NON_TXN_SEQ_NO;
        let mut reclaim_size = 0;
        let mut seq_no_file_exists = false;

        if config.index_type == IndexType::BPlusTree {
            if let Some(saved) = load_seq_no(&dir)? {
                seq_no = saved;
                seq_no_file_exists = true;
            }
            if let Some(active) = files.last_mut() {
                let size = active.size()?;
                active.set_write_offset(size);
            }
        } else {
            merge::load_index_from_hint(&dir, index.as_ref())?;
            let outcome = replay_data_files(&dir, &files, index.as_ref())?;
            seq_no = outcome.seq_no;
            reclaim_size = outcome.reclaim_size;

            // Merged files drop batch sequence numbers; never hand one out twice
            if let Some(saved) = load_seq_no(&dir)? {
                seq_no = seq_no.max(saved);
            }

            if io_type == IoType::MemoryMapped {
                for file in files.iter_mut() {
                    file.set_io_type(&dir, IoType::Standard)?;
                }
            }

            if let Some(active) = files.last_mut() {
                active.set_write_offset(outcome.write_offset);
                let size = active.size()?;
                if size > outcome.write_offset {
                    // A damaged length mid-file is indistinguishable from a torn write
                    tracing::warn!(
                        file_id = active.file_id(),
                        size,
                        valid = outcome.write_offset,
                        discarded = size - outcome.write_offset,
                        "truncating invalid tail of active data file"
                    );
                    active.truncate(outcome.write_offset)?;
                }
            }
        }

        // Step 6: Highest id is active, the rest are older
        let data_files = files.len();
        let active_file = files.pop();
        let older_files = files
            .into_iter()
            .map(|file| (file.file_id(), Arc::new(file)))
            .collect::<HashMap<_, _>>();

        let engine = Self {
            state: RwLock::new(EngineState {
                active_file,
                older_files,
                seq_no,
                bytes_since_sync: 0,
                reclaim_size,
            }),
            index,
            is_merging: AtomicBool::new(false),
            seq_no_file_exists,
            is_initial,
            file_lock,
            config,
        };

        tracing::info!(
            dir = %engine.config.dir_path.display(),
            data_files,
            keys = engine.index.size()?,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "engine opened"
        );

        Ok(engine)
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the given data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().dir_path(path).build();
        Self::open(config)
    }

    // =========================================================================
    // Key-Value API
    // =========================================================================

    /// Put a key-value pair
    ///
    /// Steps:
    /// 1. Acquire exclusive lock
    /// 2. Append the record (rotating first if the file is full)
    /// 3. Point the index at it, crediting the replaced record
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CaskError::KeyEmpty);
        }

        let record = LogRecord::put(key_with_seq_no(key, NON_TXN_SEQ_NO), value.to_vec());

        let mut state = self.state.write();
        let pos = self.append_log_record(&mut state, &record)?;
        if let Some(old) = self.index.put(key.to_vec(), pos)? {
            state.reclaim_size += old.size as u64;
        }
        Ok(())
    }

    /// Get a value by key
    ///
    /// Misses and tombstones both return `KeyNotFound`.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(CaskError::InvalidKey);
        }

        let state = self.state.read();
        let pos = self.index.get(key)?.ok_or(CaskError::KeyNotFound)?;
        Self::value_at(&state, key, &pos)
    }

    /// Delete a key
    ///
    /// A no-op when the key is absent. Otherwise appends a tombstone and
    /// credits both the tombstone and the removed record as reclaimable.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CaskError::KeyEmpty);
        }

        let mut state = self.state.write();
        if self.index.get(key)?.is_none() {
            return Ok(());
        }

        let record = LogRecord::delete(key_with_seq_no(key, NON_TXN_SEQ_NO));
        let pos = self.append_log_record(&mut state, &record)?;
        state.reclaim_size += pos.size as u64;

        let (old, existed) = self.index.delete(key)?;
        if !existed {
            return Err(CaskError::Index(
                "key vanished from index during delete".to_string(),
            ));
        }
        if let Some(old) = old {
            state.reclaim_size += old.size as u64;
        }
        Ok(())
    }

    /// All keys in ascending order
    pub fn list_keys(&self) -> Result<Vec<Vec<u8>>> {
        let mut iter = self.index.iterator(false)?;
        let mut keys = Vec::with_capacity(self.index.size()?);
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next()?;
        }
        Ok(keys)
    }

    /// Visit every key/value pair in ascending order until `f` returns false
    ///
    /// Scans the index as of the call. The shared lock is only held while
    /// each value is read, so `f` may call back into this engine.
    pub fn fold<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let mut iter = self.index.iterator(false)?;
        while iter.valid() {
            let value = {
                let state = self.state.read();
                Self::value_at(&state, iter.key(), &iter.value())?
            };
            if !f(iter.key(), &value) {
                break;
            }
            iter.next()?;
        }
        Ok(())
    }

    /// Force the active file to stable storage
    pub fn sync(&self) -> Result<()> {
        let state = self.state.read();
        match &state.active_file {
            Some(active) => active.sync(),
            None => Ok(()),
        }
    }

    /// Key count, file count, reclaimable bytes and directory size
    pub fn stat(&self) -> Result<Stat> {
        let state = self.state.read();
        let data_file_num = state.older_files.len() + usize::from(state.active_file.is_some());
        Ok(Stat {
            key_num: self.index.size()?,
            data_file_num,
            reclaimable_size: state.reclaim_size,
            disk_size: util::dir_size(&self.config.dir_path)?,
        })
    }

    /// Copy the data directory (minus the lock file) into `dest`
    pub fn backup(&self, dest: &Path) -> Result<()> {
        let _state = self.state.write();
        tracing::debug!(dest = %dest.display(), "backing up data directory");
        util::copy_dir(&self.config.dir_path, dest, &[FILE_LOCK_NAME])
    }

    /// Close the engine gracefully
    ///
    /// Saves the sequence number, syncs and closes every file, closes the
    /// index and releases the directory lock.
    pub fn close(self) -> Result<()> {
        let Engine {
            state,
            index,
            file_lock,
            config,
            ..
        } = self;
        let state = state.into_inner();

        let seq_no_path = config.dir_path.join(SEQ_NO_FILE_NAME);
        if seq_no_path.exists() {
            fs::remove_file(&seq_no_path)?;
        }
        let mut seq_no_file = DataFile::open_seq_no_file(&config.dir_path)?;
        let record = LogRecord::put(SEQ_NO_KEY.to_vec(), state.seq_no.to_string().into_bytes());
        seq_no_file.write(&record.encode())?;
        seq_no_file.close()?;

        if let Some(active) = state.active_file {
            active.close()?;
        }
        for (_, file) in state.older_files {
            if let Ok(file) = Arc::try_unwrap(file) {
                file.close()?;
            }
        }

        index.close()?;
        file_lock.unlock()?;
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Get the data directory path
    pub fn dir_path(&self) -> &Path {
        &self.config.dir_path
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Internal Write Path
    // =========================================================================

    /// Append under a freshly taken exclusive lock
    pub(crate) fn append_log_record_with_lock(&self, record: &LogRecord) -> Result<LogRecordPos> {
        let mut state = self.state.write();
        self.append_log_record(&mut state, record)
    }

    /// Append `record` to the active file; caller holds the exclusive lock
    pub(crate) fn append_log_record(
        &self,
        state: &mut EngineState,
        record: &LogRecord,
    ) -> Result<LogRecordPos> {
        let encoded = record.encode();
        let size = encoded.len() as u64;

        let needs_rotation = match &state.active_file {
            None => true,
            Some(active) => active.write_offset() + size > self.config.data_file_size,
        };
        if needs_rotation {
            self.rotate_active_file(state)?;
        }

        let active = state
            .active_file
            .as_mut()
            .ok_or_else(|| CaskError::DataFileNotFound(0))?;
        let offset = active.write_offset();
        active.write(&encoded)?;
        state.bytes_since_sync += encoded.len();

        let need_sync = match self.config.sync_strategy {
            SyncStrategy::EveryWrite => true,
            SyncStrategy::EveryNBytes { bytes } => state.bytes_since_sync >= bytes,
            SyncStrategy::Never => false,
        };
        if need_sync {
            active.sync()?;
            state.bytes_since_sync = 0;
        }

        Ok(LogRecordPos {
            file_id: active.file_id(),
            offset,
            size: size as u32,
        })
    }

    /// Demote the active file (if any) and open the next one
    ///
    /// Caller holds the exclusive lock.
    pub(crate) fn rotate_active_file(&self, state: &mut EngineState) -> Result<()> {
        let next_id = match state.active_file.take() {
            Some(active) => {
                active.sync()?;
                let id = active.file_id();
                state.older_files.insert(id, Arc::new(active));
                id + 1
            }
            None => 0,
        };

        tracing::debug!(file_id = next_id, "opening new active data file");
        let file = DataFile::open(&self.config.dir_path, next_id, IoType::Standard)?;
        state.active_file = Some(file);
        Ok(())
    }

    /// Read the value of `key` at the position the index holds for it
    pub(crate) fn value_at(
        state: &EngineState,
        key: &[u8],
        pos: &LogRecordPos,
    ) -> Result<Vec<u8>> {
        let record = match &state.active_file {
            Some(active) if active.file_id() == pos.file_id => active.read(pos.offset)?,
            _ => state
                .older_files
                .get(&pos.file_id)
                .ok_or(CaskError::DataFileNotFound(pos.file_id))?
                .read(pos.offset)?,
        };

        let (record, _) = record.ok_or_else(|| {
            CaskError::Corrupted(format!(
                "no record at file {} offset {}",
                pos.file_id, pos.offset
            ))
        })?;
        let (stored_key, _) = parse_key_with_seq_no(&record.key)?;
        if stored_key != key {
            return Err(CaskError::Corrupted(format!(
                "record at file {} offset {} belongs to another key",
                pos.file_id, pos.offset
            )));
        }
        if record.rec_type == LogRecordType::Delete {
            return Err(CaskError::KeyNotFound);
        }
        Ok(record.value)
    }
}

// =============================================================================
// Open Helpers
// =============================================================================

/// Open every `NNNNNNNNN.data` file in ascending id order
fn load_data_files(dir: &Path, io_type: IoType) -> Result<Vec<DataFile>> {
    let mut file_ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if let Some(stem) = name.strip_suffix(DATA_FILE_SUFFIX) {
            let id: u32 = stem
                .parse()
                .map_err(|_| CaskError::Corrupted(format!("bad data file name {}", name)))?;
            file_ids.push(id);
        }
    }
    file_ids.sort_unstable();

    file_ids
        .into_iter()
        .map(|id| DataFile::open(dir, id, io_type))
        .collect()
}

/// Replay records into the index, applying batches only once committed
fn replay_data_files(dir: &Path, files: &[DataFile], index: &dyn Indexer) -> Result<ReplayOutcome> {
    let mut outcome = ReplayOutcome {
        seq_no: NON_TXN_SEQ_NO,
        reclaim_size: 0,
        write_offset: 0,
    };
    if files.is_empty() {
        return Ok(outcome);
    }

    // Files below the boundary were loaded from the hint file
    let merge_boundary = if dir.join(MERGE_FINISHED_FILE_NAME).exists() {
        Some(merge::read_non_merge_file_id(dir)?)
    } else {
        None
    };

    let apply = |key: Vec<u8>,
                 rec_type: LogRecordType,
                 pos: LogRecordPos,
                 reclaim: &mut u64|
     -> Result<()> {
        let old = if rec_type == LogRecordType::Delete {
            *reclaim += pos.size as u64;
            index.delete(&key)?.0
        } else {
            index.put(key, pos)?
        };
        if let Some(old) = old {
            *reclaim += old.size as u64;
        }
        Ok(())
    };

    let mut pending: HashMap<u64, Vec<(Vec<u8>, LogRecordType, LogRecordPos)>> = HashMap::new();
    let last_index = files.len() - 1;

    for (i, file) in files.iter().enumerate() {
        if merge_boundary.is_some_and(|boundary| file.file_id() < boundary) {
            continue;
        }

        let mut offset = 0;
        while let Some((record, size)) = file.read(offset)? {
            let pos = LogRecordPos {
                file_id: file.file_id(),
                offset,
                size: size as u32,
            };
            let (key, seq_no) = parse_key_with_seq_no(&record.key)?;

            if seq_no == NON_TXN_SEQ_NO {
                apply(key, record.rec_type, pos, &mut outcome.reclaim_size)?;
            } else if record.rec_type == LogRecordType::TxnFinished {
                for (key, rec_type, pos) in pending.remove(&seq_no).unwrap_or_default() {
                    apply(key, rec_type, pos, &mut outcome.reclaim_size)?;
                }
                outcome.reclaim_size += pos.size as u64;
            } else {
                pending
                    .entry(seq_no)
                    .or_default()
                    .push((key, record.rec_type, pos));
            }

            outcome.seq_no = outcome.seq_no.max(seq_no);
            offset += size;
        }

        if i == last_index {
            outcome.write_offset = offset;
        } else {
            let size = file.size()?;
            if offset < size {
                tracing::warn!(
                    file_id = file.file_id(),
                    size,
                    valid = offset,
                    discarded = size - offset,
                    "ignoring unreadable tail of older data file"
                );
            }
        }
    }

    // Batches without a commit marker never happened, but their bytes are dead
    if !pending.is_empty() {
        let discarded: usize = pending.values().map(Vec::len).sum();
        tracing::warn!(
            batches = pending.len(),
            records = discarded,
            "discarding uncommitted write batches"
        );
        outcome.reclaim_size += pending
            .values()
            .flatten()
            .map(|(_, _, pos)| pos.size as u64)
            .sum::<u64>();
    }

    Ok(outcome)
}

/// Read and remove the seq-no file written by the last close
fn load_seq_no(dir: &Path) -> Result<Option<u64>> {
    let path = dir.join(SEQ_NO_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }

    let seq_no = {
        let file = DataFile::open_seq_no_file(dir)?;
        let (record, _) = file
            .read(0)?
            .ok_or_else(|| CaskError::Corrupted("empty seq-no file".to_string()))?;
        String::from_utf8_lossy(&record.value)
            .parse::<u64>()
            .map_err(|e| CaskError::Corrupted(format!("bad seq-no file: {}", e)))?
    };

    fs::remove_file(path)?;
    Ok(Some(seq_no))
}
