//! Merge Module
//!
//! Compacts the older data files into a fresh generation that holds only
//! live records, plus a hint file for fast index loading.
//!
//! ## Two-Phase Protocol
//! ```text
//! merge():   freeze active file ──► rewrite live records into <dir>-merge/
//!                                   ──► hint_index ──► merge_FIN(boundary)
//! open():    <dir>-merge/merge_FIN present?
//!              yes ─► rename merged files over the same ids in <dir>
//!                     delete originals in [merged_files, boundary)
//!                     apply hint to a persistent index, durably
//!                     move hint, then merge_FIN, remove <dir>-merge/
//!              no  ─► remove <dir>-merge/ (crashed merge, live data untouched)
//! ```
//!
//! Every install step can be repeated, so an open that dies halfway is
//! finished by the next one.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{Config, IndexType, SyncStrategy};
use crate::data::{
    data_file_name, key_with_seq_no, parse_key_with_seq_no, DataFile, LogRecord, LogRecordPos,
    HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME, NON_TXN_SEQ_NO,
};
use crate::engine::Engine;
use crate::error::{CaskError, Result};
use crate::index::{Indexer, BPTREE_INDEX_FILE_NAME};
use crate::util;

/// Key of the single record in the merge-finished file
const MERGE_FINISHED_KEY: &[u8] = b"merge.finished";

/// Suffix appended to the data directory name for the side directory
const MERGE_DIR_SUFFIX: &str = "-merge";

/// Clears the merging flag however the merge exits
struct MergeGuard<'a>(&'a AtomicBool);

impl Drop for MergeGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Engine {
    /// Compact every file older than the current active file
    ///
    /// Reads and writes continue while the merge runs; only the initial
    /// freeze holds the exclusive lock. The merged generation takes effect
    /// the next time the directory is opened.
    pub fn merge(&self) -> Result<()> {
        let started = Instant::now();

        // Step 1: Checks and freeze, under the exclusive lock
        let (frozen, boundary, _guard) = {
            let mut state = self.state.write();
            if state.active_file.is_none() {
                return Ok(());
            }

            if self
                .is_merging
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return Err(CaskError::AlreadyMerging);
            }
            let guard = MergeGuard(&self.is_merging);

            let total_size = merge_candidate_size(&self.config.dir_path)?;
            let ratio = if total_size == 0 {
                0.0
            } else {
                state.reclaim_size as f32 / total_size as f32
            };
            if ratio < self.config.merge_ratio {
                return Err(CaskError::MergeRatioUnreached {
                    ratio,
                    required: self.config.merge_ratio,
                });
            }

            let required = total_size.saturating_sub(state.reclaim_size);
            let available = util::available_disk_space(&self.config.dir_path)?;
            if available < required {
                return Err(CaskError::NoEnoughSpace {
                    required,
                    available,
                });
            }

            self.rotate_active_file(&mut state)?;
            let boundary = state
                .active_file
                .as_ref()
                .map(DataFile::file_id)
                .ok_or(CaskError::DataFileNotFound(0))?;

            let mut frozen: Vec<Arc<DataFile>> = state.older_files.values().cloned().collect();
            frozen.sort_by_key(|file| file.file_id());
            (frozen, boundary, guard)
        };

        tracing::info!(files = frozen.len(), boundary, "merge started");

        // Step 2: Fresh side directory with its own engine
        let merge_dir = merge_path(&self.config.dir_path)?;
        if merge_dir.exists() {
            fs::remove_dir_all(&merge_dir)?;
        }
        let merge_engine = Engine::open(Config {
            dir_path: merge_dir.clone(),
            sync_strategy: SyncStrategy::Never,
            index_type: IndexType::BTree,
            mmap_at_startup: false,
            ..self.config.clone()
        })?;
        let mut hint_file = DataFile::open_hint_file(&merge_dir)?;

        // Step 3: Keep records the live index still points at
        let mut kept = 0usize;
        for file in &frozen {
            let mut offset = 0;
            while let Some((record, size)) = file.read(offset)? {
                let (key, _) = parse_key_with_seq_no(&record.key)?;
                let is_live = self.index.get(&key)?.is_some_and(|pos| {
                    pos.file_id == file.file_id() && pos.offset == offset
                });

                if is_live {
                    let rewritten = LogRecord {
                        key: key_with_seq_no(&key, NON_TXN_SEQ_NO),
                        value: record.value,
                        rec_type: record.rec_type,
                    };
                    let pos = merge_engine.append_log_record_with_lock(&rewritten)?;
                    hint_file.write_hint_record(&key, &pos)?;
                    kept += 1;
                }
                offset += size;
            }
        }

        // Step 4: Persist, then mark the generation complete
        hint_file.sync()?;
        merge_engine.sync()?;
        merge_engine.close()?;

        let mut finished_file = DataFile::open_merge_finished_file(&merge_dir)?;
        let marker = LogRecord::put(
            MERGE_FINISHED_KEY.to_vec(),
            boundary.to_string().into_bytes(),
        );
        finished_file.write(&marker.encode())?;
        finished_file.sync()?;

        tracing::info!(
            kept,
            boundary,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "merge finished"
        );
        Ok(())
    }
}

/// Bytes in `dir` a merge works against: everything but the persistent index
fn merge_candidate_size(dir: &Path) -> Result<u64> {
    let total = util::dir_size(dir)?;
    let index_file = dir.join(BPTREE_INDEX_FILE_NAME);
    let index_size = match fs::metadata(&index_file) {
        Ok(metadata) => metadata.len(),
        Err(_) => 0,
    };
    Ok(total.saturating_sub(index_size))
}

/// Sibling side directory used by merges of `dir`
pub(crate) fn merge_path(dir: &Path) -> Result<PathBuf> {
    // "." and "a/.." have no final component of their own
    let dir = match dir.file_name() {
        Some(_) => dir.to_path_buf(),
        None => dir.canonicalize()?,
    };
    let name = dir.file_name().ok_or_else(|| {
        CaskError::Config(format!("cannot derive merge dir from {}", dir.display()))
    })?;
    let mut merge_name = name.to_os_string();
    merge_name.push(MERGE_DIR_SUFFIX);
    Ok(dir.with_file_name(merge_name))
}

/// Install a completed merge generation into `dir`
///
/// `persistent` is the on-disk index, which must point at the merged
/// files before the marker leaves the side directory. Returns the merge
/// boundary when a generation was installed.
pub(crate) fn install_merged_files(
    dir: &Path,
    persistent: Option<&dyn Indexer>,
) -> Result<Option<u32>> {
    let merge_dir = merge_path(dir)?;
    if !merge_dir.is_dir() {
        return Ok(None);
    }

    if !merge_dir.join(MERGE_FINISHED_FILE_NAME).exists() {
        tracing::warn!(dir = %merge_dir.display(), "removing unfinished merge");
        fs::remove_dir_all(&merge_dir)?;
        return Ok(None);
    }

    let boundary = read_non_merge_file_id(&merge_dir)?;

    // The hint leaves the side directory only after every data file is in place
    let hint_dir = if merge_dir.join(HINT_FILE_NAME).exists() {
        merge_dir.as_path()
    } else {
        dir
    };
    let merged_files = merged_file_count(hint_dir)?;

    // Step 1: Each merged file atomically replaces the original with its id
    for file_id in 0..merged_files {
        let merged = data_file_name(&merge_dir, file_id);
        if merged.exists() {
            fs::rename(merged, data_file_name(dir, file_id))?;
        }
    }

    // Step 2: Originals below the boundary with no merged counterpart
    for file_id in merged_files..boundary {
        let path = data_file_name(dir, file_id);
        if path.exists() {
            fs::remove_file(path)?;
        }
    }

    // Step 3: Positions below the boundary now refer to merged files
    if let Some(index) = persistent {
        apply_hint_to_persistent_index(&merge_dir, index, boundary)?;
        index.sync()?;
    }

    // Step 4: Hint, then the marker; the side directory goes last
    let hint = merge_dir.join(HINT_FILE_NAME);
    if hint.exists() {
        fs::rename(hint, dir.join(HINT_FILE_NAME))?;
    }
    fs::rename(
        merge_dir.join(MERGE_FINISHED_FILE_NAME),
        dir.join(MERGE_FINISHED_FILE_NAME),
    )?;
    fs::remove_dir_all(&merge_dir)?;

    tracing::info!(
        dir = %dir.display(),
        boundary,
        merged_files,
        "installed merged data files"
    );
    Ok(Some(boundary))
}

/// Boundary file id stored in the merge-finished file of `dir`
pub(crate) fn read_non_merge_file_id(dir: &Path) -> Result<u32> {
    let file = DataFile::open_merge_finished_file(dir)?;
    let (record, _) = file
        .read(0)?
        .ok_or_else(|| CaskError::Corrupted("empty merge finished file".to_string()))?;
    String::from_utf8_lossy(&record.value)
        .parse::<u32>()
        .map_err(|e| CaskError::Corrupted(format!("bad merge finished file: {}", e)))
}

/// Number of data files a merge produced, from the hint in `dir`
///
/// Merged files are numbered from 0 and none is empty, so the highest id
/// in the hint bounds them all.
fn merged_file_count(dir: &Path) -> Result<u32> {
    let mut count = 0;
    for_each_hint(dir, |_, pos| {
        count = count.max(pos.file_id + 1);
        Ok(())
    })?;
    Ok(count)
}

/// Load every hint entry of `dir` into `index`
pub(crate) fn load_index_from_hint(dir: &Path, index: &dyn Indexer) -> Result<()> {
    for_each_hint(dir, |key, pos| {
        index.put(key, pos)?;
        Ok(())
    })
}

/// Apply hint entries for keys still pointing below `boundary`
///
/// Keys written or deleted after the merge froze its files keep their
/// newer index state. Applying the same hint twice changes nothing.
pub(crate) fn apply_hint_to_persistent_index(
    dir: &Path,
    index: &dyn Indexer,
    boundary: u32,
) -> Result<()> {
    for_each_hint(dir, |key, pos| {
        let superseded = index
            .get(&key)?
            .is_some_and(|current| current.file_id < boundary);
        if superseded {
            index.put(key, pos)?;
        }
        Ok(())
    })
}

fn for_each_hint<F>(dir: &Path, mut f: F) -> Result<()>
where
    F: FnMut(Vec<u8>, LogRecordPos) -> Result<()>,
{
    if !dir.join(HINT_FILE_NAME).exists() {
        return Ok(());
    }

    let hint_file = DataFile::open_hint_file(dir)?;
    let mut offset = 0;
    while let Some((record, size)) = hint_file.read(offset)? {
        let pos = LogRecordPos::decode(&record.value)?;
        f(record.key, pos)?;
        offset += size;
    }
    Ok(())
}
