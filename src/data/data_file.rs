//! Data File
//!
//! A single append-only log file plus its write cursor.

use std::path::{Path, PathBuf};

use crate::error::{CaskError, Result};
use crate::fio::{new_io_manager, IoManager, IoType};

use super::log_record::{
    decode_header, record_crc, LogRecord, LogRecordPos, LogRecordType, MAX_LOG_RECORD_HEADER_SIZE,
};

/// Suffix of log files: `000000042.data`
pub const DATA_FILE_SUFFIX: &str = ".data";

/// Key -> position snapshot written by a merge
pub const HINT_FILE_NAME: &str = "hint_index";

/// Marker whose single record holds the first file id not merged
pub const MERGE_FINISHED_FILE_NAME: &str = "merge_FIN";

/// Last used sequence number, written at close
pub const SEQ_NO_FILE_NAME: &str = "seq_No";

/// Path of the data file with the given id
pub fn data_file_name(dir: &Path, file_id: u32) -> PathBuf {
    dir.join(format!("{:09}{}", file_id, DATA_FILE_SUFFIX))
}

/// An append-only log file
///
/// `write_offset` is only meaningful for the active file; the engine sets
/// it after replay.
pub struct DataFile {
    file_id: u32,
    write_offset: u64,
    io: Box<dyn IoManager>,
}

impl DataFile {
    /// Open or create the data file `file_id` in `dir`
    pub fn open(dir: &Path, file_id: u32, io_type: IoType) -> Result<Self> {
        Self::open_path(&data_file_name(dir, file_id), file_id, io_type)
    }

    /// Open the hint file in `dir`
    pub fn open_hint_file(dir: &Path) -> Result<Self> {
        Self::open_path(&dir.join(HINT_FILE_NAME), 0, IoType::Standard)
    }

    /// Open the merge-finished marker in `dir`
    pub fn open_merge_finished_file(dir: &Path) -> Result<Self> {
        Self::open_path(&dir.join(MERGE_FINISHED_FILE_NAME), 0, IoType::Standard)
    }

    /// Open the sequence number file in `dir`
    pub fn open_seq_no_file(dir: &Path) -> Result<Self> {
        Self::open_path(&dir.join(SEQ_NO_FILE_NAME), 0, IoType::Standard)
    }

    fn open_path(path: &Path, file_id: u32, io_type: IoType) -> Result<Self> {
        let io = new_io_manager(path, io_type)?;
        Ok(Self {
            file_id,
            write_offset: 0,
            io,
        })
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn write_offset(&self) -> u64 {
        self.write_offset
    }

    pub fn set_write_offset(&mut self, offset: u64) {
        self.write_offset = offset;
    }

    /// Append raw bytes and advance the write cursor
    ///
    /// A failed write is not rolled back.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.io.write(buf)?;
        self.write_offset += n as u64;
        Ok(n)
    }

    /// Append a hint entry: the real key mapped to its encoded position
    pub fn write_hint_record(&mut self, key: &[u8], pos: &LogRecordPos) -> Result<()> {
        let record = LogRecord::put(key.to_vec(), pos.encode());
        self.write(&record.encode())?;
        Ok(())
    }

    /// Read the record starting at `offset`
    ///
    /// Returns the record and its encoded length, or `None` at the end of
    /// the valid data: true end of file, the zero sentinel, or a trailing
    /// record cut short by a crash.
    pub fn read(&self, offset: u64) -> Result<Option<(LogRecord, u64)>> {
        let file_size = self.io.size()?;
        if offset >= file_size {
            return Ok(None);
        }

        // The last record may be shorter than a maximal header
        let header_len = (MAX_LOG_RECORD_HEADER_SIZE as u64).min(file_size - offset) as usize;
        let mut header_buf = vec![0u8; header_len];
        let n = self.io.read(&mut header_buf, offset)?;
        header_buf.truncate(n);

        let (header, header_size) = match decode_header(&header_buf) {
            Some(decoded) => decoded,
            None => return Ok(None),
        };
        if header.is_sentinel() {
            return Ok(None);
        }

        let key_size = header.key_size as usize;
        let value_size = header.value_size as usize;
        let record_size = (header_size + key_size + value_size) as u64;
        if offset + record_size > file_size {
            tracing::warn!(
                file_id = self.file_id,
                offset,
                "truncated record at end of data file"
            );
            return Ok(None);
        }

        let mut kv_buf = vec![0u8; key_size + value_size];
        if !kv_buf.is_empty() {
            let n = self.io.read(&mut kv_buf, offset + header_size as u64)?;
            if n < kv_buf.len() {
                return Ok(None);
            }
        }
        let (key, value) = kv_buf.split_at(key_size);
        if record_crc(&header_buf[4..header_size], key, value) != header.crc {
            return Err(CaskError::CrcMismatch {
                file_id: self.file_id,
                offset,
            });
        }

        let value = kv_buf.split_off(key_size);
        let record = LogRecord {
            key: kv_buf,
            value,
            rec_type: LogRecordType::try_from(header.rec_type)?,
        };

        Ok(Some((record, record_size)))
    }

    /// Flush to stable storage
    pub fn sync(&self) -> Result<()> {
        self.io.sync()
    }

    /// Current file length
    pub fn size(&self) -> Result<u64> {
        self.io.size()
    }

    /// Drop everything past `len` bytes and move the write cursor there
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.io.truncate(len)?;
        self.write_offset = len;
        Ok(())
    }

    /// Reopen the underlying file with a different backend
    pub fn set_io_type(&mut self, dir: &Path, io_type: IoType) -> Result<()> {
        self.io = new_io_manager(&data_file_name(dir, self.file_id), io_type)?;
        Ok(())
    }

    /// Flush and release the backend
    pub fn close(self) -> Result<()> {
        self.io.sync()
    }
}
