//! Log record codec
//!
//! ## Record Format
//! ```text
//! ┌──────────┬──────────┬────────────────┬──────────────────┬─────┬───────┐
//! │ CRC (4)  │ Type (1) │ KeyLen (var)   │ ValueLen (var)   │ Key │ Value │
//! └──────────┴──────────┴────────────────┴──────────────────┴─────┴───────┘
//! ```
//! - CRC32 (IEEE, little-endian) covers every byte after the CRC field
//! - Lengths are unsigned LEB128 varints (at most 5 bytes each for u32)
//! - An all-zero CRC/KeyLen/ValueLen header marks the unwritten tail of a file

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{CaskError, Result};

/// Largest possible header: CRC (4) + Type (1) + KeyLen (5) + ValueLen (5)
pub const MAX_LOG_RECORD_HEADER_SIZE: usize = 4 + 1 + 5 + 5;

/// Smallest buffer a header can be decoded from
const MIN_LOG_RECORD_HEADER_SIZE: usize = 5;

/// Sequence number of writes that are not part of a batch
pub const NON_TXN_SEQ_NO: u64 = 0;

/// Key of the commit marker closing a batch
pub const TXN_FIN_KEY: &[u8] = b"txn-fin";

// =============================================================================
// Record Types
// =============================================================================

/// Kind of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// A live value
    Put = 0,

    /// A tombstone (deleted key)
    Delete = 1,

    /// Marks a batch as committed
    TxnFinished = 2,
}

impl TryFrom<u8> for LogRecordType {
    type Error = CaskError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Put),
            1 => Ok(Self::Delete),
            2 => Ok(Self::TxnFinished),
            other => Err(CaskError::Corrupted(format!(
                "unknown log record type {}",
                other
            ))),
        }
    }
}

/// A single entry in a data file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub rec_type: LogRecordType,
}

impl LogRecord {
    pub fn put(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            value,
            rec_type: LogRecordType::Put,
        }
    }

    pub fn delete(key: Vec<u8>) -> Self {
        Self {
            key,
            value: Vec::new(),
            rec_type: LogRecordType::Delete,
        }
    }

    /// Encode into `[crc][type][key_len][value_len][key][value]`
    ///
    /// Returns the encoded bytes; their length is the on-disk record size.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(
            MAX_LOG_RECORD_HEADER_SIZE + self.key.len() + self.value.len(),
        );

        buf.put_u32_le(0); // CRC placeholder
        buf.put_u8(self.rec_type as u8);
        put_uvarint(&mut buf, self.key.len() as u64);
        put_uvarint(&mut buf, self.value.len() as u64);
        buf.put_slice(&self.key);
        buf.put_slice(&self.value);

        let crc = crc32fast::hash(&buf[4..]);
        buf[..4].copy_from_slice(&crc.to_le_bytes());

        buf.freeze()
    }
}

// =============================================================================
// Header
// =============================================================================

/// Decoded record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecordHeader {
    pub crc: u32,
    pub rec_type: u8,
    pub key_size: u32,
    pub value_size: u32,
}

impl LogRecordHeader {
    /// True for the zero pattern left in a pre-extended, unwritten tail
    pub fn is_sentinel(&self) -> bool {
        self.crc == 0 && self.key_size == 0 && self.value_size == 0
    }
}

/// Decode a header from the front of `buf`
///
/// Returns `None` when `buf` is too short to hold a complete header, which
/// callers treat as the end of the stream.
pub fn decode_header(buf: &[u8]) -> Option<(LogRecordHeader, usize)> {
    if buf.len() < MIN_LOG_RECORD_HEADER_SIZE {
        return None;
    }

    let crc = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let rec_type = buf[4];
    let mut index = 5;

    let (key_size, n) = read_uvarint(&buf[index..])?;
    index += n;
    let (value_size, n) = read_uvarint(&buf[index..])?;
    index += n;

    let key_size = u32::try_from(key_size).ok()?;
    let value_size = u32::try_from(value_size).ok()?;

    Some((
        LogRecordHeader {
            crc,
            rec_type,
            key_size,
            value_size,
        },
        index,
    ))
}

/// CRC over the header bytes after the CRC field, then key and value
pub fn record_crc(header_without_crc: &[u8], key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header_without_crc);
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

/// Check a decoded record against the CRC stored in its header
pub fn verify(record: &LogRecord, header: &LogRecordHeader, header_bytes: &[u8]) -> bool {
    record_crc(&header_bytes[4..], &record.key, &record.value) == header.crc
}

// =============================================================================
// Record Position
// =============================================================================

/// Where a record lives on disk; the value the index stores per key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogRecordPos {
    pub file_id: u32,
    pub offset: u64,
    pub size: u32,
}

impl LogRecordPos {
    /// Three varints: file id, offset, size
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(5 + 10 + 5);
        put_uvarint(&mut buf, self.file_id as u64);
        put_uvarint(&mut buf, self.offset);
        put_uvarint(&mut buf, self.size as u64);
        buf.to_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let malformed = || CaskError::Corrupted("malformed log record position".to_string());

        let (file_id, n1) = read_uvarint(buf).ok_or_else(malformed)?;
        let (offset, n2) = read_uvarint(&buf[n1..]).ok_or_else(malformed)?;
        let (size, _) = read_uvarint(&buf[n1 + n2..]).ok_or_else(malformed)?;

        Ok(Self {
            file_id: u32::try_from(file_id).map_err(|_| malformed())?,
            offset,
            size: u32::try_from(size).map_err(|_| malformed())?,
        })
    }
}

// =============================================================================
// Sequence Number Prefix
// =============================================================================

/// Prefix `key` with `seq_no` as stored in the log
pub fn key_with_seq_no(key: &[u8], seq_no: u64) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(10 + key.len());
    put_uvarint(&mut buf, seq_no);
    buf.put_slice(key);
    buf.to_vec()
}

/// Split a stored key into the caller-visible key and its sequence number
pub fn parse_key_with_seq_no(key: &[u8]) -> Result<(Vec<u8>, u64)> {
    let (seq_no, n) = read_uvarint(key).ok_or_else(|| {
        CaskError::Corrupted("log record key has no sequence number".to_string())
    })?;
    Ok((key[n..].to_vec(), seq_no))
}

// =============================================================================
// Varints
// =============================================================================

/// Append `value` as an unsigned LEB128 varint
pub fn put_uvarint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Read an unsigned LEB128 varint from the front of `buf`
///
/// Returns the value and the number of bytes consumed, or `None` if the
/// buffer ends mid-varint or the varint overflows 64 bits.
pub fn read_uvarint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, &byte) in buf.iter().enumerate().take(10) {
        let low = (byte & 0x7f) as u64;
        if i == 9 && byte > 1 {
            return None;
        }
        value |= low << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}
