//! Tests for DataFile
//!
//! These tests verify:
//! - Append + read back by offset
//! - End-of-data detection (EOF, zero sentinel, truncated tail)
//! - CRC mismatch surfaces as an error
//! - Hint / merge-finished / seq-no files
//! - Memory-mapped reads see the same records

use std::fs::OpenOptions;
use std::io::Write;

use caskdb::data::{
    data_file_name, DataFile, LogRecord, LogRecordPos, LogRecordType, HINT_FILE_NAME,
};
use caskdb::fio::IoType;
use caskdb::CaskError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn write_records(file: &mut DataFile, records: &[LogRecord]) -> Vec<u64> {
    records
        .iter()
        .map(|record| {
            let offset = file.write_offset();
            file.write(&record.encode()).unwrap();
            offset
        })
        .collect()
}

fn append_raw(dir: &TempDir, file_id: u32, bytes: &[u8]) {
    let mut file = OpenOptions::new()
        .append(true)
        .open(data_file_name(dir.path(), file_id))
        .unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

// =============================================================================
// Basic Tests
// =============================================================================

#[test]
fn test_file_name_is_zero_padded() {
    let name = data_file_name(std::path::Path::new("/db"), 42);
    assert_eq!(name, std::path::PathBuf::from("/db/000000042.data"));
}

#[test]
fn test_write_and_read() {
    let dir = TempDir::new().unwrap();
    let mut file = DataFile::open(dir.path(), 0, IoType::Standard).unwrap();

    let records = vec![
        LogRecord::put(b"a".to_vec(), b"1".to_vec()),
        LogRecord::put(b"b".to_vec(), Vec::new()),
        LogRecord::delete(b"a".to_vec()),
    ];
    let offsets = write_records(&mut file, &records);

    for (record, offset) in records.iter().zip(&offsets) {
        let (read, size) = file.read(*offset).unwrap().unwrap();
        assert_eq!(&read, record);
        assert_eq!(size, record.encode().len() as u64);
    }
    assert_eq!(file.write_offset(), file.size().unwrap());
}

#[test]
fn test_read_past_end() {
    let dir = TempDir::new().unwrap();
    let mut file = DataFile::open(dir.path(), 0, IoType::Standard).unwrap();
    assert!(file.read(0).unwrap().is_none());

    write_records(&mut file, &[LogRecord::put(b"k".to_vec(), b"v".to_vec())]);
    assert!(file.read(file.write_offset()).unwrap().is_none());
}

#[test]
fn test_zero_tail_is_end_of_data() {
    let dir = TempDir::new().unwrap();
    {
        let mut file = DataFile::open(dir.path(), 0, IoType::Standard).unwrap();
        write_records(&mut file, &[LogRecord::put(b"k".to_vec(), b"v".to_vec())]);
        file.sync().unwrap();
    }
    append_raw(&dir, 0, &[0u8; 32]);

    let file = DataFile::open(dir.path(), 0, IoType::Standard).unwrap();
    let (_, size) = file.read(0).unwrap().unwrap();
    assert!(file.read(size).unwrap().is_none());
}

#[test]
fn test_truncated_tail_is_end_of_data() {
    let dir = TempDir::new().unwrap();
    let full = LogRecord::put(b"key".to_vec(), b"some value".to_vec()).encode();
    {
        let mut file = DataFile::open(dir.path(), 0, IoType::Standard).unwrap();
        file.write(&full).unwrap();
        file.sync().unwrap();
    }
    // Half of a second record, as if the process died mid-append
    append_raw(&dir, 0, &full[..full.len() / 2]);

    let file = DataFile::open(dir.path(), 0, IoType::Standard).unwrap();
    let (_, size) = file.read(0).unwrap().unwrap();
    assert!(file.read(size).unwrap().is_none());
}

#[test]
fn test_crc_mismatch_is_error() {
    let dir = TempDir::new().unwrap();
    let mut encoded = LogRecord::put(b"key".to_vec(), b"value".to_vec())
        .encode()
        .to_vec();
    let last = encoded.len() - 1;
    encoded[last] ^= 0x01;
    {
        let mut file = DataFile::open(dir.path(), 3, IoType::Standard).unwrap();
        file.write(&encoded).unwrap();
    }

    let file = DataFile::open(dir.path(), 3, IoType::Standard).unwrap();
    match file.read(0) {
        Err(CaskError::CrcMismatch { file_id, offset }) => {
            assert_eq!(file_id, 3);
            assert_eq!(offset, 0);
        }
        other => panic!("expected CrcMismatch, got {:?}", other.map(|r| r.is_some())),
    }
}

#[test]
fn test_truncate_moves_write_offset() {
    let dir = TempDir::new().unwrap();
    let mut file = DataFile::open(dir.path(), 0, IoType::Standard).unwrap();
    let offsets = write_records(
        &mut file,
        &[
            LogRecord::put(b"a".to_vec(), b"1".to_vec()),
            LogRecord::put(b"b".to_vec(), b"2".to_vec()),
        ],
    );

    file.truncate(offsets[1]).unwrap();
    assert_eq!(file.write_offset(), offsets[1]);
    assert_eq!(file.size().unwrap(), offsets[1]);
    assert!(file.read(offsets[1]).unwrap().is_none());

    // Appends continue at the truncated length
    let offset = write_records(&mut file, &[LogRecord::put(b"c".to_vec(), b"3".to_vec())])[0];
    assert_eq!(offset, offsets[1]);
    assert_eq!(file.read(offset).unwrap().unwrap().0.key, b"c");
}

// =============================================================================
// Auxiliary File Tests
// =============================================================================

#[test]
fn test_hint_record() {
    let dir = TempDir::new().unwrap();
    let pos = LogRecordPos {
        file_id: 7,
        offset: 4096,
        size: 33,
    };
    {
        let mut hint = DataFile::open_hint_file(dir.path()).unwrap();
        hint.write_hint_record(b"user:1", &pos).unwrap();
        hint.sync().unwrap();
    }
    assert!(dir.path().join(HINT_FILE_NAME).exists());

    let hint = DataFile::open_hint_file(dir.path()).unwrap();
    let (record, _) = hint.read(0).unwrap().unwrap();
    assert_eq!(record.key, b"user:1");
    assert_eq!(record.rec_type, LogRecordType::Put);
    assert_eq!(LogRecordPos::decode(&record.value).unwrap(), pos);
}

// =============================================================================
// Memory-Mapped Tests
// =============================================================================

#[test]
fn test_mmap_reads_same_records() {
    let dir = TempDir::new().unwrap();
    let records: Vec<LogRecord> = (0..50)
        .map(|i| LogRecord::put(format!("key{}", i).into_bytes(), vec![i as u8; i]))
        .collect();
    let offsets = {
        let mut file = DataFile::open(dir.path(), 1, IoType::Standard).unwrap();
        let offsets = write_records(&mut file, &records);
        file.sync().unwrap();
        offsets
    };

    let mut file = DataFile::open(dir.path(), 1, IoType::MemoryMapped).unwrap();
    for (record, offset) in records.iter().zip(&offsets) {
        assert_eq!(&file.read(*offset).unwrap().unwrap().0, record);
    }

    // Mapped files refuse appends until switched back
    assert!(file.write(b"x").is_err());
    file.set_io_type(dir.path(), IoType::Standard).unwrap();
    file.set_write_offset(file.size().unwrap());
    file.write(&LogRecord::put(b"z".to_vec(), b"z".to_vec()).encode())
        .unwrap();
}
