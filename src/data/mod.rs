//! Data Module
//!
//! Append-only log files and the record format written into them.
//!
//! ## Responsibilities
//! - Encode/decode log records with CRC32 integrity checks
//! - Append records to the active file, read them back by offset
//! - Name and open the auxiliary files (hint, merge marker, seq-no)
//!
//! Every file in a data directory uses the same record format, including
//! the hint, merge-finished and seq-no files.

mod data_file;
mod log_record;

pub use data_file::{
    data_file_name, DataFile, DATA_FILE_SUFFIX, HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME,
    SEQ_NO_FILE_NAME,
};
pub use log_record::{
    decode_header, key_with_seq_no, parse_key_with_seq_no, put_uvarint, read_uvarint,
    record_crc, verify, LogRecord, LogRecordHeader, LogRecordPos, LogRecordType,
    MAX_LOG_RECORD_HEADER_SIZE, NON_TXN_SEQ_NO, TXN_FIN_KEY,
};
