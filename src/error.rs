//! Error types for CaskDB
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using CaskError
pub type Result<T> = std::result::Result<T, CaskError>;

/// Unified error type for CaskDB operations
#[derive(Debug, Error)]
pub enum CaskError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Input Validation
    // -------------------------------------------------------------------------
    #[error("Key is empty")]
    KeyEmpty,

    #[error("Invalid key")]
    InvalidKey,

    // -------------------------------------------------------------------------
    // Lookup Errors
    // -------------------------------------------------------------------------
    #[error("Key not found")]
    KeyNotFound,

    #[error("Data file {0} not found")]
    DataFileNotFound(u32),

    // -------------------------------------------------------------------------
    // Corruption
    // -------------------------------------------------------------------------
    #[error("CRC mismatch in file {file_id} at offset {offset}")]
    CrcMismatch { file_id: u32, offset: u64 },

    #[error("Data corruption detected: {0}")]
    Corrupted(String),

    // -------------------------------------------------------------------------
    // Resource Contention
    // -------------------------------------------------------------------------
    #[error("Database directory is in use by another instance")]
    DatabaseInUse,

    #[error("A merge is already in progress")]
    AlreadyMerging,

    #[error("Write batch exceeds the maximum of {max} pending writes")]
    ExceedsMaxBatchSize { max: usize },

    #[error("Reclaimable ratio {ratio:.3} has not reached the merge ratio {required:.3}")]
    MergeRatioUnreached { ratio: f32, required: f32 },

    #[error("Not enough disk space for merge: need {required} bytes, {available} available")]
    NoEnoughSpace { required: u64, available: u64 },

    #[error("Write batch unavailable: no sequence number baseline for the persistent index")]
    BatchUnavailable,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Index Errors
    // -------------------------------------------------------------------------
    #[error("Index error: {0}")]
    Index(String),
}
