//! # CaskDB
//!
//! An embedded, log-structured key-value storage engine (Bitcask model):
//! - Append-only data files with CRC32-checked records
//! - Full in-memory index (or a persistent one) pointing at the latest record
//! - Atomic write batches, crash recovery by replay
//! - Online compaction with a hint file for fast restarts
//! - Single-writer/multi-reader concurrency model
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │        Engine API  (put / get / delete / batch / iter)       │
//! │               (Single Writer / Multi Reader)                 │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ Data Files  │◄─────────│    Index    │
//!   │  (Append)   │ position │ BTree / ART │
//!   └──────┬──────┘          │   / B+Tree  │
//!          │                 └─────────────┘
//!          ▼
//!   ┌─────────────┐
//!   │    Merge    │
//!   │ (hint file) │
//!   └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod fio;
pub mod data;
pub mod index;
pub mod batch;
pub mod engine;
pub mod iterator;
pub mod merge;
pub mod util;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use batch::WriteBatch;
pub use config::{Config, IndexType, IteratorOptions, SyncStrategy, WriteBatchOptions};
pub use engine::{Engine, Stat};
pub use error::{CaskError, Result};
pub use iterator::DbIterator;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of CaskDB
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
