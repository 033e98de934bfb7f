//! File I/O Module
//!
//! Backends that a data file reads and appends through.
//!
//! ## Backends
//! - `FileIo`: positional reads + append-only writes on a regular file
//! - `MmapIo`: read-only memory map, used to speed up the replay at open
//!
//! Writes are only ever issued against `FileIo`. The engine swaps every
//! file back to `FileIo` before it accepts traffic.

mod file_io;
mod mmap;

use std::path::Path;

use crate::error::Result;

pub use file_io::FileIo;
pub use mmap::MmapIo;

/// Permission bits for newly created files (unix only)
pub const DATA_FILE_PERM: u32 = 0o644;

/// Abstraction over the byte storage behind a data file
pub trait IoManager: Send + Sync {
    /// Read up to `buf.len()` bytes starting at `offset`
    ///
    /// Returns the number of bytes read; fewer than requested means the
    /// end of the file was reached.
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Append `buf` at the end of the file
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Flush written bytes to stable storage
    fn sync(&self) -> Result<()>;

    /// Current length of the file in bytes
    fn size(&self) -> Result<u64>;

    /// Cut the file down to `len` bytes
    fn truncate(&mut self, len: u64) -> Result<()>;
}

/// Which backend to open a file with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoType {
    Standard,
    MemoryMapped,
}

/// Open `path` with the requested backend, creating the file if absent
pub fn new_io_manager(path: &Path, io_type: IoType) -> Result<Box<dyn IoManager>> {
    Ok(match io_type {
        IoType::Standard => Box::new(FileIo::open(path)?),
        IoType::MemoryMapped => Box::new(MmapIo::open(path)?),
    })
}
