//! Memory-mapped backend
//!
//! Read-only view of a data file. Only used while replaying at open.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{CaskError, Result};

use super::IoManager;

/// Read-only memory map over a data file
pub struct MmapIo {
    /// `None` for an empty file (nothing to map)
    map: Option<Mmap>,
}

impl MmapIo {
    /// Map the file at `path`, creating it first if absent
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        if file.metadata()?.len() == 0 {
            return Ok(Self { map: None });
        }

        // SAFETY: the map is only read while the engine is opening, before
        // any append can touch the file, and it is dropped before the file
        // is written again.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self { map: Some(map) })
    }

    fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }
}

impl IoManager for MmapIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let bytes = self.bytes();
        let start = offset.min(bytes.len() as u64) as usize;
        let n = buf.len().min(bytes.len() - start);
        buf[..n].copy_from_slice(&bytes[start..start + n]);
        Ok(n)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(read_only())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.bytes().len() as u64)
    }

    fn truncate(&mut self, _len: u64) -> Result<()> {
        Err(read_only())
    }
}

fn read_only() -> CaskError {
    CaskError::Io(io::Error::new(
        io::ErrorKind::Unsupported,
        "memory-mapped data files are read-only",
    ))
}
