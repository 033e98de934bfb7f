//! Filesystem helpers shared by the engine and merge

use std::fs;
use std::path::Path;

use crate::error::Result;

/// Total size in bytes of every file under `dir`, recursively
pub fn dir_size(dir: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += metadata.len();
        }
    }
    Ok(total)
}

/// Free bytes on the filesystem holding `dir`
pub fn available_disk_space(dir: &Path) -> Result<u64> {
    Ok(fs2::available_space(dir)?)
}

/// Recursively copy `src` into `dest`, skipping entries named in `exclude`
///
/// `dest` is created if missing; existing files in it are overwritten.
pub fn copy_dir(src: &Path, dest: &Path, exclude: &[&str]) -> Result<()> {
    fs::create_dir_all(dest)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if exclude.iter().any(|skip| name == *skip) {
            continue;
        }

        let target = dest.join(&name);
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target, exclude)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}
