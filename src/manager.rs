//! High-level API for mapping files by path.
//!
//! The region itself never owns a file. These helpers open the file, map it, and
//! keep both together in a [`MappedFile`] so the descriptor outlives the mapping.

use std::fs::{File, OpenOptions};
use std::ops::Deref;
use std::path::{Path, PathBuf};

use crate::errors::{MmapError, Result};
use crate::protection::{Protection, Sharing};
use crate::region::MappedRegion;

const ERR_ZERO_SIZE: &str = "size must be greater than zero";
const ERR_ZERO_LENGTH_FILE: &str = "cannot map zero-length file";

/// A region together with the file it was mapped from.
///
/// Dereferences to [`MappedRegion`]. On drop the region is closed before the file.
#[derive(Debug)]
pub struct MappedFile {
    // Declared first so it drops (and unmaps) before the file is closed.
    region: MappedRegion,
    file: File,
    path: PathBuf,
}

impl MappedFile {
    /// Path the file was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The backing file.
    #[must_use]
    pub fn file(&self) -> &File {
        &self.file
    }

    /// The mapped region.
    #[must_use]
    pub fn region(&self) -> &MappedRegion {
        &self.region
    }

    /// Split into the region and the file. Keep the file open while the region is in use
    /// if later flushes need it.
    #[must_use]
    pub fn into_parts(self) -> (MappedRegion, File) {
        (self.region, self.file)
    }
}

impl Deref for MappedFile {
    type Target = MappedRegion;

    fn deref(&self) -> &MappedRegion {
        &self.region
    }
}

/// Create a new file (truncating if it exists) of `size` bytes and map it
/// read-write and shared.
///
/// # Errors
///
/// Returns `MmapError::InvalidLength` if size is zero.
/// Returns `MmapError::Io` if file creation fails, or the errors of [`MappedRegion::create`].
pub fn create_region<P: AsRef<Path>>(path: P, size: u64) -> Result<MappedFile> {
    if size == 0 {
        return Err(MmapError::InvalidLength(ERR_ZERO_SIZE));
    }
    let path_ref = path.as_ref();
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .read(true)
        .truncate(true)
        .open(path_ref)?;
    file.set_len(size)?;
    let region = MappedRegion::create(size, 0, Protection::ReadWrite, Sharing::Shared, &file)?;
    Ok(MappedFile {
        region,
        file,
        path: path_ref.to_path_buf(),
    })
}

/// Open an existing file and map all of it with the requested protection and sharing.
///
/// The file is always opened for reading (the mapping calls require it) and for
/// writing only when writes must reach it, i.e. a writable shared mapping. On
/// Windows, executable protections also request execute access, which
/// `CreateFileMappingW` demands for `PAGE_EXECUTE_*` mappings.
///
/// # Errors
///
/// Returns `MmapError::InvalidLength` if the file is empty.
/// Returns `MmapError::Io` if opening fails, or the errors of [`MappedRegion::create`].
pub fn load_region<P: AsRef<Path>>(
    path: P,
    protection: Protection,
    sharing: Sharing,
) -> Result<MappedFile> {
    let path_ref = path.as_ref();
    let writes_through = protection.is_writable() && sharing.is_shared();
    let mut options = OpenOptions::new();
    options.read(true).write(writes_through);
    #[cfg(windows)]
    request_execute_access(&mut options, protection, writes_through);
    let file = options.open(path_ref)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Err(MmapError::InvalidLength(ERR_ZERO_LENGTH_FILE));
    }
    let region = MappedRegion::create(len, 0, protection, sharing, &file)?;
    Ok(MappedFile {
        region,
        file,
        path: path_ref.to_path_buf(),
    })
}

#[cfg(windows)]
fn request_execute_access(options: &mut OpenOptions, protection: Protection, writes_through: bool) {
    use std::os::windows::fs::OpenOptionsExt;
    use windows_sys::Win32::Foundation::{GENERIC_EXECUTE, GENERIC_READ, GENERIC_WRITE};

    if !protection.is_executable() {
        return;
    }
    let mut access = GENERIC_READ | GENERIC_EXECUTE;
    if writes_through {
        access |= GENERIC_WRITE;
    }
    options.access_mode(access);
}
