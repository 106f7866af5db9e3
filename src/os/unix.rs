//! POSIX backend: `mmap`, `munmap`, `mlock`, `munlock` and `msync` through libc.

use std::io;
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};

use libc::c_int;

use super::{retry_interrupted, Platform, RawDescriptor};
use crate::errors::{MmapError, Result};
use crate::flush::SyncMode;
use crate::protection::{Protection, Sharing};
use crate::utils::page_size;

/// Maps through the POSIX virtual-memory calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixMapper;

/// Native `PROT_*` bits for a protection intent.
pub(crate) fn protection_flags(protection: Protection) -> c_int {
    match protection {
        Protection::ReadOnly => libc::PROT_READ,
        Protection::WriteOnly => libc::PROT_WRITE,
        Protection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        Protection::ExecReadOnly => libc::PROT_EXEC | libc::PROT_READ,
        Protection::ExecWriteOnly => libc::PROT_EXEC | libc::PROT_WRITE,
        Protection::ExecReadWrite => libc::PROT_EXEC | libc::PROT_READ | libc::PROT_WRITE,
    }
}

/// Native `MAP_*` sharing flag for a sharing intent.
pub(crate) fn sharing_flags(sharing: Sharing) -> io::Result<c_int> {
    match sharing {
        Sharing::Shared => Ok(libc::MAP_SHARED),
        Sharing::Private => Ok(libc::MAP_PRIVATE),
        #[cfg(target_os = "linux")]
        Sharing::SharedValidate => Ok(libc::MAP_SHARED_VALIDATE),
        #[cfg(not(target_os = "linux"))]
        Sharing::SharedValidate => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "MAP_SHARED_VALIDATE is only available on Linux",
        )),
    }
}

/// Native `MS_*` flags for a flush mode.
pub(crate) fn sync_flags(mode: SyncMode) -> c_int {
    match mode {
        SyncMode::Synchronous => libc::MS_SYNC,
        SyncMode::Asynchronous => libc::MS_ASYNC,
        SyncMode::InvalidateOtherMappings => libc::MS_SYNC | libc::MS_INVALIDATE,
    }
}

fn check(ret: c_int) -> io::Result<()> {
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

impl Platform for UnixMapper {
    // msync alone reaches stable storage; nothing is kept beside the view.
    type Backing = ();

    fn granularity(&self) -> usize {
        page_size()
    }

    fn file_len(&self, descriptor: RawDescriptor) -> Result<Option<u64>> {
        let mut stat = MaybeUninit::<libc::stat>::uninit();
        // SAFETY: fstat writes only into the buffer it is handed.
        check(unsafe { libc::fstat(descriptor, stat.as_mut_ptr()) }).map_err(|source| {
            MmapError::MapFailed {
                call: "fstat",
                source,
            }
        })?;
        // SAFETY: fstat succeeded, so the structure is initialized.
        let stat = unsafe { stat.assume_init() };
        if stat.st_mode & libc::S_IFMT != libc::S_IFREG {
            return Ok(None);
        }
        Ok(u64::try_from(stat.st_size).ok())
    }

    unsafe fn map(
        &self,
        len: usize,
        offset: u64,
        protection: Protection,
        sharing: Sharing,
        descriptor: RawDescriptor,
    ) -> Result<(NonNull<u8>, ())> {
        let map_failed = |source: io::Error| MmapError::MapFailed {
            call: "mmap",
            source,
        };
        let prot = protection_flags(protection);
        let flags = sharing_flags(sharing).map_err(map_failed)?;
        let offset = libc::off_t::try_from(offset).map_err(|_| {
            map_failed(io::Error::new(
                io::ErrorKind::InvalidInput,
                "offset does not fit in off_t",
            ))
        })?;

        let addr = retry_interrupted(|| {
            // SAFETY: a null hint lets the kernel choose the address; the caller
            // guarantees the descriptor is valid for this protection.
            let addr = unsafe { libc::mmap(ptr::null_mut(), len, prot, flags, descriptor, offset) };
            if addr == libc::MAP_FAILED {
                Err(io::Error::last_os_error())
            } else {
                Ok(addr)
            }
        })
        .map_err(map_failed)?;

        log::debug!(
            "mmap: {len} bytes at {addr:p} (fd {descriptor}, offset {offset}, {protection:?}, {sharing:?})"
        );
        NonNull::new(addr.cast::<u8>())
            .map(|base| (base, ()))
            .ok_or_else(|| map_failed(io::Error::new(io::ErrorKind::Other, "mmap returned null")))
    }

    unsafe fn unmap(&self, addr: NonNull<u8>, len: usize, _backing: ()) -> Result<()> {
        retry_interrupted(|| {
            // SAFETY: the caller guarantees addr/len describe a live mapping.
            check(unsafe { libc::munmap(addr.as_ptr().cast(), len) })
        })
        .map_err(|source| MmapError::UnmapFailed {
            call: "munmap",
            source,
        })?;
        log::debug!("munmap: {len} bytes at {:p}", addr.as_ptr());
        Ok(())
    }

    unsafe fn lock(&self, addr: NonNull<u8>, len: usize) -> Result<()> {
        retry_interrupted(|| {
            // SAFETY: the caller guarantees the range lies within a live mapping.
            check(unsafe { libc::mlock(addr.as_ptr().cast_const().cast(), len) })
        })
        .map_err(|source| MmapError::LockFailed {
            call: "mlock",
            source,
        })
    }

    unsafe fn unlock(&self, addr: NonNull<u8>, len: usize) -> Result<()> {
        retry_interrupted(|| {
            // SAFETY: the caller guarantees the range lies within a live mapping.
            check(unsafe { libc::munlock(addr.as_ptr().cast_const().cast(), len) })
        })
        .map_err(|source| MmapError::UnlockFailed {
            call: "munlock",
            source,
        })
    }

    unsafe fn flush(&self, addr: NonNull<u8>, len: usize, mode: SyncMode, _backing: &()) -> Result<()> {
        let flags = sync_flags(mode);
        retry_interrupted(|| {
            // SAFETY: the caller guarantees a page-aligned range within a live mapping.
            check(unsafe { libc::msync(addr.as_ptr().cast(), len, flags) })
        })
        .map_err(|source| MmapError::FlushFailed {
            call: "msync",
            source,
        })
    }
}
