//! Windows backend: `CreateFileMappingW`/`MapViewOfFile` views, `VirtualLock`,
//! `VirtualUnlock`, and `FlushViewOfFile` followed by `FlushFileBuffers`.

use std::io;
use std::os::windows::io::{AsRawHandle, BorrowedHandle, OwnedHandle};
use std::ptr::{self, NonNull};

use windows_sys::Win32::Foundation::{CloseHandle, ERROR_NOT_LOCKED, HANDLE};
use windows_sys::Win32::Storage::FileSystem::{
    FlushFileBuffers, GetFileSizeEx, GetFileType, FILE_TYPE_DISK,
};
use windows_sys::Win32::System::Memory::{
    CreateFileMappingW, FlushViewOfFile, MapViewOfFile, UnmapViewOfFile, VirtualLock,
    VirtualUnlock, FILE_MAP, FILE_MAP_COPY, FILE_MAP_EXECUTE, FILE_MAP_READ, FILE_MAP_WRITE,
    MEMORY_MAPPED_VIEW_ADDRESS, PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE,
    PAGE_EXECUTE_WRITECOPY, PAGE_PROTECTION_FLAGS, PAGE_READONLY, PAGE_READWRITE, PAGE_WRITECOPY,
};

use super::{Platform, RawDescriptor};
use crate::errors::{MmapError, Result};
use crate::flush::SyncMode;
use crate::protection::{Protection, Sharing};
use crate::utils::allocation_granularity;

/// Maps through file-mapping objects and views.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsMapper;

/// Page protection for the mapping object and desired access for the view.
///
/// Windows has no write-only pages, so write-only intents map read-write; private
/// writable mappings use the copy-on-write protections.
pub(crate) fn native_flags(
    protection: Protection,
    sharing: Sharing,
) -> io::Result<(PAGE_PROTECTION_FLAGS, FILE_MAP)> {
    let flags = match (sharing, protection) {
        (Sharing::SharedValidate, _) => {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "shared-validate mappings are not supported on Windows",
            ))
        }
        (_, Protection::ReadOnly) => (PAGE_READONLY, FILE_MAP_READ),
        (_, Protection::ExecReadOnly) => (PAGE_EXECUTE_READ, FILE_MAP_READ | FILE_MAP_EXECUTE),
        (Sharing::Shared, Protection::WriteOnly | Protection::ReadWrite) => {
            (PAGE_READWRITE, FILE_MAP_WRITE)
        }
        (Sharing::Shared, Protection::ExecWriteOnly | Protection::ExecReadWrite) => {
            (PAGE_EXECUTE_READWRITE, FILE_MAP_WRITE | FILE_MAP_EXECUTE)
        }
        (Sharing::Private, Protection::WriteOnly | Protection::ReadWrite) => {
            (PAGE_WRITECOPY, FILE_MAP_COPY)
        }
        (Sharing::Private, Protection::ExecWriteOnly | Protection::ExecReadWrite) => {
            (PAGE_EXECUTE_WRITECOPY, FILE_MAP_COPY | FILE_MAP_EXECUTE)
        }
    };
    Ok(flags)
}

fn check(ret: i32) -> io::Result<()> {
    if ret == 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

impl Platform for WindowsMapper {
    /// Duplicate of the file handle for writable shared views, so synchronous
    /// flushes can reach the disk after the caller closes its own handle.
    type Backing = Option<OwnedHandle>;

    fn granularity(&self) -> usize {
        allocation_granularity()
    }

    fn file_len(&self, descriptor: RawDescriptor) -> Result<Option<u64>> {
        let handle = descriptor as HANDLE;
        // SAFETY: GetFileType only inspects the handle value.
        if unsafe { GetFileType(handle) } != FILE_TYPE_DISK {
            return Ok(None);
        }
        let mut size = 0i64;
        // SAFETY: `size` is a valid out-pointer for the duration of the call.
        check(unsafe { GetFileSizeEx(handle, &mut size) }).map_err(|source| {
            MmapError::MapFailed {
                call: "GetFileSizeEx",
                source,
            }
        })?;
        Ok(u64::try_from(size).ok())
    }

    unsafe fn map(
        &self,
        len: usize,
        offset: u64,
        protection: Protection,
        sharing: Sharing,
        descriptor: RawDescriptor,
    ) -> Result<(NonNull<u8>, Self::Backing)> {
        let (page_protection, access) =
            native_flags(protection, sharing).map_err(|source| MmapError::MapFailed {
                call: "CreateFileMappingW",
                source,
            })?;

        let backing = if protection.is_writable() && sharing.is_shared() {
            let duplicate = BorrowedHandle::borrow_raw(descriptor)
                .try_clone_to_owned()
                .map_err(|source| MmapError::MapFailed {
                    call: "DuplicateHandle",
                    source,
                })?;
            Some(duplicate)
        } else {
            None
        };

        let handle = descriptor as HANDLE;
        let mapping = CreateFileMappingW(handle, ptr::null(), page_protection, 0, 0, ptr::null());
        if mapping.is_null() {
            return Err(MmapError::MapFailed {
                call: "CreateFileMappingW",
                source: io::Error::last_os_error(),
            });
        }

        let view = MapViewOfFile(
            mapping,
            access,
            (offset >> 32) as u32,
            (offset & 0xFFFF_FFFF) as u32,
            len,
        );
        // Capture the error before CloseHandle can overwrite it.
        let view_err = view.Value.is_null().then(io::Error::last_os_error);
        // The view keeps the mapping object alive.
        CloseHandle(mapping);

        if let Some(source) = view_err {
            return Err(MmapError::MapFailed {
                call: "MapViewOfFile",
                source,
            });
        }

        log::debug!(
            "MapViewOfFile: {len} bytes at {:p} (offset {offset}, {protection:?}, {sharing:?})",
            view.Value
        );
        NonNull::new(view.Value.cast::<u8>())
            .map(|base| (base, backing))
            .ok_or_else(|| MmapError::MapFailed {
                call: "MapViewOfFile",
                source: io::Error::new(io::ErrorKind::Other, "view address is null"),
            })
    }

    unsafe fn unmap(&self, addr: NonNull<u8>, len: usize, backing: Self::Backing) -> Result<()> {
        let view = MEMORY_MAPPED_VIEW_ADDRESS {
            Value: addr.as_ptr().cast(),
        };
        let unmapped = check(UnmapViewOfFile(view));
        // The duplicate handle is closed whether or not the view went away.
        drop(backing);
        unmapped.map_err(|source| MmapError::UnmapFailed {
            call: "UnmapViewOfFile",
            source,
        })?;
        log::debug!("UnmapViewOfFile: {len} bytes at {:p}", addr.as_ptr());
        Ok(())
    }

    unsafe fn lock(&self, addr: NonNull<u8>, len: usize) -> Result<()> {
        check(VirtualLock(addr.as_ptr().cast_const().cast(), len)).map_err(|source| {
            MmapError::LockFailed {
                call: "VirtualLock",
                source,
            }
        })
    }

    unsafe fn unlock(&self, addr: NonNull<u8>, len: usize) -> Result<()> {
        match check(VirtualUnlock(addr.as_ptr().cast_const().cast(), len)) {
            // Unlocking pages that were never locked is not a failure.
            Err(err) if err.raw_os_error() == Some(ERROR_NOT_LOCKED as i32) => Ok(()),
            Err(source) => Err(MmapError::UnlockFailed {
                call: "VirtualUnlock",
                source,
            }),
            Ok(()) => Ok(()),
        }
    }

    unsafe fn flush(
        &self,
        addr: NonNull<u8>,
        len: usize,
        mode: SyncMode,
        backing: &Self::Backing,
    ) -> Result<()> {
        log::trace!("FlushViewOfFile: {len} bytes ({mode:?})");
        check(FlushViewOfFile(addr.as_ptr().cast_const().cast(), len)).map_err(|source| {
            MmapError::FlushFailed {
                call: "FlushViewOfFile",
                source,
            }
        })?;

        // FlushViewOfFile only starts the write-back of the view.
        if mode == SyncMode::Asynchronous {
            return Ok(());
        }
        if let Some(file) = backing {
            check(FlushFileBuffers(file.as_raw_handle() as HANDLE)).map_err(|source| {
                MmapError::FlushFailed {
                    call: "FlushFileBuffers",
                    source,
                }
            })?;
        }
        Ok(())
    }
}
