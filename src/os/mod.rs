//! Platform mapping layer.
//!
//! Every supported OS family provides the same primitives (file length, map, unmap,
//! lock, unlock, flush) behind the [`Platform`] trait. The implementation for the
//! build target is selected at compile time and exported as [`NativeMapper`].
//!
//! # Safety
//! These primitives operate directly on the process address space. The
//! [`MappedRegion`](crate::MappedRegion) upholds the invariants they rely on:
//! every address handed back to `unmap`, `lock`, `unlock` or `flush` came from a
//! successful `map` of the same length and has not been unmapped yet.

use std::io;
use std::ptr::NonNull;

use crate::errors::Result;
use crate::flush::SyncMode;
use crate::protection::{Protection, Sharing};

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        pub(crate) mod windows;
        pub use windows::WindowsMapper as NativeMapper;

        /// Native handle a mapping is created from.
        pub type RawDescriptor = std::os::windows::io::RawHandle;
    } else if #[cfg(unix)] {
        pub(crate) mod unix;
        pub use unix::UnixMapper as NativeMapper;

        /// Native file descriptor a mapping is created from.
        pub type RawDescriptor = std::os::unix::io::RawFd;
    } else {
        compile_error!("mmap-region supports unix and windows targets only");
    }
}

/// Types that can hand out the raw descriptor a mapping is created from.
///
/// Implemented for everything that implements `AsRawFd` (Unix) or `AsRawHandle`
/// (Windows), such as [`std::fs::File`].
pub trait AsRawDescriptor {
    /// Borrow the raw descriptor. Ownership stays with `self`.
    fn as_raw_descriptor(&self) -> RawDescriptor;
}

#[cfg(unix)]
impl<T: std::os::unix::io::AsRawFd + ?Sized> AsRawDescriptor for T {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.as_raw_fd()
    }
}

#[cfg(windows)]
impl<T: std::os::windows::io::AsRawHandle + ?Sized> AsRawDescriptor for T {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.as_raw_handle()
    }
}

/// The native virtual-memory primitives a region is built on.
///
/// Implementations translate the portable [`Protection`], [`Sharing`] and
/// [`SyncMode`] values into native flags and turn native failures into the
/// matching [`MmapError`](crate::MmapError) variant, carrying the name of the
/// call and the OS diagnostic.
pub trait Platform {
    /// Per-mapping resources returned by [`Platform::map`] and kept beside the view
    /// until [`Platform::unmap`], e.g. a file handle needed for durable flushes.
    type Backing: Send + Sync;

    /// Alignment required of the file offset passed to [`Platform::map`].
    fn granularity(&self) -> usize;

    /// Current length of the file behind `descriptor`, or `None` when the object
    /// has no meaningful length (devices, pipes).
    ///
    /// # Errors
    ///
    /// Returns `MmapError::MapFailed` if the descriptor cannot be queried.
    fn file_len(&self, descriptor: RawDescriptor) -> Result<Option<u64>>;

    /// Map `len` bytes of `descriptor` starting at file offset `offset`.
    ///
    /// `offset` must be a multiple of [`Platform::granularity`]; implementations do
    /// not round it.
    ///
    /// # Safety
    /// `descriptor` must be an open descriptor whose access mode is compatible with
    /// `protection` and `sharing`.
    unsafe fn map(
        &self,
        len: usize,
        offset: u64,
        protection: Protection,
        sharing: Sharing,
        descriptor: RawDescriptor,
    ) -> Result<(NonNull<u8>, Self::Backing)>;

    /// Release a mapping and its backing. The descriptor it was created from is
    /// left open.
    ///
    /// # Safety
    /// `addr`/`len` must describe a live mapping returned by `map`; it must not be
    /// used afterwards.
    unsafe fn unmap(&self, addr: NonNull<u8>, len: usize, backing: Self::Backing) -> Result<()>;

    /// Pin the pages of `[addr, addr+len)` in physical memory.
    ///
    /// # Safety
    /// `addr`/`len` must lie within a live mapping.
    unsafe fn lock(&self, addr: NonNull<u8>, len: usize) -> Result<()>;

    /// Allow the pages of `[addr, addr+len)` to be paged out again.
    ///
    /// # Safety
    /// `addr`/`len` must lie within a live mapping.
    unsafe fn unlock(&self, addr: NonNull<u8>, len: usize) -> Result<()>;

    /// Write modified pages of `[addr, addr+len)` back to the backing file.
    ///
    /// `Synchronous` and `InvalidateOtherMappings` return once the data is on
    /// stable storage; `Asynchronous` only schedules the write-back.
    ///
    /// # Safety
    /// `addr`/`len` must lie within a live mapping and `addr` must be aligned to the
    /// platform page size. `backing` must be the one returned by `map` for it.
    unsafe fn flush(
        &self,
        addr: NonNull<u8>,
        len: usize,
        mode: SyncMode,
        backing: &Self::Backing,
    ) -> Result<()>;
}

/// Run a native call, retrying it once if it was interrupted by a signal.
pub(crate) fn retry_interrupted<T>(mut call: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    match call() {
        Err(err) if err.kind() == io::ErrorKind::Interrupted => {
            log::trace!("native call interrupted, retrying once");
            call()
        }
        other => other,
    }
}
