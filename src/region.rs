//! Mapped region with a permission-checked, cursor-tracked stream interface.

use std::fmt;
use std::io::{self, SeekFrom};
use std::ptr::NonNull;
use std::slice;

use parking_lot::Mutex;

use crate::errors::{MmapError, Result};
use crate::flush::{FlushPolicy, Pending, SyncMode};
use crate::os::{AsRawDescriptor, NativeMapper, Platform, RawDescriptor};
use crate::protection::{Protection, Sharing};
use crate::utils::{align_down, is_aligned, slice_range};

const ERR_ZERO_LENGTH: &str = "length must be greater than zero";
const ERR_LENGTH_TOO_LARGE: &str = "length does not fit in the address space";
const ERR_PAST_END_OF_FILE: &str = "offset + length extends past the end of the file";
const ERR_CLOSED: &str = "region is closed";

/// A live view and whatever the platform keeps beside it.
struct Mapping<B> {
    base: NonNull<u8>,
    backing: B,
}

/// Mutable state guarded by the region's mutex.
struct State<B> {
    /// `None` once the region is closed.
    mapping: Option<Mapping<B>>,
    cursor: usize,
    pending: Pending,
}

impl<B> State<B> {
    fn mapped(&self) -> Result<&Mapping<B>> {
        self.mapping.as_ref().ok_or(MmapError::InvalidState(ERR_CLOSED))
    }
}

/// A single contiguous mapping of a file, read and written like a stream.
///
/// The region owns the address range but not the descriptor it was mapped from;
/// the caller may close the descriptor once `create` returns. All cursor
/// movement and every native call happen under one mutex, so concurrent readers
/// never consume the same bytes and nothing touches the mapping after `close`.
///
/// # Examples
///
/// ```no_run
/// use std::io::SeekFrom;
/// use mmap_region::{MappedRegion, Protection, Sharing};
///
/// let file = std::fs::OpenOptions::new().read(true).write(true).open("data.bin")?;
/// let region = MappedRegion::create(4096, 0, Protection::ReadWrite, Sharing::Shared, &file)?;
///
/// region.write(b"hello")?;
/// region.seek(SeekFrom::Start(0))?;
/// let mut buf = [0u8; 5];
/// region.read(&mut buf)?;
/// assert_eq!(&buf, b"hello");
///
/// region.close()?;
/// # Ok::<(), mmap_region::MmapError>(())
/// ```
pub struct MappedRegion<P: Platform = NativeMapper> {
    platform: P,
    state: Mutex<State<P::Backing>>,
    size: usize,
    offset: u64,
    protection: Protection,
    sharing: Sharing,
    descriptor: RawDescriptor,
    flush_policy: FlushPolicy,
}

// SAFETY: the mapping is only reached through `state`, which is behind a mutex;
// the raw descriptor is an integer/handle value the region never dereferences.
unsafe impl<P: Platform + Send> Send for MappedRegion<P> {}
// SAFETY: see above; every access to the mapping takes the mutex.
unsafe impl<P: Platform + Sync> Sync for MappedRegion<P> {}

impl<P: Platform> fmt::Debug for MappedRegion<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MappedRegion")
            .field("base", &state.mapping.as_ref().map(|m| m.base))
            .field("cursor", &state.cursor)
            .field("size", &self.size)
            .field("offset", &self.offset)
            .field("protection", &self.protection)
            .field("sharing", &self.sharing)
            .finish()
    }
}

impl MappedRegion<NativeMapper> {
    /// Map `len` bytes of `descriptor`, starting at file offset `offset`, with the
    /// native mapper for this platform.
    ///
    /// # Errors
    ///
    /// See [`MappedRegion::create_with`].
    pub fn create<D: AsRawDescriptor + ?Sized>(
        len: u64,
        offset: u64,
        protection: Protection,
        sharing: Sharing,
        descriptor: &D,
    ) -> Result<Self> {
        Self::create_with(NativeMapper, len, offset, protection, sharing, descriptor)
    }

    /// Start building a region of `len` bytes. See [`RegionBuilder`](crate::RegionBuilder).
    #[must_use]
    pub fn builder(len: u64) -> crate::builder::RegionBuilder {
        crate::builder::RegionBuilder::new(len)
    }
}

impl<P: Platform> MappedRegion<P> {
    /// Map a region through `platform`.
    ///
    /// Validation happens before the mapping call: `offset` must not exceed `len`,
    /// `len` must be non-zero and addressable, `offset` must be a multiple of the
    /// platform granularity, and for regular files `offset + len` must lie within
    /// the file. Pages past the end of a file cannot be touched safely, so such
    /// mappings are refused rather than created.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::InvalidOffset` if `offset > len`.
    /// Returns `MmapError::InvalidLength` if `len` is zero, too large, or reaches past
    /// the end of the file.
    /// Returns `MmapError::MisalignedOffset` if `offset` is not granularity-aligned.
    /// Returns `MmapError::MapFailed` if the descriptor cannot be queried or the
    /// native call fails.
    pub fn create_with<D: AsRawDescriptor + ?Sized>(
        platform: P,
        len: u64,
        offset: u64,
        protection: Protection,
        sharing: Sharing,
        descriptor: &D,
    ) -> Result<Self> {
        Self::map_raw(
            platform,
            len,
            offset,
            protection,
            sharing,
            descriptor.as_raw_descriptor(),
            FlushPolicy::default(),
        )
    }

    pub(crate) fn map_raw(
        platform: P,
        len: u64,
        offset: u64,
        protection: Protection,
        sharing: Sharing,
        descriptor: RawDescriptor,
        flush_policy: FlushPolicy,
    ) -> Result<Self> {
        if offset > len {
            return Err(MmapError::InvalidOffset { offset, len });
        }
        if len == 0 {
            return Err(MmapError::InvalidLength(ERR_ZERO_LENGTH));
        }
        let size = usize::try_from(len).map_err(|_| MmapError::InvalidLength(ERR_LENGTH_TOO_LARGE))?;
        let granularity = platform.granularity() as u64;
        if !is_aligned(offset, granularity) {
            return Err(MmapError::MisalignedOffset {
                offset,
                granularity,
            });
        }

        if let Some(file_len) = platform.file_len(descriptor)? {
            if offset.checked_add(len).map_or(true, |end| end > file_len) {
                return Err(MmapError::InvalidLength(ERR_PAST_END_OF_FILE));
            }
        }

        // SAFETY: the caller handed us an open descriptor; a failed map leaves
        // nothing behind and no region is constructed.
        let (base, backing) =
            unsafe { platform.map(size, offset, protection, sharing, descriptor)? };

        Ok(Self {
            platform,
            state: Mutex::new(State {
                mapping: Some(Mapping { base, backing }),
                cursor: 0,
                pending: Pending::default(),
            }),
            size,
            offset,
            protection,
            sharing,
            descriptor,
            flush_policy,
        })
    }

    /// Read from the cursor into `buf`, returning the number of bytes copied.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::InvalidState` if the region is closed.
    /// Returns `MmapError::PermissionDenied` if the region is not readable.
    /// Returns `MmapError::EndOfRegion` if the cursor is already at the end.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        let base = state.mapped()?.base;
        if !self.protection.is_readable() {
            return Err(MmapError::PermissionDenied {
                op: "read",
                protection: self.protection,
            });
        }

        let available = self.size - state.cursor;
        if available == 0 {
            return Err(MmapError::EndOfRegion);
        }
        let n = buf.len().min(available);
        let (start, end) = slice_range(state.cursor as u64, n as u64, self.size as u64)?;

        // SAFETY: `base` is live while the mutex is held and spans `size` bytes.
        let mapped = unsafe { slice::from_raw_parts(base.as_ptr(), self.size) };
        buf[..n].copy_from_slice(&mapped[start..end]);
        state.cursor = end;
        Ok(n)
    }

    /// Write `buf` at the cursor, returning the number of bytes copied.
    ///
    /// The mapping never grows. If `buf` does not fit, the bytes that do are
    /// written, the cursor moves to the end and `PartialWrite` reports the count.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::InvalidState` if the region is closed.
    /// Returns `MmapError::PermissionDenied` if the region is not writable.
    /// Returns `MmapError::EndOfRegion` if there is no room left and `buf` is not empty.
    /// Returns `MmapError::PartialWrite` if only part of `buf` fit.
    /// Returns `MmapError::PolicyFlushFailed` if the bytes were copied but the flush
    /// due under the region's [`FlushPolicy`] failed; it is retried on the next write.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut state = self.state.lock();
        let base = state.mapped()?.base;
        if !self.protection.is_writable() {
            return Err(MmapError::PermissionDenied {
                op: "write",
                protection: self.protection,
            });
        }

        let room = self.size - state.cursor;
        let requested = buf.len();
        if requested > room && room == 0 {
            return Err(MmapError::EndOfRegion);
        }
        let n = requested.min(room);
        let (start, end) = slice_range(state.cursor as u64, n as u64, self.size as u64)?;

        // SAFETY: `base` is live while the mutex is held and spans `size` bytes;
        // the region is writable so the pages accept stores.
        let mapped = unsafe { slice::from_raw_parts_mut(base.as_ptr(), self.size) };
        mapped[start..end].copy_from_slice(&buf[..n]);
        state.cursor = end;

        if n > 0 {
            state.pending.record(n);
            if let Err(err) = self.apply_flush_policy(&mut state) {
                return Err(MmapError::PolicyFlushFailed {
                    written: n,
                    requested,
                    source: Box::new(err),
                });
            }
        }

        if n < requested {
            Err(MmapError::PartialWrite {
                written: n,
                requested,
            })
        } else {
            Ok(n)
        }
    }

    /// Move the cursor and return its new position. `SeekFrom::End(0)` is the
    /// position one past the last byte.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::InvalidState` if the region is closed.
    /// Returns `MmapError::InvalidSeek` if the target is negative or past the end;
    /// the cursor is left unchanged.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn seek(&self, pos: SeekFrom) -> Result<u64> {
        let mut state = self.state.lock();
        state.mapped()?;

        let target = match pos {
            SeekFrom::Start(n) => i128::from(n),
            SeekFrom::Current(delta) => state.cursor as i128 + i128::from(delta),
            SeekFrom::End(delta) => self.size as i128 + i128::from(delta),
        };
        if target < 0 || target > self.size as i128 {
            return Err(MmapError::InvalidSeek {
                pos,
                size: self.size as u64,
            });
        }

        // In range [0, size], so it fits in usize.
        state.cursor = target as usize;
        log::trace!("seek {pos:?} -> {target}");
        Ok(target as u64)
    }

    /// Pin the whole region in physical memory.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::InvalidState` if the region is closed.
    /// Returns `MmapError::LockFailed` if the native call fails (often due to privileges or limits).
    pub fn lock(&self) -> Result<()> {
        let state = self.state.lock();
        let base = state.mapped()?.base;
        // SAFETY: `base`/`size` describe the live mapping while the mutex is held.
        unsafe { self.platform.lock(base, self.size) }
    }

    /// Allow the pages of the region to be swapped out again.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::InvalidState` if the region is closed.
    /// Returns `MmapError::UnlockFailed` if the native call fails.
    pub fn unlock(&self) -> Result<()> {
        let state = self.state.lock();
        let base = state.mapped()?.base;
        // SAFETY: `base`/`size` describe the live mapping while the mutex is held.
        unsafe { self.platform.unlock(base, self.size) }
    }

    /// Synchronously write modified pages of the whole region back to the file.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::InvalidState` if the region is closed.
    /// Returns `MmapError::FlushFailed` if the native call fails.
    pub fn flush(&self) -> Result<()> {
        self.flush_with(SyncMode::Synchronous)
    }

    /// Write modified pages of the whole region back to the file using `mode`.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::InvalidState` if the region is closed.
    /// Returns `MmapError::FlushFailed` if the native call fails.
    pub fn flush_with(&self, mode: SyncMode) -> Result<()> {
        let mut state = self.state.lock();
        let mapping = state.mapped()?;
        // SAFETY: `base`/`size` describe the live mapping while the mutex is held.
        unsafe {
            self.platform
                .flush(mapping.base, self.size, mode, &mapping.backing)?;
        }
        state.pending.reset();
        Ok(())
    }

    /// Synchronously flush `[offset, offset+len)` of the region.
    ///
    /// The start is aligned down to the platform granularity before the native call.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::InvalidState` if the region is closed.
    /// Returns `MmapError::OutOfBounds` if the range exceeds the region.
    /// Returns `MmapError::FlushFailed` if the native call fails.
    pub fn flush_range(&self, offset: u64, len: u64) -> Result<()> {
        let state = self.state.lock();
        let mapping = state.mapped()?;
        let (start, end) = slice_range(offset, len, self.size as u64)?;
        if start == end {
            return Ok(());
        }
        // Within the mapping, so the aligned start fits in usize.
        #[allow(clippy::cast_possible_truncation)]
        let aligned = align_down(start as u64, self.platform.granularity() as u64) as usize;
        // SAFETY: `aligned < end <= size`, so the pointer stays inside the live mapping.
        unsafe {
            let addr = NonNull::new_unchecked(mapping.base.as_ptr().add(aligned));
            self.platform
                .flush(addr, end - aligned, SyncMode::Synchronous, &mapping.backing)
        }
    }

    /// Flush, unmap and invalidate the region.
    ///
    /// The flush is best-effort: its failure is reported but the range is unmapped
    /// anyway. The region is closed when this returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns `MmapError::AlreadyClosed` if the region was closed before.
    /// Returns `MmapError::FlushFailed` or `MmapError::UnmapFailed` if one step failed,
    /// and `MmapError::CloseFailed` if both did.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        let Mapping { base, backing } = state.mapping.take().ok_or(MmapError::AlreadyClosed)?;

        // SAFETY: `base`/`size` are the live mapping; it was taken out of the state
        // above, so nothing can reach it after the unmap below.
        let flushed =
            unsafe { self.platform.flush(base, self.size, SyncMode::Synchronous, &backing) };
        // SAFETY: as above; this is the only unmap this mapping will ever see.
        let unmapped = unsafe { self.platform.unmap(base, self.size, backing) };
        state.pending.reset();
        log::debug!("closed region of {} bytes at {:p}", self.size, base.as_ptr());

        match (flushed, unmapped) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
            (Err(flush), Err(unmap)) => Err(MmapError::CloseFailed {
                flush: Box::new(flush),
                unmap: Box::new(unmap),
            }),
        }
    }

    /// Counters are kept when the flush fails, so the next write retries it.
    fn apply_flush_policy(&self, state: &mut State<P::Backing>) -> Result<()> {
        if !self.flush_policy.is_due(&state.pending) {
            return Ok(());
        }
        log::trace!(
            "flush policy {:?} due after {} bytes / {} writes",
            self.flush_policy,
            state.pending.bytes,
            state.pending.writes
        );
        let mapping = state.mapped()?;
        // SAFETY: called with the mutex held and the mapping live.
        unsafe {
            self.platform
                .flush(mapping.base, self.size, SyncMode::Synchronous, &mapping.backing)?;
        }
        state.pending.reset();
        Ok(())
    }

    /// Whether `close` has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().mapping.is_none()
    }

    /// Current cursor position.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.state.lock().cursor as u64
    }

    /// Bytes between the cursor and the end of the region.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        (self.size - self.state.lock().cursor) as u64
    }

    /// Logical length of the region in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.size as u64
    }

    /// Whether the region has zero length. Never true for a region built by `create`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// File offset of the first byte of the region.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Protection the region was mapped with.
    #[must_use]
    pub fn protection(&self) -> Protection {
        self.protection
    }

    /// Sharing mode the region was mapped with.
    #[must_use]
    pub fn sharing(&self) -> Sharing {
        self.sharing
    }

    /// Flush policy applied after writes.
    #[must_use]
    pub fn flush_policy(&self) -> FlushPolicy {
        self.flush_policy
    }

    /// Whether `read` is permitted.
    #[must_use]
    pub fn is_readable(&self) -> bool {
        self.protection.is_readable()
    }

    /// Whether `write` is permitted.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.protection.is_writable()
    }

    /// The raw descriptor the region was mapped from. It may have been closed by its owner.
    #[must_use]
    pub fn descriptor(&self) -> RawDescriptor {
        self.descriptor
    }
}

impl<P: Platform> Drop for MappedRegion<P> {
    fn drop(&mut self) {
        match self.close() {
            Ok(()) | Err(MmapError::AlreadyClosed) => {}
            Err(err) => log::warn!("closing region on drop failed: {err}"),
        }
    }
}

impl<P: Platform> io::Read for &MappedRegion<P> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match MappedRegion::read(self, buf) {
            Err(MmapError::EndOfRegion) => Ok(0),
            other => other.map_err(io::Error::from),
        }
    }
}

/// `write` reports copied bytes as `Ok` even when a policy flush failed, since
/// `io::Write` forbids returning an error after consuming input. The failed flush
/// stays pending: the next write retries it and `flush` reports it.
impl<P: Platform> io::Write for &MappedRegion<P> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match MappedRegion::write(self, buf) {
            Err(MmapError::EndOfRegion) => Ok(0),
            Err(MmapError::PartialWrite { written, .. }) => Ok(written),
            Err(MmapError::PolicyFlushFailed {
                written, source, ..
            }) => {
                log::warn!("policy flush failed after writing {written} bytes: {source}");
                Ok(written)
            }
            other => other.map_err(io::Error::from),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        MappedRegion::flush(self).map_err(io::Error::from)
    }
}

impl<P: Platform> io::Seek for &MappedRegion<P> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        MappedRegion::seek(self, pos).map_err(io::Error::from)
    }
}

impl<P: Platform> io::Read for MappedRegion<P> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut &*self, buf)
    }
}

impl<P: Platform> io::Write for MappedRegion<P> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut &*self)
    }
}

impl<P: Platform> io::Seek for MappedRegion<P> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        io::Seek::seek(&mut &*self, pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const GRANULARITY: usize = 4096;

    #[derive(Default)]
    struct Calls {
        map: AtomicUsize,
        unmap: AtomicUsize,
        lock: AtomicUsize,
        unlock: AtomicUsize,
        flush: AtomicUsize,
        last_flush_len: AtomicUsize,
    }

    /// Backs each mapping with a heap allocation and counts native calls.
    #[derive(Clone, Default)]
    struct HeapPlatform {
        calls: Arc<Calls>,
        fail_flush: bool,
        fail_unmap: bool,
        /// Reported file length; `None` skips the end-of-file check.
        file_len: Option<u64>,
    }

    fn native_err() -> io::Error {
        io::Error::new(io::ErrorKind::Other, "injected")
    }

    impl Platform for HeapPlatform {
        type Backing = ();

        fn granularity(&self) -> usize {
            GRANULARITY
        }

        fn file_len(&self, _descriptor: RawDescriptor) -> Result<Option<u64>> {
            Ok(self.file_len)
        }

        unsafe fn map(
            &self,
            len: usize,
            _offset: u64,
            _protection: Protection,
            _sharing: Sharing,
            _descriptor: RawDescriptor,
        ) -> Result<(NonNull<u8>, ())> {
            self.calls.map.fetch_add(1, Ordering::SeqCst);
            let buf = vec![0u8; len].into_boxed_slice();
            let base = NonNull::new(Box::into_raw(buf).cast::<u8>()).expect("box is non-null");
            Ok((base, ()))
        }

        unsafe fn unmap(&self, addr: NonNull<u8>, len: usize, _backing: ()) -> Result<()> {
            self.calls.unmap.fetch_add(1, Ordering::SeqCst);
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(addr.as_ptr(), len)));
            if self.fail_unmap {
                return Err(MmapError::UnmapFailed {
                    call: "heap",
                    source: native_err(),
                });
            }
            Ok(())
        }

        unsafe fn lock(&self, _addr: NonNull<u8>, _len: usize) -> Result<()> {
            self.calls.lock.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        unsafe fn unlock(&self, _addr: NonNull<u8>, _len: usize) -> Result<()> {
            self.calls.unlock.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        unsafe fn flush(
            &self,
            _addr: NonNull<u8>,
            len: usize,
            _mode: SyncMode,
            _backing: &(),
        ) -> Result<()> {
            self.calls.flush.fetch_add(1, Ordering::SeqCst);
            self.calls.last_flush_len.store(len, Ordering::SeqCst);
            if self.fail_flush {
                return Err(MmapError::FlushFailed {
                    call: "heap",
                    source: native_err(),
                });
            }
            Ok(())
        }
    }

    fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn region(platform: &HeapPlatform, len: u64, protection: Protection) -> MappedRegion<HeapPlatform> {
        let file = tempfile::tempfile().expect("tempfile");
        MappedRegion::create_with(platform.clone(), len, 0, protection, Sharing::Shared, &file)
            .expect("create")
    }

    #[test]
    fn invalid_offset_never_reaches_the_platform() {
        let platform = HeapPlatform::default();
        let file = tempfile::tempfile().expect("tempfile");
        let res = MappedRegion::create_with(
            platform.clone(),
            10,
            11,
            Protection::ReadWrite,
            Sharing::Shared,
            &file,
        );
        assert!(matches!(res, Err(MmapError::InvalidOffset { offset: 11, len: 10 })));
        assert_eq!(count(&platform.calls.map), 0);
    }

    #[test]
    fn zero_length_and_misaligned_offsets_are_rejected() {
        let platform = HeapPlatform::default();
        let file = tempfile::tempfile().expect("tempfile");

        let zero =
            MappedRegion::create_with(platform.clone(), 0, 0, Protection::ReadOnly, Sharing::Shared, &file);
        assert!(matches!(zero, Err(MmapError::InvalidLength(_))));

        let misaligned = MappedRegion::create_with(
            platform.clone(),
            8192,
            100,
            Protection::ReadOnly,
            Sharing::Shared,
            &file,
        );
        assert!(matches!(
            misaligned,
            Err(MmapError::MisalignedOffset { offset: 100, granularity: 4096 })
        ));
        assert_eq!(count(&platform.calls.map), 0);

        let aligned = MappedRegion::create_with(
            platform.clone(),
            8192,
            4096,
            Protection::ReadOnly,
            Sharing::Shared,
            &file,
        )
        .expect("aligned offset maps");
        assert_eq!(aligned.offset(), 4096);
        assert_eq!(aligned.position(), 0);
        assert_eq!(count(&platform.calls.map), 1);
    }

    #[test]
    fn mapping_past_end_of_file_is_rejected() {
        let file = tempfile::tempfile().expect("tempfile");
        let short = HeapPlatform {
            file_len: Some(16),
            ..HeapPlatform::default()
        };
        let res =
            MappedRegion::create_with(short.clone(), 8192, 0, Protection::ReadOnly, Sharing::Shared, &file);
        assert!(matches!(res, Err(MmapError::InvalidLength(_))));
        assert_eq!(count(&short.calls.map), 0);

        let exact = MappedRegion::create_with(short.clone(), 16, 0, Protection::ReadOnly, Sharing::Private, &file)
            .expect("whole file");
        assert_eq!(exact.len(), 16);

        let two_pages = HeapPlatform {
            file_len: Some(2 * GRANULARITY as u64 - 1),
            ..HeapPlatform::default()
        };
        let tail = MappedRegion::create_with(
            two_pages.clone(),
            GRANULARITY as u64,
            GRANULARITY as u64,
            Protection::ReadOnly,
            Sharing::Shared,
            &file,
        );
        assert!(matches!(tail, Err(MmapError::InvalidLength(_))));
        assert_eq!(count(&two_pages.calls.map), 0);
    }

    #[test]
    fn write_seek_read_round_trip() {
        let platform = HeapPlatform::default();
        let r = region(&platform, 32, Protection::ReadWrite);

        assert_eq!(r.write(b"round trip").expect("write"), 10);
        assert_eq!(r.position(), 10);
        assert_eq!(r.seek(SeekFrom::Start(0)).expect("seek"), 0);

        let mut buf = [0u8; 10];
        assert_eq!(r.read(&mut buf).expect("read"), 10);
        assert_eq!(&buf, b"round trip");
        assert_eq!(r.remaining(), 22);
    }

    #[test]
    fn read_is_clamped_and_stops_at_end() {
        let platform = HeapPlatform::default();
        let r = region(&platform, 8, Protection::ReadWrite);
        r.write(b"abcdefgh").expect("fill");
        r.seek(SeekFrom::Start(5)).expect("seek");

        let mut buf = [0u8; 16];
        assert_eq!(r.read(&mut buf).expect("tail"), 3);
        assert_eq!(&buf[..3], b"fgh");

        assert!(matches!(r.read(&mut buf), Err(MmapError::EndOfRegion)));
        assert_eq!(r.position(), 8);
    }

    #[test]
    fn partial_write_then_end_of_region() {
        let platform = HeapPlatform::default();
        let r = region(&platform, 8, Protection::ReadWrite);
        r.seek(SeekFrom::Start(5)).expect("seek");

        match r.write(b"overflow") {
            Err(MmapError::PartialWrite { written, requested }) => {
                assert_eq!((written, requested), (3, 8));
            }
            other => panic!("expected partial write, got {other:?}"),
        }
        assert_eq!(r.position(), 8);

        assert!(matches!(r.write(b"x"), Err(MmapError::EndOfRegion)));
        assert_eq!(r.position(), 8);
        // Nothing to write fits trivially, even at the end.
        assert_eq!(r.write(b"").expect("empty"), 0);

        r.seek(SeekFrom::Start(0)).expect("rewind");
        let mut buf = [0u8; 8];
        r.read(&mut buf).expect("read");
        assert_eq!(&buf, b"\0\0\0\0\0ove");
    }

    #[test]
    fn seek_bounds() {
        let platform = HeapPlatform::default();
        let r = region(&platform, 16, Protection::ReadOnly);

        assert_eq!(r.seek(SeekFrom::Start(16)).expect("end"), 16);
        assert_eq!(r.seek(SeekFrom::End(0)).expect("end"), 16);
        assert_eq!(r.seek(SeekFrom::End(-1)).expect("last byte"), 15);
        assert_eq!(r.seek(SeekFrom::Current(-5)).expect("back"), 10);

        for pos in [
            SeekFrom::Start(17),
            SeekFrom::End(1),
            SeekFrom::Current(-11),
            SeekFrom::Current(i64::MAX),
            SeekFrom::Start(u64::MAX),
        ] {
            assert!(matches!(r.seek(pos), Err(MmapError::InvalidSeek { size: 16, .. })));
            assert_eq!(r.position(), 10);
        }
        assert_eq!(r.seek(SeekFrom::Start(0)).expect("start"), 0);
    }

    #[test]
    fn permissions_follow_protection() {
        let platform = HeapPlatform::default();
        let mut buf = [0u8; 4];

        for protection in [Protection::ReadOnly, Protection::ExecReadOnly] {
            let r = region(&platform, 4, protection);
            assert!(matches!(r.write(b"nope"), Err(MmapError::PermissionDenied { op: "write", .. })));
            assert_eq!(r.position(), 0);
            assert_eq!(r.read(&mut buf).expect("read"), 4);
            assert_eq!(buf, [0; 4]);
        }

        for protection in [Protection::WriteOnly, Protection::ExecWriteOnly] {
            let r = region(&platform, 4, protection);
            assert!(matches!(r.read(&mut buf), Err(MmapError::PermissionDenied { op: "read", .. })));
            assert_eq!(r.write(b"yes!").expect("write"), 4);
        }

        for protection in [Protection::ReadWrite, Protection::ExecReadWrite] {
            let r = region(&platform, 4, protection);
            assert!(r.is_readable() && r.is_writable());
            r.write(b"both").expect("write");
            r.seek(SeekFrom::Start(0)).expect("seek");
            r.read(&mut buf).expect("read");
            assert_eq!(&buf, b"both");
        }
    }

    #[test]
    fn closed_region_rejects_everything() {
        let platform = HeapPlatform::default();
        let r = region(&platform, 16, Protection::ReadWrite);
        r.close().expect("close");
        assert!(r.is_closed());
        assert_eq!(count(&platform.calls.flush), 1);
        assert_eq!(count(&platform.calls.unmap), 1);

        let mut buf = [0u8; 4];
        assert!(matches!(r.read(&mut buf), Err(MmapError::InvalidState(_))));
        assert!(matches!(r.write(b"x"), Err(MmapError::InvalidState(_))));
        assert!(matches!(r.seek(SeekFrom::Start(0)), Err(MmapError::InvalidState(_))));
        assert!(matches!(r.lock(), Err(MmapError::InvalidState(_))));
        assert!(matches!(r.unlock(), Err(MmapError::InvalidState(_))));
        assert!(matches!(r.flush(), Err(MmapError::InvalidState(_))));
        assert!(matches!(r.flush_range(0, 1), Err(MmapError::InvalidState(_))));

        assert!(matches!(r.close(), Err(MmapError::AlreadyClosed)));
        drop(r);
        assert_eq!(count(&platform.calls.unmap), 1);
        assert_eq!(count(&platform.calls.lock), 0);
    }

    #[test]
    fn close_unmaps_even_when_flush_fails() {
        let platform = HeapPlatform {
            fail_flush: true,
            ..HeapPlatform::default()
        };
        let r = region(&platform, 16, Protection::ReadWrite);
        assert!(matches!(r.close(), Err(MmapError::FlushFailed { .. })));
        assert!(r.is_closed());
        assert_eq!(count(&platform.calls.unmap), 1);
    }

    #[test]
    fn close_reports_both_failures() {
        let platform = HeapPlatform {
            fail_flush: true,
            fail_unmap: true,
            ..HeapPlatform::default()
        };
        let r = region(&platform, 16, Protection::ReadWrite);
        match r.close() {
            Err(MmapError::CloseFailed { flush, unmap }) => {
                assert!(matches!(*flush, MmapError::FlushFailed { .. }));
                assert!(matches!(*unmap, MmapError::UnmapFailed { .. }));
            }
            other => panic!("expected composite error, got {other:?}"),
        }
        assert!(matches!(r.close(), Err(MmapError::AlreadyClosed)));
        assert_eq!(count(&platform.calls.unmap), 1);
    }

    #[test]
    fn drop_closes_an_open_region() {
        let platform = HeapPlatform::default();
        let r = region(&platform, 16, Protection::ReadOnly);
        drop(r);
        assert_eq!(count(&platform.calls.flush), 1);
        assert_eq!(count(&platform.calls.unmap), 1);
    }

    #[test]
    fn lock_and_unlock_delegate() {
        let platform = HeapPlatform::default();
        let r = region(&platform, 16, Protection::ReadOnly);
        r.lock().expect("lock");
        r.unlock().expect("unlock");
        assert_eq!(count(&platform.calls.lock), 1);
        assert_eq!(count(&platform.calls.unlock), 1);
    }

    #[test]
    fn flush_policy_every_writes() {
        let platform = HeapPlatform::default();
        let file = tempfile::tempfile().expect("tempfile");
        let r = MappedRegion::builder(64)
            .flush_policy(FlushPolicy::EveryWrites(2))
            .map_with(platform.clone(), &file)
            .expect("map");
        assert_eq!(r.flush_policy(), FlushPolicy::EveryWrites(2));

        r.write(b"a").expect("1");
        assert_eq!(count(&platform.calls.flush), 0);
        r.write(b"b").expect("2");
        assert_eq!(count(&platform.calls.flush), 1);
        r.write(b"c").expect("3");
        assert_eq!(count(&platform.calls.flush), 1);
        // An explicit flush resets the counters.
        r.flush().expect("flush");
        r.write(b"d").expect("4");
        assert_eq!(count(&platform.calls.flush), 2);
        // Empty writes do not count.
        r.write(b"").expect("empty");
        assert_eq!(count(&platform.calls.flush), 2);
    }

    #[test]
    fn failed_policy_flush_is_reported_and_retried() {
        let platform = HeapPlatform {
            fail_flush: true,
            ..HeapPlatform::default()
        };
        let file = tempfile::tempfile().expect("tempfile");
        let r = MappedRegion::builder(16)
            .flush_policy(FlushPolicy::Always)
            .map_with(platform.clone(), &file)
            .expect("map");

        match r.write(b"kept") {
            Err(MmapError::PolicyFlushFailed {
                written,
                requested,
                source,
            }) => {
                assert_eq!((written, requested), (4, 4));
                assert!(matches!(*source, MmapError::FlushFailed { .. }));
            }
            other => panic!("expected policy flush failure, got {other:?}"),
        }
        assert_eq!(r.position(), 4);
        assert_eq!(count(&platform.calls.flush), 1);

        // std::io::Write counts the copied bytes; an explicit flush reports the failure.
        assert_eq!(io::Write::write(&mut &r, b"more").expect("bytes copied"), 4);
        assert_eq!(count(&platform.calls.flush), 2);
        assert!(io::Write::flush(&mut &r).is_err());

        r.seek(SeekFrom::Start(0)).expect("rewind");
        let mut buf = [0u8; 8];
        r.read(&mut buf).expect("read");
        assert_eq!(&buf, b"keptmore");
    }

    #[test]
    fn flush_range_aligns_start_down() {
        let platform = HeapPlatform::default();
        let r = region(&platform, 3 * GRANULARITY as u64, Protection::ReadWrite);

        r.flush_range(5000, 10).expect("flush range");
        assert_eq!(count(&platform.calls.last_flush_len), 5010 - GRANULARITY);

        r.flush_range(0, 0).expect("empty range");
        assert_eq!(count(&platform.calls.flush), 1);

        assert!(matches!(
            r.flush_range(3 * GRANULARITY as u64 - 1, 2),
            Err(MmapError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn concurrent_reads_never_share_bytes() {
        let platform = HeapPlatform::default();
        let r = region(&platform, 1024, Protection::ReadWrite);
        let pattern: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
        r.write(&pattern).expect("fill");
        r.seek(SeekFrom::Start(0)).expect("rewind");

        let mut seen: Vec<u8> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        let mut mine = Vec::new();
                        let mut byte = [0u8; 1];
                        while let Ok(n) = r.read(&mut byte) {
                            mine.extend_from_slice(&byte[..n]);
                        }
                        mine
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().expect("reader thread"))
                .collect()
        });

        let mut expected = pattern;
        expected.sort_unstable();
        seen.sort_unstable();
        assert_eq!(seen, expected);
    }

    #[test]
    fn std_io_traits() {
        let platform = HeapPlatform::default();
        let mut r = region(&platform, 8, Protection::ReadWrite);

        let err = (&r).write_all(b"too long!").expect_err("does not fit");
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);

        io::Seek::seek(&mut r, SeekFrom::Start(0)).expect("seek");
        let mut out = Vec::new();
        r.read_to_end(&mut out).expect("read_to_end");
        assert_eq!(out, b"too long");

        let denied = region(&platform, 8, Protection::ReadOnly);
        let err = io::Write::write(&mut &denied, b"x").expect_err("read-only");
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }
}
