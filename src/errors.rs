//! Crate-specific error types for mmap-region.

use std::io::{self, SeekFrom};
use thiserror::Error;

use crate::protection::Protection;

/// Result alias for mmap-region operations.
pub type Result<T> = std::result::Result<T, MmapError>;

/// Error type covering validation, lifecycle, permission, cursor and native-call failures.
#[derive(Debug, Error)]
pub enum MmapError {
    /// Wrapper for `std::io::Error` raised outside the native mapping calls (opening files, metadata).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The requested file offset lies past the requested length.
    #[error("invalid offset: offset={offset} exceeds length={len}")]
    InvalidOffset {
        /// Requested file offset.
        offset: u64,
        /// Requested mapping length.
        len: u64,
    },

    /// A requested offset/length pair falls outside the region.
    #[error("range out of bounds: offset={offset}, len={len}, total={total}")]
    OutOfBounds {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        len: u64,
        /// Size of the region.
        total: u64,
    },

    /// The requested length cannot be mapped.
    #[error("invalid length: {0}")]
    InvalidLength(&'static str),

    /// The requested file offset is not a multiple of the platform mapping granularity.
    #[error("misaligned offset: offset={offset} is not a multiple of {granularity}")]
    MisalignedOffset {
        /// Requested file offset.
        offset: u64,
        /// Page size or allocation granularity the offset must be aligned to.
        granularity: u64,
    },

    /// A seek target fell outside `[0, size]`.
    #[error("invalid seek: {pos:?} is outside a region of {size} bytes")]
    InvalidSeek {
        /// Requested seek position.
        pos: SeekFrom,
        /// Size of the region.
        size: u64,
    },

    /// The operation requires a mapped region but the region has been closed.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// `close` was called on a region that is already closed.
    #[error("region already closed")]
    AlreadyClosed,

    /// The region's protection does not allow the attempted access.
    #[error("permission denied: cannot {op} a {protection:?} region")]
    PermissionDenied {
        /// Attempted access, `"read"` or `"write"`.
        op: &'static str,
        /// Protection the region was mapped with.
        protection: Protection,
    },

    /// The cursor sits at the end of the region; nothing can be read or written.
    #[error("end of region")]
    EndOfRegion,

    /// A write was truncated to the room left in the region. The bytes counted in
    /// `written` were copied and the cursor advanced past them.
    #[error("partial write: wrote {written} of {requested} bytes")]
    PartialWrite {
        /// Bytes actually written.
        written: usize,
        /// Bytes the caller asked to write.
        requested: usize,
    },

    /// A write copied `written` bytes and advanced the cursor, but the flush its
    /// flush policy called for failed. The flush is retried on the next write.
    #[error("wrote {written} of {requested} bytes but the policy flush failed: {source}")]
    PolicyFlushFailed {
        /// Bytes actually written.
        written: usize,
        /// Bytes the caller asked to write.
        requested: usize,
        /// Error from the flush.
        #[source]
        source: Box<MmapError>,
    },

    /// The native mapping call failed.
    #[error("map failed: {call}: {source}")]
    MapFailed {
        /// Native call that failed.
        call: &'static str,
        /// OS diagnostic.
        #[source]
        source: io::Error,
    },

    /// The native unmapping call failed.
    #[error("unmap failed: {call}: {source}")]
    UnmapFailed {
        /// Native call that failed.
        call: &'static str,
        /// OS diagnostic.
        #[source]
        source: io::Error,
    },

    /// Pinning pages in memory failed (often a privilege or rlimit issue).
    #[error("lock failed: {call}: {source}")]
    LockFailed {
        /// Native call that failed.
        call: &'static str,
        /// OS diagnostic.
        #[source]
        source: io::Error,
    },

    /// Unpinning pages failed.
    #[error("unlock failed: {call}: {source}")]
    UnlockFailed {
        /// Native call that failed.
        call: &'static str,
        /// OS diagnostic.
        #[source]
        source: io::Error,
    },

    /// Writing modified pages back to the file failed.
    #[error("flush failed: {call}: {source}")]
    FlushFailed {
        /// Native call that failed.
        call: &'static str,
        /// OS diagnostic.
        #[source]
        source: io::Error,
    },

    /// Both the implicit flush and the unmap performed by `close` failed.
    /// The region is closed regardless.
    #[error("close failed: {flush}; {unmap}")]
    CloseFailed {
        /// Error from the pre-unmap flush.
        flush: Box<MmapError>,
        /// Error from the unmap.
        unmap: Box<MmapError>,
    },
}

impl MmapError {
    /// Whether this is an expected stream condition (`EndOfRegion`, `PartialWrite`)
    /// rather than a fault.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::EndOfRegion | Self::PartialWrite { .. })
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self {
            MmapError::Io(e) => e.kind(),
            MmapError::InvalidOffset { .. }
            | MmapError::OutOfBounds { .. }
            | MmapError::InvalidLength(_)
            | MmapError::MisalignedOffset { .. }
            | MmapError::InvalidSeek { .. } => io::ErrorKind::InvalidInput,
            MmapError::PermissionDenied { .. } => io::ErrorKind::PermissionDenied,
            MmapError::EndOfRegion => io::ErrorKind::UnexpectedEof,
            MmapError::PartialWrite { .. } => io::ErrorKind::WriteZero,
            MmapError::MapFailed { source, .. }
            | MmapError::UnmapFailed { source, .. }
            | MmapError::LockFailed { source, .. }
            | MmapError::UnlockFailed { source, .. }
            | MmapError::FlushFailed { source, .. } => source.kind(),
            MmapError::PolicyFlushFailed { source, .. } => source.io_kind(),
            MmapError::InvalidState(_) | MmapError::AlreadyClosed | MmapError::CloseFailed { .. } => {
                io::ErrorKind::Other
            }
        }
    }
}

impl From<MmapError> for io::Error {
    fn from(err: MmapError) -> Self {
        io::Error::new(err.io_kind(), err)
    }
}
