//! Flush modes and the flush policy applied after writes.

/// How a flush waits for modified pages to reach the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Block until the write-back completes.
    #[default]
    Synchronous,
    /// Schedule the write-back and return immediately.
    Asynchronous,
    /// Write back synchronously and invalidate other cached mappings of the same file range.
    InvalidateOtherMappings,
}

/// Policy controlling when writes through the stream interface trigger a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushPolicy {
    /// Never flush implicitly; `flush()` must be called by the user (or `close`).
    #[default]
    Never,
    /// Alias of Never for semantic clarity when using the builder API.
    Manual,
    /// Flush after every write.
    Always,
    /// Flush when at least N bytes have been written since the last flush.
    EveryBytes(usize),
    /// Flush after every W writes.
    EveryWrites(usize),
}

impl FlushPolicy {
    /// Whether the counters accumulated since the last flush call for a flush now.
    #[must_use]
    pub(crate) fn is_due(self, pending: &Pending) -> bool {
        if pending.writes == 0 {
            return false;
        }
        match self {
            Self::Never | Self::Manual => false,
            Self::Always => true,
            Self::EveryBytes(n) => pending.bytes >= n,
            Self::EveryWrites(n) => pending.writes >= n,
        }
    }
}

/// Bytes and writes accumulated since the last flush.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Pending {
    pub(crate) bytes: usize,
    pub(crate) writes: usize,
}

impl Pending {
    pub(crate) fn record(&mut self, bytes: usize) {
        self.bytes = self.bytes.saturating_add(bytes);
        self.writes = self.writes.saturating_add(1);
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}
