//! Builder for configuring a region before it is mapped.

use crate::errors::Result;
use crate::flush::FlushPolicy;
use crate::os::{AsRawDescriptor, NativeMapper, Platform};
use crate::protection::{Protection, Sharing};
use crate::region::MappedRegion;

/// Options for mapping a region. Obtained from [`MappedRegion::builder`].
///
/// Defaults: file offset 0, [`Protection::ReadWrite`], [`Sharing::Shared`],
/// [`FlushPolicy::Never`].
///
/// # Examples
///
/// ```no_run
/// use mmap_region::{FlushPolicy, MappedRegion, Protection, Sharing};
///
/// let file = std::fs::OpenOptions::new().read(true).write(true).open("data.bin")?;
/// let region = MappedRegion::builder(8192)
///     .protection(Protection::ReadWrite)
///     .sharing(Sharing::Shared)
///     .flush_policy(FlushPolicy::EveryBytes(4096))
///     .map(&file)?;
/// region.write(b"logged")?;
/// # Ok::<(), mmap_region::MmapError>(())
/// ```
#[derive(Debug, Clone, Copy)]
#[must_use]
pub struct RegionBuilder {
    len: u64,
    offset: u64,
    protection: Protection,
    sharing: Sharing,
    flush_policy: FlushPolicy,
}

impl RegionBuilder {
    /// Options for a region of `len` bytes.
    pub fn new(len: u64) -> Self {
        Self {
            len,
            offset: 0,
            protection: Protection::ReadWrite,
            sharing: Sharing::Shared,
            flush_policy: FlushPolicy::Never,
        }
    }

    /// File offset of the first mapped byte; must be granularity-aligned.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Page protection and stream permissions.
    pub fn protection(mut self, protection: Protection) -> Self {
        self.protection = protection;
        self
    }

    /// Write visibility.
    pub fn sharing(mut self, sharing: Sharing) -> Self {
        self.sharing = sharing;
        self
    }

    /// When writes trigger an implicit flush.
    pub fn flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.flush_policy = policy;
        self
    }

    /// Map `descriptor` with the native mapper.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`MappedRegion::create_with`].
    pub fn map<D: AsRawDescriptor + ?Sized>(self, descriptor: &D) -> Result<MappedRegion> {
        self.map_with(NativeMapper, descriptor)
    }

    /// Map `descriptor` through `platform`.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`MappedRegion::create_with`].
    pub fn map_with<P: Platform, D: AsRawDescriptor + ?Sized>(
        self,
        platform: P,
        descriptor: &D,
    ) -> Result<MappedRegion<P>> {
        MappedRegion::map_raw(
            platform,
            self.len,
            self.offset,
            self.protection,
            self.sharing,
            descriptor.as_raw_descriptor(),
            self.flush_policy,
        )
    }
}
