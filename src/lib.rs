//! # mmap-region: memory-mapped files as cursor-tracked streams
//!
//! This crate maps a file (given as an already-open descriptor) into memory and
//! exposes the mapping as a stream with a single read/write cursor, permission
//! checks derived from the mapping's protection, and an explicit lifecycle.
//!
//! ## Features
//!
//! - **Portable intents**: [`Protection`], [`Sharing`] and [`SyncMode`] are translated
//!   to POSIX `mmap`/`msync` or Windows file-mapping flags per platform
//! - **Checked stream I/O**: read, write and seek never leave `[0, len]`; writes never
//!   grow the mapping
//! - **Explicit lifecycle**: lock, unlock, flush and close with typed native errors
//! - **Thread-safe**: one mutex serializes cursor movement and native calls
//! - **std integration**: `std::io::{Read, Write, Seek}` for regions and `&MappedRegion`
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::io::SeekFrom;
//! use mmap_region::{create_region, SyncMode};
//!
//! // Create a 4KB file and map it read-write, shared
//! let region = create_region("data.bin", 4096)?;
//!
//! region.write(b"Hello, mmap!")?;
//! region.flush_with(SyncMode::Asynchronous)?;
//!
//! region.seek(SeekFrom::Start(0))?;
//! let mut buf = [0u8; 12];
//! region.read(&mut buf)?;
//! region.close()?;
//! # Ok::<(), mmap_region::MmapError>(())
//! ```
//!
//! ## Modules
//!
//! - [`errors`]: Error types for all region operations
//! - [`os`]: Platform mapping layer and the [`Platform`] trait
//! - [`region`]: Core [`MappedRegion`] implementation
//! - [`builder`]: Region configuration
//! - [`manager`]: Path-based convenience functions
//! - [`utils`]: Page size, alignment and bounds helpers

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![deny(missing_docs)]

pub mod builder;
pub mod errors;
pub mod flush;
pub mod manager;
pub mod os;
pub mod protection;
pub mod region;
pub mod utils;

pub use builder::RegionBuilder;
pub use errors::{MmapError, Result};
pub use flush::{FlushPolicy, SyncMode};
pub use manager::{create_region, load_region, MappedFile};
pub use os::{AsRawDescriptor, NativeMapper, Platform, RawDescriptor};
pub use protection::{Protection, Sharing};
pub use region::MappedRegion;
