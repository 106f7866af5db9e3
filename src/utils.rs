//! Utility helpers for page size, alignment, and safe range calculations.

use crate::errors::{MmapError, Result};

/// Get the system page size in bytes.
#[must_use]
pub fn page_size() -> usize {
    cfg_if::cfg_if! {
        if #[cfg(windows)] {
            windows_system_info().dwPageSize as usize
        } else {
            unix_page_size()
        }
    }
}

/// Granularity that file offsets of a mapping must be aligned to.
///
/// This is the page size on Unix and the (larger) allocation granularity on Windows.
#[must_use]
pub fn allocation_granularity() -> usize {
    cfg_if::cfg_if! {
        if #[cfg(windows)] {
            windows_system_info().dwAllocationGranularity as usize
        } else {
            unix_page_size()
        }
    }
}

#[cfg(windows)]
fn windows_system_info() -> windows_sys::Win32::System::SystemInformation::SYSTEM_INFO {
    use std::mem::MaybeUninit;
    use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

    let mut sysinfo = MaybeUninit::<SYSTEM_INFO>::uninit();
    // SAFETY: GetSystemInfo fully initializes the structure it is handed.
    unsafe {
        GetSystemInfo(sysinfo.as_mut_ptr());
        sysinfo.assume_init()
    }
}

#[cfg(not(windows))]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn unix_page_size() -> usize {
    // SAFETY: sysconf with _SC_PAGESIZE is safe to call.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    page_size.max(1) as usize
}

/// Align a value down to the nearest multiple of `alignment`.
#[must_use]
pub fn align_down(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    if alignment.is_power_of_two() {
        value & !(alignment - 1)
    } else {
        value - value % alignment
    }
}

/// Whether `value` is a multiple of `alignment`.
#[must_use]
pub fn is_aligned(value: u64, alignment: u64) -> bool {
    align_down(value, alignment) == value
}

/// Ensure the requested [offset, offset+len) range is within [0, total).
/// Returns `Ok(())` if valid; otherwise an `OutOfBounds` error.
///
/// # Errors
///
/// Returns `MmapError::OutOfBounds` if the range exceeds bounds.
pub fn ensure_in_bounds(offset: u64, len: u64, total: u64) -> Result<()> {
    if offset > total {
        return Err(MmapError::OutOfBounds { offset, len, total });
    }
    let end = offset.saturating_add(len);
    if end > total {
        return Err(MmapError::OutOfBounds { offset, len, total });
    }
    Ok(())
}

/// Compute a safe byte slice range for a given total length, returning start..end as usize tuple.
///
/// # Errors
///
/// Returns `MmapError::OutOfBounds` if the requested range exceeds the total length.
#[allow(clippy::cast_possible_truncation)]
pub fn slice_range(offset: u64, len: u64, total: u64) -> Result<(usize, usize)> {
    ensure_in_bounds(offset, len, total)?;
    // Bounds are validated against `total`, which is the length of a live mapping
    // and therefore fits in usize.
    let start = offset as usize;
    let end = (offset + len) as usize;
    Ok((start, end))
}
