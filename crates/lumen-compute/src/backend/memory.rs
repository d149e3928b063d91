//! Host memory primitives and system memory detection.
//!
//! The default [`Device`](super::Device) allocation path lands here: aligned
//! heap blocks, freed with the same layout they were allocated with.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::OnceLock;

use crate::{ComputeError, ComputeResult};

/// Alignment of every engine allocation, in bytes.
pub const ALIGNMENT: usize = 64;

/// Fraction of system RAM the scratch pool may keep cached by default.
pub const SCRATCH_POOL_FRACTION: f64 = 0.25;

/// Cache for system memory detection.
static SYSTEM_MEMORY: OnceLock<u64> = OnceLock::new();

/// Detect total system RAM in bytes.
pub fn system_memory() -> u64 {
    *SYSTEM_MEMORY.get_or_init(|| {
        sys_info::mem_info()
            .map(|m| m.total * 1024) // KB to bytes
            .unwrap_or(8 * 1024 * 1024 * 1024) // 8 GB fallback
    })
}

/// Currently available RAM in bytes.
pub fn available_memory() -> u64 {
    sys_info::mem_info()
        .map(|m| m.avail * 1024)
        .unwrap_or(4 * 1024 * 1024 * 1024)
}

/// Default byte budget the scratch pool keeps for reuse.
pub fn default_scratch_budget() -> u64 {
    (system_memory() as f64 * SCRATCH_POOL_FRACTION) as u64
}

/// Allocates `byte_size` bytes aligned to [`ALIGNMENT`].
///
/// Zero-sized requests return a dangling, aligned pointer that must not be
/// dereferenced; [`aligned_free`] treats it as a no-op.
pub(crate) fn aligned_alloc(byte_size: usize) -> ComputeResult<NonNull<u8>> {
    if byte_size == 0 {
        return Ok(dangling());
    }

    let layout = Layout::from_size_align(byte_size, ALIGNMENT)
        .map_err(|e| ComputeError::allocation_failed(byte_size, e.to_string()))?;

    // SAFETY: layout has a non-zero size.
    let ptr = unsafe { alloc::alloc(layout) };
    NonNull::new(ptr).ok_or_else(|| ComputeError::allocation_failed(byte_size, "out of memory"))
}

/// Frees a block returned by [`aligned_alloc`].
///
/// # Safety
///
/// `ptr` must come from `aligned_alloc(byte_size)` and must not be freed twice.
pub(crate) unsafe fn aligned_free(ptr: NonNull<u8>, byte_size: usize) {
    if byte_size == 0 {
        return;
    }
    // The layout was valid when the block was allocated.
    if let Ok(layout) = Layout::from_size_align(byte_size, ALIGNMENT) {
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
    }
}

fn dangling() -> NonNull<u8> {
    // ALIGNMENT is non-zero
    NonNull::new(ALIGNMENT as *mut u8).unwrap_or(NonNull::dangling())
}

/// Format bytes as human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{} KB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}
