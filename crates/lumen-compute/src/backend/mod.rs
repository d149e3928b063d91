//! Compute backends.
//!
//! A backend implements [`Device`]: raw allocation, copies, pointer
//! classification and the group-parallel kernel launch. The [`Engine`](crate::Engine)
//! composes one device and builds everything else on top of it.
//!
//! # Architecture
//!
//! ```text
//! Engine
//!     +-- CpuDevice    (rayon thread pool)
//!     +-- SerialDevice (caller thread, reference ordering)
//! ```

mod cpu_backend;
mod detect;
pub mod memory;
mod serial_backend;

pub use cpu_backend::CpuDevice;
pub use detect::{BackendInfo, describe_backends, detect_backends, select_best_backend};
pub use serial_backend::SerialDevice;

use std::ptr::NonNull;
use std::str::FromStr;

use crate::buffer::Storage;
use crate::config::EngineConfig;
use crate::kernel::{GroupKernel, WorkDim, WorkGroup};
use crate::{ComputeError, ComputeResult};

/// Available compute backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Auto-select best available (CPU > serial).
    #[default]
    Auto,
    /// CPU backend using a rayon thread pool.
    Cpu,
    /// Single-threaded backend, groups run in launch order.
    Serial,
}

impl Backend {
    /// Check if this backend is available on current system.
    pub fn is_available(&self) -> bool {
        match self {
            Self::Auto | Self::Cpu | Self::Serial => true,
        }
    }

    /// Get human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Cpu => "cpu",
            Self::Serial => "serial",
        }
    }
}

impl FromStr for Backend {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "serial" => Ok(Self::Serial),
            other => Err(ComputeError::BackendNotAvailable(other.to_string())),
        }
    }
}

/// Direction of a memory copy, derived from the storage of both pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    HostToHost,
    HostToDevice,
    DeviceToHost,
    DeviceToDevice,
}

impl TransferKind {
    /// Classifies a copy from `src` storage into `dst` storage.
    pub fn between(src: Storage, dst: Storage) -> Self {
        match (src.is_host_accessible(), dst.is_host_accessible()) {
            (true, true) => Self::HostToHost,
            (true, false) => Self::HostToDevice,
            (false, true) => Self::DeviceToHost,
            (false, false) => Self::DeviceToDevice,
        }
    }
}

/// Backend capability composed by the engine.
///
/// Default methods implement a plain host backend: aligned heap allocation,
/// byte copies and every pointer reported as [`Storage::Host`]. Backends
/// override what differs on their hardware.
pub trait Device: Send + Sync + 'static {
    /// Backend name.
    fn name(&self) -> &'static str;

    /// Backend kind.
    fn backend(&self) -> Backend;

    /// Number of groups that may execute at the same time.
    fn num_threads(&self) -> usize {
        1
    }

    /// Memory available to this device in bytes.
    fn available_memory(&self) -> u64 {
        memory::available_memory()
    }

    /// Allocate `byte_size` bytes of `storage` memory.
    fn malloc(&self, byte_size: usize, _storage: Storage) -> ComputeResult<NonNull<u8>> {
        memory::aligned_alloc(byte_size)
    }

    /// Free memory returned by [`malloc`](Self::malloc).
    ///
    /// # Safety
    ///
    /// `ptr` must come from `self.malloc(byte_size, storage)` and not be used afterwards.
    unsafe fn free(&self, ptr: NonNull<u8>, byte_size: usize, _storage: Storage) {
        unsafe { memory::aligned_free(ptr, byte_size) }
    }

    /// Copy `byte_size` bytes from `src` to `dst`.
    ///
    /// # Safety
    ///
    /// Both ranges must be valid for `byte_size` bytes. Overlap is allowed.
    unsafe fn memcpy(&self, dst: *mut u8, src: *const u8, byte_size: usize, _kind: TransferKind) {
        unsafe { std::ptr::copy(src, dst, byte_size) }
    }

    /// Storage class backing `ptr`.
    fn pointer_storage(&self, _ptr: *const u8) -> Storage {
        Storage::Host
    }

    /// Launch `grid` groups of `group` workers each.
    ///
    /// Every group of the launch has completed when this returns, so
    /// consecutive launches observe each other's writes.
    fn launch(&self, grid: WorkDim, group: WorkDim, kernel: &dyn GroupKernel);

    /// Block until all previously issued work has completed.
    fn wait(&self) {}
}

/// Runs one group of a launch to completion.
pub(crate) fn execute_group(
    kernel: &dyn GroupKernel,
    linear_id: usize,
    grid: WorkDim,
    group: WorkDim,
) {
    let mut wg = WorkGroup::new(linear_id, grid, group);
    kernel.run_group(&mut wg);
}

/// Create the device selected by `config`.
pub fn create_device(config: &EngineConfig) -> ComputeResult<Box<dyn Device>> {
    match config.backend {
        Backend::Auto => {
            let best = select_best_backend();
            create_device(&config.clone().with_backend(best))
        }
        Backend::Cpu => Ok(Box::new(CpuDevice::new(config.num_threads)?)),
        Backend::Serial => Ok(Box::new(SerialDevice::new())),
    }
}
