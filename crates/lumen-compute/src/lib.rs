//! Device memory, tensors and autoexposure estimation over CPU compute backends.
//!
//! An [`Engine`] hands out device-addressable [`Buffer`]s, pooled
//! [`ScratchBuffer`]s, typed [`Tensor`] views and [`Image`]s without the caller
//! knowing which backend sits underneath. Ops such as [`Autoexposure`] are
//! written once against the kernel launch abstraction in [`kernel`] and run
//! unchanged on every backend.
//!
//! # Architecture
//!
//! ```text
//! Engine (allocation, views, scratch pool, kernel launch)
//!     └── Device trait
//!             ├── CpuDevice    (rayon thread pool, groups in parallel)
//!             └── SerialDevice (groups one after another)
//!
//! Autoexposure
//!     ├── DownsampleKernel  (16x16 tile -> average luminance)
//!     ├── ReduceKernel      (bins -> per-group log2 sum / count)
//!     └── ReduceFinalKernel (groups -> exposure scalar)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use lumen_compute::{Engine, EngineConfig, Storage};
//! use lumen_core::{ImageDesc, ImageFormat};
//!
//! let engine = Engine::new(EngineConfig::default())?;
//! let desc = ImageDesc::new(ImageFormat::Float3, 1920, 1080);
//! let image = engine.new_image(desc, Storage::Host)?;
//! image.fill([0.5, 0.5, 0.5])?;
//!
//! let mut ae = engine.new_autoexposure(&desc)?;
//! let scratch = engine.new_scratch_buffer(ae.scratch_byte_size())?;
//! ae.set_scratch(engine.new_tensor_at(&scratch, ae.scratch_desc(), 0)?)?;
//! ae.set_src(image)?;
//! ae.run()?;
//! let exposure = ae.read_result()?; // ~0.36
//! ```

pub mod autoexposure;
pub mod backend;
pub mod buffer;
pub mod config;
pub mod engine;
pub mod image;
pub mod kernel;
pub mod scratch;
pub mod tensor;

pub use autoexposure::{Autoexposure, BinGrid};
pub use backend::{
    Backend, CpuDevice, Device, SerialDevice, TransferKind, describe_backends, detect_backends,
    select_best_backend,
};
pub use buffer::{Buffer, DevicePtr, Storage};
pub use config::EngineConfig;
pub use engine::Engine;
pub use image::{Image, ImageAccessor};
pub use kernel::{GroupKernel, LocalArray, WorkDim, WorkGroup, WorkItem};
pub use scratch::{ScratchBuffer, ScratchBufferManager, ScratchStats};
pub use tensor::{Tensor, TensorDesc, TensorLayout};

use lumen_core::DataType;
use thiserror::Error;

/// Compute engine errors
#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("Backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to allocate {requested} bytes: {reason}")]
    AllocationFailed { requested: usize, reason: String },

    #[error("Image size mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch { expected: (usize, usize), actual: (usize, usize) },

    #[error("Scratch too small: need {required} bytes, got {actual}")]
    ScratchTooSmall { required: usize, actual: usize },

    #[error("Unsupported data type: {0}")]
    UnsupportedFormat(DataType),

    #[error("Not ready: {0} is not bound")]
    NotReady(&'static str),

    #[error("Buffer belongs to a different engine")]
    EngineMismatch,

    #[error("Range {offset}+{size} exceeds buffer of {capacity} bytes")]
    OutOfRange { offset: usize, size: usize, capacity: usize },

    #[error(transparent)]
    Core(#[from] lumen_core::Error),
}

pub type ComputeResult<T> = Result<T, ComputeError>;

impl ComputeError {
    pub(crate) fn allocation_failed(requested: usize, reason: impl Into<String>) -> Self {
        Self::AllocationFailed {
            requested,
            reason: reason.into(),
        }
    }

    /// Returns `true` if this is a resource exhaustion error.
    pub fn is_allocation_error(&self) -> bool {
        matches!(self, Self::AllocationFailed { .. })
    }
}
