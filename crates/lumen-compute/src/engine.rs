//! The engine: uniform factory for device memory, views and ops.
//!
//! [`Engine`] is a cheap, clonable handle. It composes one backend
//! [`Device`] and adds what every backend shares: allocation limits,
//! typed views, the scratch pool and kernel launch plumbing.
//!
//! # Scratch pool lifetime
//!
//! The engine only keeps a [`Weak`] reference to its
//! [`ScratchBufferManager`]. The manager lives as long as some
//! [`ScratchBuffer`] holds it, and a fresh one is created on the next
//! request after the last scratch buffer is gone.

use std::fmt;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use lumen_core::ImageDesc;
use tracing::{debug, trace};

use crate::autoexposure::Autoexposure;
use crate::backend::memory::format_bytes;
use crate::backend::{self, Backend, Device, TransferKind};
use crate::buffer::{Buffer, Storage};
use crate::config::EngineConfig;
use crate::image::Image;
use crate::kernel::{GroupKernel, WorkDim};
use crate::scratch::{ScratchBuffer, ScratchBufferManager};
use crate::tensor::{Tensor, TensorDesc};
use crate::{ComputeError, ComputeResult};

struct EngineInner {
    device: Box<dyn Device>,
    config: EngineConfig,
    scratch_manager: Mutex<Weak<ScratchBufferManager>>,
}

/// Handle to a compute engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Create an engine for the backend selected by `config`.
    pub fn new(config: EngineConfig) -> ComputeResult<Self> {
        let device = backend::create_device(&config)?;
        Ok(Self::with_device(device, config))
    }

    /// Create an engine configured from the environment.
    pub fn from_env() -> ComputeResult<Self> {
        Self::new(EngineConfig::from_env()?)
    }

    /// Create an engine over an existing device.
    pub fn with_device(device: Box<dyn Device>, config: EngineConfig) -> Self {
        debug!(
            backend = device.name(),
            threads = device.num_threads(),
            available = %format_bytes(device.available_memory()),
            "created engine"
        );
        Self {
            inner: Arc::new(EngineInner {
                device,
                config,
                scratch_manager: Mutex::new(Weak::new()),
            }),
        }
    }

    /// Backend device.
    #[inline]
    pub fn device(&self) -> &dyn Device {
        self.inner.device.as_ref()
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.device().name()
    }

    #[inline]
    pub fn backend(&self) -> Backend {
        self.device().backend()
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Whether both handles refer to the same engine.
    #[inline]
    pub fn same_engine(&self, other: &Engine) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // =========================================================================
    // Buffers
    // =========================================================================

    /// Allocate a buffer of `byte_size` bytes.
    pub fn new_buffer(&self, byte_size: usize, storage: Storage) -> ComputeResult<Buffer> {
        Buffer::allocate(self, byte_size, storage)
    }

    /// Wrap external memory without taking ownership.
    ///
    /// # Safety
    ///
    /// `ptr` must stay valid for `byte_size` bytes while the buffer or any
    /// view of it is alive.
    pub unsafe fn new_buffer_from_ptr(
        &self,
        ptr: *mut u8,
        byte_size: usize,
    ) -> ComputeResult<Buffer> {
        let ptr = NonNull::new(ptr)
            .ok_or_else(|| ComputeError::allocation_failed(byte_size, "null external pointer"))?;
        Ok(unsafe { Buffer::wrap(self, ptr, byte_size) })
    }

    /// Borrow a scratch buffer of at least `byte_size` bytes from the pool.
    pub fn new_scratch_buffer(&self, byte_size: usize) -> ComputeResult<ScratchBuffer> {
        let manager = {
            let mut slot =
                self.inner.scratch_manager.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.upgrade() {
                Some(manager) => manager,
                None => {
                    let manager = Arc::new(ScratchBufferManager::new(
                        self.clone(),
                        self.config().scratch_pool_budget_bytes(),
                    ));
                    *slot = Arc::downgrade(&manager);
                    manager
                }
            }
        };
        ScratchBuffer::new(manager, byte_size)
    }

    /// Whether a scratch manager is currently alive.
    pub fn has_scratch_manager(&self) -> bool {
        self.inner
            .scratch_manager
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .strong_count()
            > 0
    }

    // =========================================================================
    // Tensors and images
    // =========================================================================

    /// Allocate a tensor with its own buffer.
    pub fn new_tensor(&self, desc: TensorDesc, storage: Storage) -> ComputeResult<Tensor> {
        let buffer = self.new_buffer(desc.byte_size(), storage)?;
        Tensor::new(buffer, desc, 0)
    }

    /// Tensor over external memory.
    ///
    /// # Safety
    ///
    /// `data` must stay valid for `desc.byte_size()` bytes while the tensor is alive.
    pub unsafe fn new_tensor_from_ptr(
        &self,
        desc: TensorDesc,
        data: *mut u8,
    ) -> ComputeResult<Tensor> {
        let buffer = unsafe { self.new_buffer_from_ptr(data, desc.byte_size())? };
        Tensor::new(buffer, desc, 0)
    }

    /// Tensor aliasing `buffer` starting at `byte_offset`.
    pub fn new_tensor_at(
        &self,
        buffer: &Buffer,
        desc: TensorDesc,
        byte_offset: usize,
    ) -> ComputeResult<Tensor> {
        if !buffer.engine().same_engine(self) {
            return Err(ComputeError::EngineMismatch);
        }
        Tensor::new(buffer.clone(), desc, byte_offset)
    }

    /// Allocate an image with its own buffer.
    pub fn new_image(&self, desc: ImageDesc, storage: Storage) -> ComputeResult<Image> {
        let buffer = self.new_buffer(desc.byte_size(), storage)?;
        Image::new(buffer, desc, 0)
    }

    /// Image aliasing `buffer` starting at `byte_offset`.
    pub fn new_image_at(
        &self,
        buffer: &Buffer,
        desc: ImageDesc,
        byte_offset: usize,
    ) -> ComputeResult<Image> {
        if !buffer.engine().same_engine(self) {
            return Err(ComputeError::EngineMismatch);
        }
        Image::new(buffer.clone(), desc, byte_offset)
    }

    // =========================================================================
    // Ops
    // =========================================================================

    /// Create an autoexposure op for images of `src_desc`'s size.
    pub fn new_autoexposure(&self, src_desc: &ImageDesc) -> ComputeResult<Autoexposure> {
        Autoexposure::new(self, src_desc)
    }

    // =========================================================================
    // Raw primitives
    // =========================================================================

    /// Allocate raw memory, honoring the configured allocation limit.
    pub fn malloc(&self, byte_size: usize, storage: Storage) -> ComputeResult<NonNull<u8>> {
        if let Some(limit) = self.config().max_allocation {
            if byte_size as u64 > limit {
                return Err(ComputeError::allocation_failed(
                    byte_size,
                    format!("exceeds allocation limit of {limit} bytes"),
                ));
            }
        }
        let ptr = self.device().malloc(byte_size, storage)?;
        trace!(bytes = byte_size, ?storage, "malloc");
        Ok(ptr)
    }

    /// Free memory from [`malloc`](Self::malloc).
    ///
    /// # Safety
    ///
    /// See [`Device::free`].
    pub unsafe fn free(&self, ptr: NonNull<u8>, byte_size: usize, storage: Storage) {
        unsafe { self.device().free(ptr, byte_size, storage) }
    }

    /// Copy `byte_size` bytes between any two engine-visible pointers.
    ///
    /// # Safety
    ///
    /// See [`Device::memcpy`].
    pub unsafe fn memcpy(&self, dst: *mut u8, src: *const u8, byte_size: usize) {
        let kind = TransferKind::between(self.pointer_storage(src), self.pointer_storage(dst));
        unsafe { self.device().memcpy(dst, src, byte_size, kind) }
    }

    /// Storage class backing `ptr`.
    #[inline]
    pub fn pointer_storage(&self, ptr: *const u8) -> Storage {
        self.device().pointer_storage(ptr)
    }

    /// Launch `grid` groups of `group` workers running `kernel`.
    pub fn run_kernel<K: GroupKernel>(
        &self,
        grid: impl Into<WorkDim>,
        group: impl Into<WorkDim>,
        kernel: &K,
    ) {
        let grid = grid.into();
        let group = group.into();
        if grid.is_empty() || group.is_empty() {
            return;
        }
        self.device().launch(grid, group, kernel);
    }

    /// Wait for all issued work to complete.
    #[inline]
    pub fn wait(&self) {
        self.device().wait();
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("backend", &self.name())
            .field("threads", &self.device().num_threads())
            .finish()
    }
}
