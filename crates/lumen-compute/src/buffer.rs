//! Device-addressable memory.
//!
//! A [`Buffer`] is a contiguous allocation made by an [`Engine`], or a
//! non-owning wrapper around external memory. Buffers are reference counted:
//! cloning one shares the same bytes, and tensors/images built over a buffer
//! keep it alive.
//!
//! Kernels never touch a `Buffer` directly. They receive [`DevicePtr`]s,
//! copyable handles that can be sent to any worker thread and are only
//! dereferenced through `unsafe` reads and writes.

use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

use tracing::trace;

use crate::engine::Engine;
use crate::{ComputeError, ComputeResult};

/// Storage class of an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Storage {
    /// Host memory, visible to the device.
    Host,
    /// Device-local memory.
    #[default]
    Device,
    /// Migrates between host and device on demand.
    Managed,
}

impl Storage {
    /// Whether the host can dereference pointers of this storage directly.
    #[inline]
    pub fn is_host_accessible(&self) -> bool {
        matches!(self, Self::Host | Self::Managed)
    }
}

/// Typed pointer into device memory.
///
/// Plain data: copying it does not copy or retain the memory. Validity is
/// tied to the buffer it was taken from.
pub struct DevicePtr<T> {
    ptr: *mut T,
    _marker: PhantomData<T>,
}

// SAFETY: a DevicePtr is an address; every access goes through unsafe
// read/write whose callers guarantee exclusive or read-only use per element.
unsafe impl<T: Send> Send for DevicePtr<T> {}
unsafe impl<T: Sync> Sync for DevicePtr<T> {}

impl<T> Clone for DevicePtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for DevicePtr<T> {}

impl<T> fmt::Debug for DevicePtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DevicePtr({:p})", self.ptr)
    }
}

impl<T> PartialEq for DevicePtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<T> DevicePtr<T> {
    /// Wrap a raw address.
    #[inline]
    pub fn new(ptr: *mut T) -> Self {
        Self { ptr, _marker: PhantomData }
    }

    #[inline]
    pub fn null() -> Self {
        Self::new(std::ptr::null_mut())
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut T {
        self.ptr
    }

    /// Reinterpret as a pointer to `U`.
    #[inline]
    pub fn cast<U>(self) -> DevicePtr<U> {
        DevicePtr::new(self.ptr.cast())
    }

    /// Advance by `bytes`.
    ///
    /// # Safety
    ///
    /// The result must stay within the same allocation.
    #[inline]
    pub unsafe fn byte_add(self, bytes: usize) -> Self {
        Self::new(unsafe { self.ptr.byte_add(bytes) })
    }

    /// Read element `index`.
    ///
    /// # Safety
    ///
    /// The element must be in bounds and not written concurrently.
    #[inline]
    pub unsafe fn read(self, index: usize) -> T
    where
        T: Copy,
    {
        unsafe { self.ptr.add(index).read_unaligned() }
    }

    /// Write element `index`.
    ///
    /// # Safety
    ///
    /// The element must be in bounds and not accessed concurrently.
    #[inline]
    pub unsafe fn write(self, index: usize, value: T) {
        unsafe { self.ptr.add(index).write_unaligned(value) }
    }
}

struct BufferInner {
    engine: Engine,
    ptr: NonNull<u8>,
    byte_size: usize,
    storage: Storage,
    owned: bool,
}

// SAFETY: the allocation is plain memory; concurrent access is coordinated by
// kernel launches and by the &mut receivers of the ops that use it.
unsafe impl Send for BufferInner {}
unsafe impl Sync for BufferInner {}

impl Drop for BufferInner {
    fn drop(&mut self) {
        if self.owned {
            trace!(bytes = self.byte_size, storage = ?self.storage, "free buffer");
            // SAFETY: owned buffers come from engine.malloc with the same size and storage.
            unsafe { self.engine.free(self.ptr, self.byte_size, self.storage) };
        }
    }
}

/// Contiguous device-addressable memory.
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

impl Buffer {
    pub(crate) fn allocate(
        engine: &Engine,
        byte_size: usize,
        storage: Storage,
    ) -> ComputeResult<Self> {
        let ptr = engine.malloc(byte_size, storage)?;
        Ok(Self {
            inner: Arc::new(BufferInner {
                engine: engine.clone(),
                ptr,
                byte_size,
                storage,
                owned: true,
            }),
        })
    }

    /// # Safety
    ///
    /// `ptr` must be valid for `byte_size` bytes for the lifetime of the buffer
    /// and every view built on it.
    pub(crate) unsafe fn wrap(engine: &Engine, ptr: NonNull<u8>, byte_size: usize) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                engine: engine.clone(),
                ptr,
                byte_size,
                storage: engine.pointer_storage(ptr.as_ptr()),
                owned: false,
            }),
        }
    }

    /// Engine that created this buffer.
    #[inline]
    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    #[inline]
    pub fn byte_size(&self) -> usize {
        self.inner.byte_size
    }

    #[inline]
    pub fn storage(&self) -> Storage {
        self.inner.storage
    }

    /// Whether the memory is freed when the last reference goes away.
    #[inline]
    pub fn is_owned(&self) -> bool {
        self.inner.owned
    }

    /// Typed pointer to the first byte.
    #[inline]
    pub fn ptr<T>(&self) -> DevicePtr<T> {
        DevicePtr::new(self.inner.ptr.as_ptr().cast())
    }

    /// Whether both handles refer to the same allocation.
    #[inline]
    pub fn same_memory(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live handles (buffers, tensors, images) on this allocation.
    #[inline]
    pub(crate) fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Check that `[offset, offset + size)` lies inside the buffer.
    pub(crate) fn check_range(&self, offset: usize, size: usize) -> ComputeResult<()> {
        match offset.checked_add(size) {
            Some(end) if end <= self.byte_size() => Ok(()),
            _ => Err(ComputeError::OutOfRange {
                offset,
                size,
                capacity: self.byte_size(),
            }),
        }
    }

    /// Copy host bytes into the buffer at `byte_offset`.
    pub fn write(&self, byte_offset: usize, src: &[u8]) -> ComputeResult<()> {
        self.check_range(byte_offset, src.len())?;
        // SAFETY: range checked above; src is a live host slice.
        unsafe {
            let dst = self.ptr::<u8>().byte_add(byte_offset).as_ptr();
            self.engine().memcpy(dst, src.as_ptr(), src.len());
        }
        Ok(())
    }

    /// Copy bytes at `byte_offset` into host memory.
    pub fn read(&self, byte_offset: usize, dst: &mut [u8]) -> ComputeResult<()> {
        self.check_range(byte_offset, dst.len())?;
        // SAFETY: range checked above; dst is a live host slice.
        unsafe {
            let src = self.ptr::<u8>().byte_add(byte_offset).as_ptr();
            self.engine().memcpy(dst.as_mut_ptr(), src, dst.len());
        }
        Ok(())
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("engine", &self.engine().name())
            .field("byte_size", &self.byte_size())
            .field("storage", &self.storage())
            .field("owned", &self.is_owned())
            .finish()
    }
}
