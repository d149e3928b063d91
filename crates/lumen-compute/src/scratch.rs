//! Pooled temporary memory.
//!
//! Ops need short-lived working memory between kernel launches. A
//! [`ScratchBufferManager`] keeps released blocks and hands them out again,
//! so repeated runs of the same op do not hit the allocator.
//!
//! Reuse policy:
//! - best fit: the smallest free block at least as large as the request
//! - a block is reusable only when no tensor or image still aliases it
//! - released blocks are kept while the pool stays within its byte budget

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace};

use crate::ComputeResult;
use crate::backend::memory::format_bytes;
use crate::buffer::{Buffer, Storage};
use crate::engine::Engine;

/// Pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScratchStats {
    /// Requests served from the pool.
    pub hits: u64,
    /// Requests that needed a new allocation.
    pub misses: u64,
    /// Blocks currently held for reuse.
    pub pooled_blocks: usize,
    /// Bytes currently held for reuse.
    pub pooled_bytes: u64,
}

impl ScratchStats {
    /// Fraction of requests served from the pool.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

#[derive(Default)]
struct PoolState {
    free: Vec<Buffer>,
    pooled_bytes: u64,
    hits: u64,
    misses: u64,
}

/// Pool of scratch memory for one engine.
///
/// Created lazily by [`Engine::new_scratch_buffer`] and kept alive only by the
/// scratch buffers it hands out.
pub struct ScratchBufferManager {
    engine: Engine,
    budget: u64,
    state: Mutex<PoolState>,
}

impl ScratchBufferManager {
    pub(crate) fn new(engine: Engine, budget: u64) -> Self {
        debug!(engine = engine.name(), budget = %format_bytes(budget), "created scratch pool");
        Self {
            engine,
            budget,
            state: Mutex::new(PoolState::default()),
        }
    }

    #[inline]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Bytes the pool may hold for reuse.
    #[inline]
    pub fn budget(&self) -> u64 {
        self.budget
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self, byte_size: usize) -> ComputeResult<Buffer> {
        {
            let mut state = self.lock();
            let best = state
                .free
                .iter()
                .enumerate()
                .filter(|(_, b)| b.byte_size() >= byte_size && b.handle_count() == 1)
                .min_by_key(|(_, b)| b.byte_size())
                .map(|(i, _)| i);

            if let Some(i) = best {
                let buffer = state.free.swap_remove(i);
                state.pooled_bytes -= buffer.byte_size() as u64;
                state.hits += 1;
                trace!(requested = byte_size, block = buffer.byte_size(), "scratch hit");
                return Ok(buffer);
            }
            state.misses += 1;
        }

        trace!(requested = byte_size, "scratch miss");
        self.engine.new_buffer(byte_size, Storage::Device)
    }

    fn release(&self, buffer: Buffer) {
        let size = buffer.byte_size() as u64;
        let mut state = self.lock();
        if state.pooled_bytes + size <= self.budget {
            state.pooled_bytes += size;
            state.free.push(buffer);
        } else {
            trace!(bytes = size, "scratch pool full, freeing block");
        }
    }

    /// Drop every pooled block.
    pub fn trim(&self) {
        let freed = {
            let mut state = self.lock();
            state.pooled_bytes = 0;
            std::mem::take(&mut state.free)
        };
        if !freed.is_empty() {
            debug!(blocks = freed.len(), "trimmed scratch pool");
        }
    }

    pub fn stats(&self) -> ScratchStats {
        let state = self.lock();
        ScratchStats {
            hits: state.hits,
            misses: state.misses,
            pooled_blocks: state.free.len(),
            pooled_bytes: state.pooled_bytes,
        }
    }
}

impl Drop for ScratchBufferManager {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        debug!(
            blocks = state.free.len(),
            hits = state.hits,
            misses = state.misses,
            "dropping scratch pool"
        );
    }
}

impl fmt::Debug for ScratchBufferManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScratchBufferManager")
            .field("engine", &self.engine.name())
            .field("budget", &self.budget)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Temporary buffer borrowed from a [`ScratchBufferManager`].
///
/// Dereferences to the underlying [`Buffer`], so tensors can be created over
/// it with [`Engine::new_tensor_at`]. The memory goes back to the pool when
/// the scratch buffer is dropped; views that still alias it keep it out of
/// circulation until they are gone too.
pub struct ScratchBuffer {
    manager: Arc<ScratchBufferManager>,
    buffer: Option<Buffer>,
    byte_size: usize,
}

impl ScratchBuffer {
    pub(crate) fn new(manager: Arc<ScratchBufferManager>, byte_size: usize) -> ComputeResult<Self> {
        let buffer = manager.acquire(byte_size)?;
        Ok(Self {
            manager,
            buffer: Some(buffer),
            byte_size,
        })
    }

    /// Requested size. The backing block may be larger.
    #[inline]
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// Manager this buffer came from.
    #[inline]
    pub fn manager(&self) -> &ScratchBufferManager {
        &self.manager
    }

    /// The backing buffer.
    #[inline]
    pub fn buffer(&self) -> &Buffer {
        // Only taken in Drop.
        self.buffer.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl Deref for ScratchBuffer {
    type Target = Buffer;

    fn deref(&self) -> &Buffer {
        self.buffer()
    }
}

impl Drop for ScratchBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.manager.release(buffer);
        }
    }
}

impl fmt::Debug for ScratchBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScratchBuffer")
            .field("byte_size", &self.byte_size)
            .field("block", &self.buffer().byte_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Backend, EngineConfig};

    fn engine() -> Engine {
        let config = EngineConfig::default()
            .with_backend(Backend::Serial)
            .with_scratch_pool_budget(1 << 20);
        Engine::new(config).unwrap()
    }

    #[test]
    fn test_reuse_after_release() {
        let engine = engine();
        let a = engine.new_scratch_buffer(256).unwrap();
        let manager_stats = a.manager().stats();
        assert_eq!(manager_stats.misses, 1);

        // keep the manager alive across the release
        let b = engine.new_scratch_buffer(64).unwrap();
        drop(a);
        let c = engine.new_scratch_buffer(128).unwrap();
        assert_eq!(c.byte_size(), 128);
        assert_eq!(c.buffer().byte_size(), 256);

        let stats = b.manager().stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.pooled_blocks, 0);
    }

    #[test]
    fn test_best_fit() {
        let engine = engine();
        let keep = engine.new_scratch_buffer(8).unwrap();
        let large = engine.new_scratch_buffer(1024).unwrap();
        let small = engine.new_scratch_buffer(100).unwrap();
        drop(large);
        drop(small);

        let s = engine.new_scratch_buffer(90).unwrap();
        assert_eq!(s.buffer().byte_size(), 100);
        assert_eq!(keep.manager().stats().pooled_blocks, 1);
    }

    #[test]
    fn test_aliased_block_not_reused() {
        let engine = engine();
        let keep = engine.new_scratch_buffer(8).unwrap();
        let scratch = engine.new_scratch_buffer(64).unwrap();
        let view = scratch.buffer().clone();
        drop(scratch);

        let other = engine.new_scratch_buffer(64).unwrap();
        assert!(!other.same_memory(&view));
        assert_eq!(keep.manager().stats().hits, 0);
    }

    #[test]
    fn test_budget_limits_pool() {
        let config =
            EngineConfig::default().with_backend(Backend::Serial).with_scratch_pool_budget(100);
        let engine = Engine::new(config).unwrap();
        let keep = engine.new_scratch_buffer(8).unwrap();
        drop(engine.new_scratch_buffer(200).unwrap());
        assert_eq!(keep.manager().stats().pooled_blocks, 0);
        drop(engine.new_scratch_buffer(50).unwrap());
        assert_eq!(keep.manager().stats().pooled_bytes, 50);

        keep.manager().trim();
        assert_eq!(keep.manager().stats().pooled_blocks, 0);
    }

    #[test]
    fn test_manager_recreated() {
        let engine = engine();
        assert!(!engine.has_scratch_manager());
        let s = engine.new_scratch_buffer(16).unwrap();
        assert!(engine.has_scratch_manager());
        drop(s);
        assert!(!engine.has_scratch_manager());

        let s = engine.new_scratch_buffer(16).unwrap();
        assert_eq!(s.manager().stats().misses, 1);
    }
}
