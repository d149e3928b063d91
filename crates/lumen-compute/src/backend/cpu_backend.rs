//! CPU backend using rayon for parallelization.
//!
//! Groups of a launch are distributed over a dedicated thread pool. Workers
//! of one group run on the thread that owns the group, phase by phase, so
//! group-local arrays need no locking.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use super::{Backend, Device, execute_group};
use crate::kernel::{GroupKernel, WorkDim};
use crate::{ComputeError, ComputeResult};

/// CPU device backed by a rayon thread pool.
pub struct CpuDevice {
    pool: ThreadPool,
}

impl CpuDevice {
    /// Create a device with `num_threads` workers (`None` = one per core).
    pub fn new(num_threads: Option<usize>) -> ComputeResult<Self> {
        let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("lumen-cpu-{i}"));
        if let Some(n) = num_threads {
            if n == 0 {
                return Err(ComputeError::InvalidConfig("thread count must be at least 1".into()));
            }
            builder = builder.num_threads(n);
        }

        let pool = builder
            .build()
            .map_err(|e| ComputeError::BackendNotAvailable(format!("cpu thread pool: {e}")))?;
        debug!(threads = pool.current_num_threads(), "created cpu device");

        Ok(Self { pool })
    }
}

impl Device for CpuDevice {
    fn name(&self) -> &'static str {
        "CPU"
    }

    fn backend(&self) -> Backend {
        Backend::Cpu
    }

    fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn launch(&self, grid: WorkDim, group: WorkDim, kernel: &dyn GroupKernel) {
        let num_groups = grid.len();
        self.pool.install(|| {
            (0..num_groups)
                .into_par_iter()
                .for_each(|id| execute_group(kernel, id, grid, group));
        });
    }
}
