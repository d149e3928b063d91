//! Single-threaded backend.
//!
//! Executes groups in linear id order on the calling thread. Useful as a
//! reference when checking that a kernel does not depend on group scheduling.

use super::{Backend, Device, execute_group};
use crate::kernel::{GroupKernel, WorkDim};

/// Device that runs every group on the caller thread.
#[derive(Debug, Default)]
pub struct SerialDevice;

impl SerialDevice {
    pub fn new() -> Self {
        Self
    }
}

impl Device for SerialDevice {
    fn name(&self) -> &'static str {
        "Serial"
    }

    fn backend(&self) -> Backend {
        Backend::Serial
    }

    fn launch(&self, grid: WorkDim, group: WorkDim, kernel: &dyn GroupKernel) {
        for id in 0..grid.len() {
            execute_group(kernel, id, grid, group);
        }
    }
}
