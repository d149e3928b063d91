//! Engine configuration.
//!
//! # Environment Variables
//!
//! - `LUMEN_BACKEND` - Backend to use (`auto`, `cpu`, `serial`)
//! - `LUMEN_THREADS` - Worker threads of the CPU backend
//! - `LUMEN_SCRATCH_MB` - Bytes the scratch pool keeps for reuse, in megabytes
//! - `LUMEN_MAX_ALLOC_MB` - Largest single allocation, in megabytes

use std::env;

use crate::backend::Backend;
use crate::backend::memory::default_scratch_budget;
use crate::{ComputeError, ComputeResult};

const MB: u64 = 1024 * 1024;

/// Engine configuration.
#[derive(Clone, Debug, Default)]
pub struct EngineConfig {
    /// Backend to create (Auto = best available).
    pub backend: Backend,
    /// CPU worker threads (None = one per core).
    pub num_threads: Option<usize>,
    /// Scratch pool budget in bytes (None = 25% of system memory).
    pub scratch_pool_budget: Option<u64>,
    /// Largest single allocation in bytes (None = unlimited).
    pub max_allocation: Option<u64>,
}

impl EngineConfig {
    /// Default config with environment overrides applied.
    pub fn from_env() -> ComputeResult<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Default config with overrides taken from `lookup`.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> ComputeResult<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("LUMEN_BACKEND") {
            config.backend = v.parse()?;
        }
        if let Some(v) = lookup("LUMEN_THREADS") {
            let n = parse_num(&v, "LUMEN_THREADS")?;
            if n == 0 {
                return Err(ComputeError::InvalidConfig("LUMEN_THREADS must be at least 1".into()));
            }
            config.num_threads = Some(n as usize);
        }
        if let Some(v) = lookup("LUMEN_SCRATCH_MB") {
            config.scratch_pool_budget = Some(parse_mb(&v, "LUMEN_SCRATCH_MB")?);
        }
        if let Some(v) = lookup("LUMEN_MAX_ALLOC_MB") {
            config.max_allocation = Some(parse_mb(&v, "LUMEN_MAX_ALLOC_MB")?);
        }

        Ok(config)
    }

    /// Select a backend.
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Set the CPU thread count.
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    /// Set the scratch pool budget in bytes.
    pub fn with_scratch_pool_budget(mut self, bytes: u64) -> Self {
        self.scratch_pool_budget = Some(bytes);
        self
    }

    /// Cap single allocations at `bytes`.
    pub fn with_max_allocation(mut self, bytes: u64) -> Self {
        self.max_allocation = Some(bytes);
        self
    }

    /// Effective scratch pool budget.
    pub fn scratch_pool_budget_bytes(&self) -> u64 {
        self.scratch_pool_budget.unwrap_or_else(default_scratch_budget)
    }
}

fn parse_num(value: &str, key: &str) -> ComputeResult<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| ComputeError::InvalidConfig(format!("{key}={value} is not a number")))
}

fn parse_mb(value: &str, key: &str) -> ComputeResult<u64> {
    parse_num(value, key)?
        .checked_mul(MB)
        .ok_or_else(|| ComputeError::InvalidConfig(format!("{key}={value} MB overflows u64")))
}
