//! Group-parallel kernel launch abstraction.
//!
//! A launch runs a grid of independent work groups. Workers inside a group
//! cooperate through group-local arrays and barriers. Kernels are written
//! against [`WorkGroup`] as a sequence of phases:
//!
//! ```text
//! group.for_each_item(|item| ...)   // phase 0: every worker
//! group.barrier()
//! group.for_each_item(|item| ...)   // phase 1: sees all phase-0 writes
//! ```
//!
//! A worker may only read a neighbour's local value in a later phase than the
//! one that wrote it, which is exactly the guarantee a hardware barrier gives.
//! Backends decide how groups are scheduled; a group itself always executes
//! on one thread.
//!
//! Ids are row-major: the last dimension varies fastest, so for a 2-D group
//! `local_linear_id = local_id(0) * local_range(1) + local_id(1)`.

use std::ops::{Deref, DerefMut};

/// Maximum number of launch dimensions.
pub const MAX_DIMS: usize = 3;

/// Extent of a grid or group, up to three dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkDim {
    dims: [usize; MAX_DIMS],
    rank: usize,
}

impl WorkDim {
    /// Build from up to [`MAX_DIMS`] extents.
    pub fn new(extents: &[usize]) -> Self {
        assert!(
            !extents.is_empty() && extents.len() <= MAX_DIMS,
            "work dimension rank must be 1..={MAX_DIMS}"
        );
        let mut dims = [1; MAX_DIMS];
        dims[..extents.len()].copy_from_slice(extents);
        Self { dims, rank: extents.len() }
    }

    /// Number of dimensions.
    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Extent of dimension `d` (1 beyond the rank).
    #[inline]
    pub fn get(&self, d: usize) -> usize {
        if d < self.rank { self.dims[d] } else { 1 }
    }

    /// Total element count.
    #[inline]
    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Splits a linear index into per-dimension ids.
    #[inline]
    pub fn unflatten(&self, mut linear: usize) -> [usize; MAX_DIMS] {
        let mut id = [0; MAX_DIMS];
        for d in (0..MAX_DIMS).rev() {
            id[d] = linear % self.dims[d];
            linear /= self.dims[d];
        }
        id
    }
}

impl From<usize> for WorkDim {
    fn from(x: usize) -> Self {
        Self::new(&[x])
    }
}

impl From<(usize, usize)> for WorkDim {
    fn from((x, y): (usize, usize)) -> Self {
        Self::new(&[x, y])
    }
}

impl From<(usize, usize, usize)> for WorkDim {
    fn from((x, y, z): (usize, usize, usize)) -> Self {
        Self::new(&[x, y, z])
    }
}

impl<const N: usize> From<[usize; N]> for WorkDim {
    fn from(extents: [usize; N]) -> Self {
        Self::new(&extents)
    }
}

/// Ids of one worker within a launch.
#[derive(Debug, Clone, Copy)]
pub struct WorkItem {
    local_id: [usize; MAX_DIMS],
    local_linear_id: usize,
    group_id: [usize; MAX_DIMS],
    group_linear_id: usize,
    local_range: WorkDim,
    group_range: WorkDim,
}

impl WorkItem {
    #[inline]
    pub fn local_id(&self, d: usize) -> usize {
        self.local_id[d]
    }

    #[inline]
    pub fn local_linear_id(&self) -> usize {
        self.local_linear_id
    }

    #[inline]
    pub fn group_id(&self, d: usize) -> usize {
        self.group_id[d]
    }

    #[inline]
    pub fn group_linear_id(&self) -> usize {
        self.group_linear_id
    }

    #[inline]
    pub fn local_range(&self, d: usize) -> usize {
        self.local_range.get(d)
    }

    #[inline]
    pub fn group_range(&self, d: usize) -> usize {
        self.group_range.get(d)
    }

    /// Flat id across the whole launch.
    #[inline]
    pub fn global_id(&self) -> usize {
        self.group_linear_id * self.local_range.len() + self.local_linear_id
    }

    /// Flat number of workers in the launch.
    #[inline]
    pub fn global_range(&self) -> usize {
        self.group_range.len() * self.local_range.len()
    }
}

/// Execution context of one work group.
#[derive(Debug)]
pub struct WorkGroup {
    group_id: [usize; MAX_DIMS],
    group_linear_id: usize,
    group_range: WorkDim,
    local_range: WorkDim,
    phases: usize,
}

impl WorkGroup {
    pub(crate) fn new(group_linear_id: usize, group_range: WorkDim, local_range: WorkDim) -> Self {
        Self {
            group_id: group_range.unflatten(group_linear_id),
            group_linear_id,
            group_range,
            local_range,
            phases: 0,
        }
    }

    #[inline]
    pub fn group_id(&self, d: usize) -> usize {
        self.group_id[d]
    }

    #[inline]
    pub fn group_linear_id(&self) -> usize {
        self.group_linear_id
    }

    #[inline]
    pub fn group_range(&self, d: usize) -> usize {
        self.group_range.get(d)
    }

    #[inline]
    pub fn local_range(&self, d: usize) -> usize {
        self.local_range.get(d)
    }

    /// Workers per group.
    #[inline]
    pub fn size(&self) -> usize {
        self.local_range.len()
    }

    /// Number of barriers crossed so far.
    #[inline]
    pub fn phases(&self) -> usize {
        self.phases
    }

    fn item(&self, local_linear_id: usize) -> WorkItem {
        WorkItem {
            local_id: self.local_range.unflatten(local_linear_id),
            local_linear_id,
            group_id: self.group_id,
            group_linear_id: self.group_linear_id,
            local_range: self.local_range,
            group_range: self.group_range,
        }
    }

    /// Run one phase: `f` once for every worker of the group.
    pub fn for_each_item(&mut self, mut f: impl FnMut(WorkItem)) {
        for id in 0..self.size() {
            f(self.item(id));
        }
    }

    /// Run `f` as worker 0 only.
    pub fn leader(&mut self, f: impl FnOnce(WorkItem)) {
        f(self.item(0));
    }

    /// Full-group synchronization: ends the current phase.
    #[inline]
    pub fn barrier(&mut self) {
        self.phases += 1;
    }

    /// Allocate group-local storage, default-initialized.
    pub fn local_array<T: Copy + Default>(&self, len: usize) -> LocalArray<T> {
        LocalArray(vec![T::default(); len])
    }
}

/// Group-local array shared by all workers of one group.
#[derive(Debug, Clone)]
pub struct LocalArray<T>(Vec<T>);

impl<T> Deref for LocalArray<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

impl<T> DerefMut for LocalArray<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.0
    }
}

/// A kernel executed once per work group.
///
/// Groups of one launch may run concurrently on different threads and must
/// not communicate.
pub trait GroupKernel: Sync {
    fn run_group(&self, group: &mut WorkGroup);
}

/// Binary-tree reduction of `locals` into `locals[0]`.
///
/// Each round halves the active worker count; worker `i` combines its value
/// with the one at `i + active`, with a barrier before every round.
/// `locals.len()` must be a power of two no larger than the group size.
pub fn reduce_group<T: Copy>(group: &mut WorkGroup, locals: &mut [T], combine: impl Fn(T, T) -> T) {
    debug_assert!(locals.len().is_power_of_two());
    debug_assert!(locals.len() <= group.size());

    let mut active = locals.len() / 2;
    while active > 0 {
        group.barrier();
        group.for_each_item(|item| {
            let i = item.local_linear_id();
            if i < active {
                locals[i] = combine(locals[i], locals[i + active]);
            }
        });
        active >>= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_dim_len() {
        assert_eq!(WorkDim::from(7).len(), 7);
        assert_eq!(WorkDim::from((3, 4)).len(), 12);
        assert_eq!(WorkDim::from([2, 3, 4]).len(), 24);
        assert_eq!(WorkDim::from((3, 4)).get(2), 1);
    }

    #[test]
    fn test_unflatten_row_major() {
        let dim = WorkDim::from((3, 4));
        assert_eq!(dim.unflatten(0), [0, 0, 0]);
        assert_eq!(dim.unflatten(5), [1, 1, 0]);
        assert_eq!(dim.unflatten(11), [2, 3, 0]);
    }

    #[test]
    fn test_item_ids() {
        let mut group = WorkGroup::new(5, WorkDim::from((2, 3)), WorkDim::from((4, 4)));
        assert_eq!(group.group_id(0), 1);
        assert_eq!(group.group_id(1), 2);

        let mut seen = Vec::new();
        group.for_each_item(|item| {
            seen.push((item.local_id(0), item.local_id(1), item.global_id()));
        });
        assert_eq!(seen.len(), 16);
        assert_eq!(seen[0], (0, 0, 80));
        assert_eq!(seen[6], (1, 2, 86));
    }

    #[test]
    fn test_reduce_group_sum() {
        let mut group = WorkGroup::new(0, WorkDim::from(1), WorkDim::from(64));
        let mut locals = group.local_array::<u32>(64);
        group.for_each_item(|item| locals[item.local_linear_id()] = item.local_linear_id() as u32);
        reduce_group(&mut group, &mut locals, |a, b| a + b);

        assert_eq!(locals[0], 63 * 64 / 2);
        // log2(64) rounds, one barrier each
        assert_eq!(group.phases(), 6);
    }

    #[test]
    fn test_reduce_group_pairs() {
        let mut group = WorkGroup::new(0, WorkDim::from(1), WorkDim::from(8));
        let mut locals = group.local_array::<(f32, u32)>(8);
        group.for_each_item(|item| locals[item.local_linear_id()] = (0.5, 1));
        reduce_group(&mut group, &mut locals, |a, b| (a.0 + b.0, a.1 + b.1));
        assert_eq!(locals[0], (4.0, 8));
    }
}
