//! The three reduction stages of autoexposure.
//!
//! ```text
//! image --Downsample--> bins[num_bins]          (average luminance per tile)
//!       --Reduce------> sums/counts[num_groups] (log2 sum and count of lit bins)
//!       --ReduceFinal-> dst[0]                  (KEY / 2^(sum / count))
//! ```

use lumen_core::{Element, luminance_rec709, sanitize_rgb};
use tracing::debug;

use super::{EPS, KEY, NEUTRAL_EXPOSURE};
use crate::buffer::DevicePtr;
use crate::image::ImageAccessor;
use crate::kernel::{GroupKernel, WorkGroup, reduce_group};

fn add_pair(a: (f32, u32), b: (f32, u32)) -> (f32, u32) {
    (a.0 + b.0, a.1 + b.1)
}

/// One group per bin: averages the sanitized luminance of its tile.
///
/// Tiles partition the image evenly, `begin = group_id * H / group_range`,
/// so every tile has between 1 and 16 rows and columns.
pub(crate) struct DownsampleKernel<T> {
    pub src: ImageAccessor<T>,
    pub bins: DevicePtr<f32>,
}

impl<T: Element> GroupKernel for DownsampleKernel<T> {
    fn run_group(&self, group: &mut WorkGroup) {
        let (height, width) = (self.src.height(), self.src.width());
        let begin_h = group.group_id(0) * height / group.group_range(0);
        let begin_w = group.group_id(1) * width / group.group_range(1);
        let end_h = (group.group_id(0) + 1) * height / group.group_range(0);
        let end_w = (group.group_id(1) + 1) * width / group.group_range(1);

        let mut sums = group.local_array::<f32>(group.size());
        group.for_each_item(|item| {
            let h = begin_h + item.local_id(0);
            let w = begin_w + item.local_id(1);
            sums[item.local_linear_id()] = if h < end_h && w < end_w {
                luminance_rec709(sanitize_rgb(self.src.get3(h, w)))
            } else {
                0.0
            };
        });

        reduce_group(group, &mut sums, |a, b| a + b);

        let count = ((end_h - begin_h) * (end_w - begin_w)) as f32;
        group.leader(|item| {
            // SAFETY: one bin per group, bins sized num_bins.
            unsafe { self.bins.write(item.group_linear_id(), sums[0] / count) };
        });
    }
}

/// Grid-stride pass over the bins: per group, the sum of `log2(L)` and the
/// number of bins with `L > EPS`.
pub(crate) struct ReduceKernel {
    pub bins: DevicePtr<f32>,
    pub size: usize,
    pub sums: DevicePtr<f32>,
    pub counts: DevicePtr<u32>,
}

impl GroupKernel for ReduceKernel {
    fn run_group(&self, group: &mut WorkGroup) {
        let mut locals = group.local_array::<(f32, u32)>(group.size());
        group.for_each_item(|item| {
            let mut sum = 0.0f32;
            let mut count = 0u32;
            let mut i = item.global_id();
            while i < self.size {
                // SAFETY: i < size; bins are read-only in this stage.
                let l = unsafe { self.bins.read(i) };
                if l > EPS {
                    sum += l.log2();
                    count += 1;
                }
                i += item.global_range();
            }
            locals[item.local_linear_id()] = (sum, count);
        });

        reduce_group(group, &mut locals, add_pair);

        group.leader(|item| {
            let (sum, count) = locals[0];
            let g = item.group_linear_id();
            // SAFETY: one slot per group.
            unsafe {
                self.sums.write(g, sum);
                self.counts.write(g, count);
            }
        });
    }
}

/// Single group: folds the per-group partials into the exposure scalar.
pub(crate) struct ReduceFinalKernel {
    pub sums: DevicePtr<f32>,
    pub counts: DevicePtr<u32>,
    pub size: usize,
    pub dst: DevicePtr<f32>,
}

impl GroupKernel for ReduceFinalKernel {
    fn run_group(&self, group: &mut WorkGroup) {
        let mut locals = group.local_array::<(f32, u32)>(group.size());
        group.for_each_item(|item| {
            let id = item.local_linear_id();
            locals[id] = if id < self.size {
                // SAFETY: id < size.
                unsafe { (self.sums.read(id), self.counts.read(id)) }
            } else {
                (0.0, 0)
            };
        });

        reduce_group(group, &mut locals, add_pair);

        group.leader(|_| {
            let (sum, count) = locals[0];
            let exposure = if count == 0 {
                debug!("no lit bins, using neutral exposure");
                NEUTRAL_EXPOSURE
            } else {
                KEY / (sum / count as f32).exp2()
            };
            // SAFETY: dst may alias sums[0], which was consumed in the first phase.
            unsafe { self.dst.write(0, exposure) };
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::WorkDim;
    use approx::assert_relative_eq;

    fn run<K: GroupKernel>(grid: impl Into<WorkDim>, group: impl Into<WorkDim>, kernel: &K) {
        let grid = grid.into();
        let group = group.into();
        for id in 0..grid.len() {
            crate::backend::execute_group(kernel, id, grid, group);
        }
    }

    #[test]
    fn test_reduce_skips_dark_bins() {
        let mut bins = vec![0.0f32; 3000];
        bins[10] = 0.5;
        bins[2999] = 2.0;
        bins[1500] = 1e-9;
        let mut sums = vec![0.0f32; 3];
        let mut counts = vec![0u32; 3];

        let kernel = ReduceKernel {
            bins: DevicePtr::new(bins.as_mut_ptr()),
            size: bins.len(),
            sums: DevicePtr::new(sums.as_mut_ptr()),
            counts: DevicePtr::new(counts.as_mut_ptr()),
        };
        run(3, 1024, &kernel);

        assert_eq!(counts.iter().sum::<u32>(), 2);
        assert_relative_eq!(sums.iter().sum::<f32>(), 0.0);
    }

    #[test]
    fn test_final_ignores_padding() {
        let mut sums = vec![-1.0f32, -1.0, 99.0];
        let mut counts = vec![1u32, 1, 99];
        let mut dst = 0.0f32;

        let kernel = ReduceFinalKernel {
            sums: DevicePtr::new(sums.as_mut_ptr()),
            counts: DevicePtr::new(counts.as_mut_ptr()),
            size: 2,
            dst: DevicePtr::new(&mut dst),
        };
        run(1, 1024, &kernel);
        assert_relative_eq!(dst, 0.36, epsilon = 1e-6);
    }

    #[test]
    fn test_final_zero_count_is_neutral() {
        let mut sums = vec![0.0f32];
        let mut counts = vec![0u32];
        let mut dst = 0.0f32;

        let kernel = ReduceFinalKernel {
            sums: DevicePtr::new(sums.as_mut_ptr()),
            counts: DevicePtr::new(counts.as_mut_ptr()),
            size: 1,
            dst: DevicePtr::new(&mut dst),
        };
        run(1, 1024, &kernel);
        assert_eq!(dst, NEUTRAL_EXPOSURE);
    }
}
