//! Autoexposure: one exposure scalar per image.
//!
//! The op maps the geometric mean luminance of an image to middle gray:
//! `exposure = KEY / 2^(mean(log2 L))`, where `L` runs over 16x16 tile
//! averages and tiles darker than [`EPS`] are ignored.
//!
//! # Scratch layout
//!
//! The caller provides scratch memory of [`Autoexposure::scratch_byte_size`]
//! bytes, laid out as:
//!
//! ```text
//! [ bins: f32 x num_bins | sums: f32 x num_groups | counts: u32 x num_groups ]
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let mut ae = engine.new_autoexposure(image.desc())?;
//! let scratch = engine.new_scratch_buffer(ae.scratch_byte_size())?;
//! ae.set_scratch(engine.new_tensor_at(&scratch, ae.scratch_desc(), 0)?)?;
//! ae.set_src(image)?;
//! ae.run()?;
//! let exposure = ae.read_result()?;
//! ```

mod kernels;

use half::f16;
use lumen_core::{DataType, Element, ImageDesc, ceil_div};
use tracing::trace;

use crate::buffer::{Buffer, DevicePtr, Storage};
use crate::engine::Engine;
use crate::image::Image;
use crate::tensor::{Tensor, TensorDesc};
use crate::{ComputeError, ComputeResult};

use kernels::{DownsampleKernel, ReduceFinalKernel, ReduceKernel};

/// Largest tile edge in pixels.
pub const MAX_BIN_SIZE: usize = 16;
/// Target middle-gray luminance.
pub const KEY: f32 = 0.18;
/// Tiles at or below this luminance do not contribute.
pub const EPS: f32 = 1e-8;
/// Workers per group of the reduce stages.
pub const GROUP_SIZE: usize = 1024;
/// Result when no tile is brighter than [`EPS`].
pub const NEUTRAL_EXPOSURE: f32 = 1.0;

/// Bin and group counts for one image size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinGrid {
    pub num_bins_h: usize,
    pub num_bins_w: usize,
    pub num_bins: usize,
    pub num_groups: usize,
}

impl BinGrid {
    pub fn new(desc: &ImageDesc) -> Self {
        let num_bins_h = ceil_div(desc.height(), MAX_BIN_SIZE);
        let num_bins_w = ceil_div(desc.width(), MAX_BIN_SIZE);
        let num_bins = num_bins_h * num_bins_w;
        let num_groups = ceil_div(num_bins, GROUP_SIZE).min(GROUP_SIZE);
        Self {
            num_bins_h,
            num_bins_w,
            num_bins,
            num_groups,
        }
    }

    /// Bytes of scratch memory the three stages need.
    pub fn scratch_byte_size(&self) -> usize {
        self.num_bins * size_of::<f32>() + self.num_groups * (size_of::<f32>() + size_of::<u32>())
    }

    #[inline]
    fn sums_offset(&self) -> usize {
        self.num_bins * size_of::<f32>()
    }

    #[inline]
    fn counts_offset(&self) -> usize {
        self.sums_offset() + self.num_groups * size_of::<f32>()
    }
}

/// Exposure estimation for images of one fixed size.
///
/// Source and scratch are bound separately and may be rebound between runs.
/// The result stays in device memory until the next [`run`](Self::run).
#[derive(Debug)]
pub struct Autoexposure {
    engine: Engine,
    src_desc: ImageDesc,
    grid: BinGrid,
    src: Option<Image>,
    scratch: Option<Tensor>,
    result: Buffer,
    has_result: bool,
}

impl Autoexposure {
    pub(crate) fn new(engine: &Engine, src_desc: &ImageDesc) -> ComputeResult<Self> {
        if src_desc.width() == 0 || src_desc.height() == 0 {
            return Err(lumen_core::Error::invalid_dimensions(
                src_desc.width(),
                src_desc.height(),
                "autoexposure needs a non-empty image",
            )
            .into());
        }
        let grid = BinGrid::new(src_desc);
        let result = engine.new_buffer(size_of::<f32>(), Storage::Device)?;
        trace!(
            bins_h = grid.num_bins_h,
            bins_w = grid.num_bins_w,
            groups = grid.num_groups,
            "created autoexposure"
        );
        Ok(Self {
            engine: engine.clone(),
            src_desc: *src_desc,
            grid,
            src: None,
            scratch: None,
            result,
            has_result: false,
        })
    }

    /// Descriptor every bound source must match in size.
    #[inline]
    pub fn src_desc(&self) -> &ImageDesc {
        &self.src_desc
    }

    #[inline]
    pub fn grid(&self) -> &BinGrid {
        &self.grid
    }

    /// Bind the source image. Its width and height must match [`src_desc`](Self::src_desc).
    pub fn set_src(&mut self, src: Image) -> ComputeResult<()> {
        if !src.desc().same_size(&self.src_desc) {
            return Err(ComputeError::DimensionMismatch {
                expected: (self.src_desc.width(), self.src_desc.height()),
                actual: (src.width(), src.height()),
            });
        }
        if !src.engine().same_engine(&self.engine) {
            return Err(ComputeError::EngineMismatch);
        }
        self.src = Some(src);
        Ok(())
    }

    #[inline]
    pub fn src(&self) -> Option<&Image> {
        self.src.as_ref()
    }

    /// Scratch bytes a bound tensor must at least provide.
    #[inline]
    pub fn scratch_byte_size(&self) -> usize {
        self.grid.scratch_byte_size()
    }

    /// Flat descriptor covering exactly [`scratch_byte_size`](Self::scratch_byte_size) bytes.
    pub fn scratch_desc(&self) -> TensorDesc {
        TensorDesc::x(self.scratch_byte_size() / size_of::<f32>(), DataType::F32)
    }

    /// Bind scratch memory. No allocation happens here.
    pub fn set_scratch(&mut self, scratch: Tensor) -> ComputeResult<()> {
        if scratch.byte_size() < self.scratch_byte_size() {
            return Err(ComputeError::ScratchTooSmall {
                required: self.scratch_byte_size(),
                actual: scratch.byte_size(),
            });
        }
        if !scratch.engine().same_engine(&self.engine) {
            return Err(ComputeError::EngineMismatch);
        }
        self.scratch = Some(scratch);
        Ok(())
    }

    #[inline]
    pub fn scratch(&self) -> Option<&Tensor> {
        self.scratch.as_ref()
    }

    /// Compute the exposure of the bound source.
    ///
    /// A failed run leaves no result behind.
    pub fn run(&mut self) -> ComputeResult<()> {
        self.has_result = false;
        let src = self.src.as_ref().ok_or(ComputeError::NotReady("source image"))?;
        let scratch = self.scratch.as_ref().ok_or(ComputeError::NotReady("scratch"))?;

        match src.desc().format().data_type() {
            DataType::F32 => self.run_kernels::<f32>(src, scratch)?,
            DataType::F16 => self.run_kernels::<f16>(src, scratch)?,
            other => return Err(ComputeError::UnsupportedFormat(other)),
        }
        self.has_result = true;
        Ok(())
    }

    fn run_kernels<T: Element>(&self, src: &Image, scratch: &Tensor) -> ComputeResult<()> {
        let grid = &self.grid;
        let base = scratch.data_ptr::<u8>();
        // SAFETY: scratch holds at least scratch_byte_size() bytes, checked in set_scratch.
        let (bins, sums, counts) = unsafe {
            (
                base.cast::<f32>(),
                base.byte_add(grid.sums_offset()).cast::<f32>(),
                base.byte_add(grid.counts_offset()).cast::<u32>(),
            )
        };

        trace!(
            grid = ?(grid.num_bins_h, grid.num_bins_w),
            group = ?(MAX_BIN_SIZE, MAX_BIN_SIZE),
            "downsample"
        );
        let downsample = DownsampleKernel {
            src: src.accessor::<T>()?,
            bins,
        };
        self.engine.run_kernel(
            (grid.num_bins_h, grid.num_bins_w),
            (MAX_BIN_SIZE, MAX_BIN_SIZE),
            &downsample,
        );

        trace!(grid = grid.num_groups, group = GROUP_SIZE, "reduce");
        let reduce = ReduceKernel {
            bins,
            size: grid.num_bins,
            sums,
            counts,
        };
        self.engine.run_kernel(grid.num_groups, GROUP_SIZE, &reduce);

        trace!(grid = 1, group = GROUP_SIZE, "reduce final");
        let reduce_final = ReduceFinalKernel {
            sums,
            counts,
            size: grid.num_groups,
            dst: sums,
        };
        self.engine.run_kernel(1, GROUP_SIZE, &reduce_final);

        // SAFETY: both ranges hold one f32.
        unsafe {
            self.engine.memcpy(
                self.result.ptr::<u8>().as_ptr(),
                sums.cast::<u8>().as_ptr(),
                size_of::<f32>(),
            );
        }
        Ok(())
    }

    /// Device pointer to the exposure of the last run.
    pub fn result(&self) -> ComputeResult<DevicePtr<f32>> {
        if !self.has_result {
            return Err(ComputeError::NotReady("result"));
        }
        Ok(self.result.ptr())
    }

    /// Wait for the last run and copy its exposure to the host.
    pub fn read_result(&self) -> ComputeResult<f32> {
        if !self.has_result {
            return Err(ComputeError::NotReady("result"));
        }
        self.engine.wait();
        let mut raw = [0u8; 4];
        self.result.read(0, &mut raw)?;
        Ok(bytemuck::pod_read_unaligned(&raw))
    }
}
