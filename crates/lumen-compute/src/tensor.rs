//! Typed, shaped views over buffers.
//!
//! A [`Tensor`] does not own memory. It pairs a [`TensorDesc`] with a
//! [`Buffer`] and a byte offset; any number of tensors may alias the same
//! buffer, and they read and write the very same bytes.

use half::f16;
use lumen_core::{DataType, Element};

use crate::buffer::{Buffer, DevicePtr};
use crate::engine::Engine;
use crate::{ComputeError, ComputeResult};

/// Dimension order of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TensorLayout {
    /// Flat 1-D array.
    #[default]
    X,
    /// Channels, height, width.
    Chw,
    /// Height, width, channels.
    Hwc,
}

impl TensorLayout {
    /// Rank implied by the layout.
    pub const fn rank(&self) -> usize {
        match self {
            Self::X => 1,
            Self::Chw | Self::Hwc => 3,
        }
    }
}

/// Shape, layout and element type of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorDesc {
    pub dims: Vec<usize>,
    pub layout: TensorLayout,
    pub data_type: DataType,
}

impl TensorDesc {
    pub fn new(dims: Vec<usize>, layout: TensorLayout, data_type: DataType) -> Self {
        debug_assert_eq!(dims.len(), layout.rank(), "rank does not match layout {layout:?}");
        Self { dims, layout, data_type }
    }

    /// Flat 1-D descriptor of `len` elements.
    pub fn x(len: usize, data_type: DataType) -> Self {
        Self::new(vec![len], TensorLayout::X, data_type)
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    #[inline]
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    #[inline]
    pub fn byte_size(&self) -> usize {
        self.num_elements() * self.data_type.size()
    }
}

/// View of `desc` over `buffer`, starting at `byte_offset`.
#[derive(Debug, Clone)]
pub struct Tensor {
    desc: TensorDesc,
    buffer: Buffer,
    byte_offset: usize,
}

impl Tensor {
    pub(crate) fn new(buffer: Buffer, desc: TensorDesc, byte_offset: usize) -> ComputeResult<Self> {
        buffer.check_range(byte_offset, desc.byte_size())?;
        Ok(Self {
            desc,
            buffer,
            byte_offset,
        })
    }

    #[inline]
    pub fn desc(&self) -> &TensorDesc {
        &self.desc
    }

    #[inline]
    pub fn dims(&self) -> &[usize] {
        &self.desc.dims
    }

    #[inline]
    pub fn data_type(&self) -> DataType {
        self.desc.data_type
    }

    #[inline]
    pub fn byte_size(&self) -> usize {
        self.desc.byte_size()
    }

    #[inline]
    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    /// Buffer this tensor views.
    #[inline]
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    #[inline]
    pub fn engine(&self) -> &Engine {
        self.buffer.engine()
    }

    /// Pointer to the first element.
    #[inline]
    pub fn data_ptr<T>(&self) -> DevicePtr<T> {
        // SAFETY: byte_offset was range checked against the buffer on creation.
        unsafe { self.buffer.ptr::<u8>().byte_add(self.byte_offset).cast() }
    }

    fn element_offset(&self, index: usize) -> ComputeResult<usize> {
        let len = self.desc.num_elements();
        if index >= len {
            return Err(ComputeError::OutOfRange {
                offset: index,
                size: 1,
                capacity: len,
            });
        }
        Ok(self.byte_offset + index * self.data_type().size())
    }

    /// Read element `index` as f32.
    pub fn get(&self, index: usize) -> ComputeResult<f32> {
        let offset = self.element_offset(index)?;
        let mut raw = [0u8; 4];
        let raw = &mut raw[..self.data_type().size()];
        self.buffer.read(offset, raw)?;

        Ok(match self.data_type() {
            DataType::F32 => bytemuck::pod_read_unaligned::<f32>(raw),
            DataType::F16 => f16::from_bits(bytemuck::pod_read_unaligned::<u16>(raw)).to_f32(),
            DataType::U8 => raw[0].to_f32(),
        })
    }

    /// Write element `index`, converting from f32.
    pub fn set(&self, index: usize, value: f32) -> ComputeResult<()> {
        let offset = self.element_offset(index)?;
        match self.data_type() {
            DataType::F32 => self.buffer.write(offset, bytemuck::bytes_of(&value)),
            DataType::F16 => {
                self.buffer.write(offset, bytemuck::bytes_of(&f16::from_f32(value).to_bits()))
            }
            DataType::U8 => self.buffer.write(offset, &[u8::from_f32(value)]),
        }
    }

    /// Copy all elements to the host as f32.
    pub fn to_vec_f32(&self) -> ComputeResult<Vec<f32>> {
        (0..self.desc.num_elements()).map(|i| self.get(i)).collect()
    }

    /// Fill every element with `value`.
    pub fn fill(&self, value: f32) -> ComputeResult<()> {
        for i in 0..self.desc.num_elements() {
            self.set(i, value)?;
        }
        Ok(())
    }
}
