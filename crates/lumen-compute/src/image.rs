//! Images in device memory.
//!
//! An [`Image`] is an [`ImageDesc`] placed over a [`Buffer`]. Host code fills
//! and inspects it with [`Image::set3`] / [`Image::get3`]; kernels read it
//! through an [`ImageAccessor`], a copyable strided view decoded to f32.

use std::marker::PhantomData;

use half::f16;
use lumen_core::{DataType, Element, ImageDesc};

use crate::buffer::{Buffer, DevicePtr};
use crate::engine::Engine;
use crate::{ComputeError, ComputeResult};

/// Image view over a buffer.
#[derive(Debug, Clone)]
pub struct Image {
    desc: ImageDesc,
    buffer: Buffer,
    byte_offset: usize,
}

impl Image {
    pub(crate) fn new(buffer: Buffer, desc: ImageDesc, byte_offset: usize) -> ComputeResult<Self> {
        buffer.check_range(byte_offset, desc.byte_size())?;
        Ok(Self {
            desc,
            buffer,
            byte_offset,
        })
    }

    #[inline]
    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.desc.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.desc.height()
    }

    #[inline]
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    #[inline]
    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    #[inline]
    pub fn engine(&self) -> &Engine {
        self.buffer.engine()
    }

    fn check_pixel(&self, h: usize, w: usize) -> ComputeResult<usize> {
        if h >= self.height() || w >= self.width() {
            return Err(ComputeError::OutOfRange {
                offset: h * self.width() + w,
                size: 1,
                capacity: self.desc.num_pixels(),
            });
        }
        Ok(self.byte_offset + self.desc.pixel_offset(h, w))
    }

    /// Write the first three channels of pixel `(h, w)`.
    pub fn set3(&self, h: usize, w: usize, rgb: [f32; 3]) -> ComputeResult<()> {
        let offset = self.check_pixel(h, w)?;
        match self.desc.format().data_type() {
            DataType::F32 => {
                let bytes: [u8; 12] = bytemuck::cast(rgb);
                self.buffer.write(offset, &bytes)
            }
            DataType::F16 => {
                let bits = rgb.map(|v| f16::from_f32(v).to_bits());
                self.buffer.write(offset, bytemuck::bytes_of(&bits))
            }
            DataType::U8 => self.buffer.write(offset, &rgb.map(u8::from_f32)),
        }
    }

    /// Read the first three channels of pixel `(h, w)`.
    pub fn get3(&self, h: usize, w: usize) -> ComputeResult<[f32; 3]> {
        let offset = self.check_pixel(h, w)?;
        match self.desc.format().data_type() {
            DataType::F32 => {
                let mut bytes = [0u8; 12];
                self.buffer.read(offset, &mut bytes)?;
                Ok(bytemuck::cast(bytes))
            }
            DataType::F16 => {
                let mut bytes = [0u8; 6];
                self.buffer.read(offset, &mut bytes)?;
                let bits: [u16; 3] = bytemuck::cast(bytes);
                Ok(bits.map(|b| f16::from_bits(b).to_f32()))
            }
            DataType::U8 => {
                let mut bytes = [0u8; 3];
                self.buffer.read(offset, &mut bytes)?;
                Ok(bytes.map(Element::to_f32))
            }
        }
    }

    /// Set every pixel to `rgb`.
    pub fn fill(&self, rgb: [f32; 3]) -> ComputeResult<()> {
        self.fill_with(|_, _| rgb)
    }

    /// Set every pixel to `f(h, w)`.
    pub fn fill_with(&self, mut f: impl FnMut(usize, usize) -> [f32; 3]) -> ComputeResult<()> {
        for h in 0..self.height() {
            for w in 0..self.width() {
                self.set3(h, w, f(h, w))?;
            }
        }
        Ok(())
    }

    /// Kernel-side view decoding channels of type `T`.
    ///
    /// Returns [`ComputeError::UnsupportedFormat`] if `T` does not match the
    /// image's element type.
    pub fn accessor<T: Element>(&self) -> ComputeResult<ImageAccessor<T>> {
        let data_type = self.desc.format().data_type();
        if data_type != T::DATA_TYPE {
            return Err(ComputeError::UnsupportedFormat(data_type));
        }
        Ok(ImageAccessor {
            // SAFETY: byte_offset was range checked on creation.
            ptr: unsafe { self.buffer.ptr::<u8>().byte_add(self.byte_offset) },
            height: self.height(),
            width: self.width(),
            row_byte_stride: self.desc.row_byte_stride(),
            pixel_byte_stride: self.desc.pixel_byte_stride(),
            _marker: PhantomData,
        })
    }
}

/// Strided read access to an image from kernels.
#[derive(Debug)]
pub struct ImageAccessor<T> {
    ptr: DevicePtr<u8>,
    height: usize,
    width: usize,
    row_byte_stride: usize,
    pixel_byte_stride: usize,
    _marker: PhantomData<T>,
}

impl<T> Clone for ImageAccessor<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ImageAccessor<T> {}

impl<T: Element> ImageAccessor<T> {
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// First three channels of pixel `(h, w)` as f32.
    #[inline]
    pub fn get3(&self, h: usize, w: usize) -> [f32; 3] {
        assert!(h < self.height && w < self.width, "pixel ({h}, {w}) out of bounds");
        let offset = h * self.row_byte_stride + w * self.pixel_byte_stride;
        // SAFETY: (h, w) is in bounds and the image's buffer outlives the launch.
        unsafe {
            let px = self.ptr.byte_add(offset).cast::<T>();
            [px.read(0).to_f32(), px.read(1).to_f32(), px.read(2).to_f32()]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Backend, EngineConfig, Storage};
    use approx::assert_relative_eq;
    use lumen_core::ImageFormat;

    fn engine() -> Engine {
        Engine::new(EngineConfig::default().with_backend(Backend::Serial)).unwrap()
    }

    #[test]
    fn test_set_get_float4() {
        let engine = engine();
        let desc = ImageDesc::new(ImageFormat::Float4, 3, 2);
        let img = engine.new_image(desc, Storage::Host).unwrap();
        img.set3(1, 2, [0.1, 0.2, 0.3]).unwrap();
        assert_eq!(img.get3(1, 2).unwrap(), [0.1, 0.2, 0.3]);
        assert!(img.get3(2, 0).is_err());
    }

    #[test]
    fn test_half_roundtrip_via_accessor() {
        let engine = engine();
        let desc = ImageDesc::new(ImageFormat::Half3, 4, 4);
        let img = engine.new_image(desc, Storage::Host).unwrap();
        img.fill_with(|h, w| [h as f32 * 0.25, w as f32 * 0.25, 1.0]).unwrap();

        let acc = img.accessor::<f16>().unwrap();
        assert_eq!(acc.get3(3, 2), [0.75, 0.5, 1.0]);
        assert!(img.accessor::<f32>().is_err());
    }

    #[test]
    fn test_padded_rows() {
        let engine = engine();
        let desc = ImageDesc::with_strides(ImageFormat::Float3, 2, 2, 16, 64).unwrap();
        let img = engine.new_image(desc, Storage::Host).unwrap();
        img.fill([0.5, 0.25, 0.125]).unwrap();

        let acc = img.accessor::<f32>().unwrap();
        assert_eq!(acc.get3(1, 1), [0.5, 0.25, 0.125]);
    }

    #[test]
    fn test_uchar_normalized() {
        let engine = engine();
        let desc = ImageDesc::new(ImageFormat::UChar3, 1, 1);
        let img = engine.new_image(desc, Storage::Host).unwrap();
        img.set3(0, 0, [1.0, 0.5, 0.0]).unwrap();
        let px = img.get3(0, 0).unwrap();
        assert_eq!(px[0], 1.0);
        assert_relative_eq!(px[1], 128.0 / 255.0);
    }

    #[test]
    fn test_image_at_offset() {
        let engine = engine();
        let desc = ImageDesc::new(ImageFormat::Float3, 2, 1);
        let buffer = engine.new_buffer(64, Storage::Host).unwrap();
        let img = engine.new_image_at(&buffer, desc, 40).unwrap();
        img.set3(0, 1, [2.0, 3.0, 4.0]).unwrap();

        let mut raw = [0u8; 4];
        buffer.read(40 + 12, &mut raw).unwrap();
        assert_eq!(f32::from_ne_bytes(raw), 2.0);
        assert!(engine.new_image_at(&buffer, desc, 48).is_err());
    }
}
