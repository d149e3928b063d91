//! Image descriptors.
//!
//! [`ImageDesc`] is the "header" of an image: everything needed to interpret
//! raw pixel bytes held in device memory.
//!
//! # Memory Layout
//!
//! Pixels are addressed by byte strides, row-major, top-to-bottom:
//!
//! ```text
//! byte offset of (h, w) = h * row_byte_stride + w * pixel_byte_stride
//! ```
//!
//! Packed images use `pixel_byte_stride = format.byte_size()` and
//! `row_byte_stride = width * pixel_byte_stride`.
//!
//! # Usage
//!
//! ```rust
//! use lumen_core::{ImageDesc, ImageFormat};
//!
//! let desc = ImageDesc::new(ImageFormat::Float3, 1920, 1080);
//! assert_eq!(desc.pixel_byte_stride(), 12);
//! assert_eq!(desc.byte_size(), 1920 * 1080 * 12);
//! ```

use crate::{Error, ImageFormat, Result};

/// Dimensions, pixel format and strides of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageDesc {
    width: usize,
    height: usize,
    format: ImageFormat,
    pixel_byte_stride: usize,
    row_byte_stride: usize,
}

impl ImageDesc {
    /// Creates a packed descriptor.
    pub fn new(format: ImageFormat, width: usize, height: usize) -> Self {
        let pixel_byte_stride = format.byte_size();
        Self {
            width,
            height,
            format,
            pixel_byte_stride,
            row_byte_stride: width * pixel_byte_stride,
        }
    }

    /// Creates a descriptor with explicit strides.
    ///
    /// Strides of zero select the packed default.
    pub fn with_strides(
        format: ImageFormat,
        width: usize,
        height: usize,
        pixel_byte_stride: usize,
        row_byte_stride: usize,
    ) -> Result<Self> {
        let pixel_byte_stride = if pixel_byte_stride == 0 {
            format.byte_size()
        } else {
            pixel_byte_stride
        };
        if pixel_byte_stride < format.byte_size() {
            return Err(Error::InvalidStride {
                stride: pixel_byte_stride,
                min_stride: format.byte_size(),
            });
        }

        let min_row = width
            .checked_mul(pixel_byte_stride)
            .ok_or_else(|| Error::invalid_dimensions(width, height, "row size overflows"))?;
        let row_byte_stride = if row_byte_stride == 0 { min_row } else { row_byte_stride };
        if row_byte_stride < min_row {
            return Err(Error::InvalidStride {
                stride: row_byte_stride,
                min_stride: min_row,
            });
        }

        Ok(Self {
            width,
            height,
            format,
            pixel_byte_stride,
            row_byte_stride,
        })
    }

    /// Image width in pixels.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Image height in pixels.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Pixel format.
    #[inline]
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Distance in bytes between horizontally adjacent pixels.
    #[inline]
    pub fn pixel_byte_stride(&self) -> usize {
        self.pixel_byte_stride
    }

    /// Distance in bytes between vertically adjacent pixels.
    #[inline]
    pub fn row_byte_stride(&self) -> usize {
        self.row_byte_stride
    }

    /// Total pixel count.
    #[inline]
    pub fn num_pixels(&self) -> usize {
        self.width * self.height
    }

    /// Byte offset of pixel `(h, w)`.
    #[inline]
    pub fn pixel_offset(&self, h: usize, w: usize) -> usize {
        h * self.row_byte_stride + w * self.pixel_byte_stride
    }

    /// Number of bytes spanned by the image, from the first to the end of the last pixel.
    pub fn byte_size(&self) -> usize {
        if self.width == 0 || self.height == 0 {
            return 0;
        }
        self.pixel_offset(self.height - 1, self.width - 1) + self.format.byte_size()
    }

    /// Whether two descriptors have the same width and height.
    #[inline]
    pub fn same_size(&self, other: &ImageDesc) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Returns a copy with a different format (packed strides).
    pub fn with_format(&self, format: ImageFormat) -> Self {
        Self::new(format, self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_strides() {
        let desc = ImageDesc::new(ImageFormat::Half4, 10, 3);
        assert_eq!(desc.pixel_byte_stride(), 8);
        assert_eq!(desc.row_byte_stride(), 80);
        assert_eq!(desc.byte_size(), 240);
        assert_eq!(desc.pixel_offset(1, 2), 96);
    }

    #[test]
    fn test_padded_rows() {
        let desc = ImageDesc::with_strides(ImageFormat::Float3, 4, 2, 16, 128).unwrap();
        assert_eq!(desc.pixel_byte_stride(), 16);
        // last pixel starts at 128 + 48
        assert_eq!(desc.byte_size(), 128 + 48 + 12);
    }

    #[test]
    fn test_stride_too_small() {
        let err = ImageDesc::with_strides(ImageFormat::Float3, 4, 2, 8, 0);
        assert!(matches!(err, Err(Error::InvalidStride { min_stride: 12, .. })));
    }

    #[test]
    fn test_empty_image() {
        assert_eq!(ImageDesc::new(ImageFormat::Float3, 0, 5).byte_size(), 0);
    }

    #[test]
    fn test_same_size_ignores_format() {
        let a = ImageDesc::new(ImageFormat::Float3, 32, 32);
        let b = a.with_format(ImageFormat::Half3);
        assert!(a.same_size(&b));
        assert_ne!(a, b);
    }
}
