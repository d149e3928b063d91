//! Element and pixel formats.
//!
//! # Types
//!
//! - [`DataType`] - Runtime element type of tensor/image data (F32, F16, U8)
//! - [`ImageFormat`] - Channel count plus element type of an interleaved image
//!
//! # Usage
//!
//! ```rust
//! use lumen_core::format::{DataType, ImageFormat};
//!
//! let fmt = ImageFormat::Half3;
//! assert_eq!(fmt.data_type(), DataType::F16);
//! assert_eq!(fmt.channels(), 3);
//! assert_eq!(fmt.byte_size(), 6);
//! ```

use std::fmt;

/// Runtime element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    /// 32-bit single-precision float.
    #[default]
    F32,
    /// 16-bit half-precision float.
    F16,
    /// 8-bit unsigned integer.
    U8,
}

impl DataType {
    /// Number of bytes per element.
    #[inline]
    pub const fn size(&self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F16 => 2,
            Self::U8 => 1,
        }
    }

    /// Whether this is a floating-point type.
    #[inline]
    pub const fn is_float(&self) -> bool {
        matches!(self, Self::F32 | Self::F16)
    }

    /// Short lowercase name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::F16 => "f16",
            Self::U8 => "u8",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Interleaved pixel format of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageFormat {
    /// RGB, 32-bit float per channel.
    #[default]
    Float3,
    /// RGBA, 32-bit float per channel.
    Float4,
    /// RGB, 16-bit float per channel.
    Half3,
    /// RGBA, 16-bit float per channel.
    Half4,
    /// RGB, 8-bit unsigned per channel.
    UChar3,
}

impl ImageFormat {
    /// Element type of each channel.
    #[inline]
    pub const fn data_type(&self) -> DataType {
        match self {
            Self::Float3 | Self::Float4 => DataType::F32,
            Self::Half3 | Self::Half4 => DataType::F16,
            Self::UChar3 => DataType::U8,
        }
    }

    /// Number of interleaved channels.
    #[inline]
    pub const fn channels(&self) -> usize {
        match self {
            Self::Float3 | Self::Half3 | Self::UChar3 => 3,
            Self::Float4 | Self::Half4 => 4,
        }
    }

    /// Packed size of one pixel in bytes.
    #[inline]
    pub const fn byte_size(&self) -> usize {
        self.channels() * self.data_type().size()
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.data_type(), self.channels())
    }
}
