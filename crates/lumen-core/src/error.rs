//! Error types for lumen-core.
//!
//! # Usage
//!
//! ```rust
//! use lumen_core::{Error, Result};
//!
//! fn check(width: usize, height: usize) -> Result<()> {
//!     if width == 0 || height == 0 {
//!         return Err(Error::invalid_dimensions(width, height, "zero extent"));
//!     }
//!     Ok(())
//! }
//! assert!(check(0, 4).is_err());
//! ```

use thiserror::Error;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while describing images and pixel data.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid image dimensions.
    ///
    /// Returned when width or height is zero, or dimensions would cause
    /// integer overflow in byte size calculations.
    #[error("invalid dimensions: {width}x{height} ({reason})")]
    InvalidDimensions {
        /// Requested width
        width: usize,
        /// Requested height
        height: usize,
        /// Reason why dimensions are invalid
        reason: String,
    },

    /// Stride is too small for the given width and pixel size.
    #[error("stride {stride} is less than minimum {min_stride}")]
    InvalidStride {
        /// Provided stride
        stride: usize,
        /// Minimum required stride
        min_stride: usize,
    },

    /// Pixel format is not supported for this operation.
    #[error("unsupported pixel format: {format}")]
    UnsupportedFormat {
        /// Format name or description
        format: String,
    },

    /// Image dimensions don't match for the operation.
    #[error("dimension mismatch: {a_width}x{a_height} vs {b_width}x{b_height}")]
    DimensionMismatch {
        /// First image width
        a_width: usize,
        /// First image height
        a_height: usize,
        /// Second image width
        b_width: usize,
        /// Second image height
        b_height: usize,
    },
}

impl Error {
    /// Creates an [`Error::InvalidDimensions`] error.
    #[inline]
    pub fn invalid_dimensions(width: usize, height: usize, reason: impl Into<String>) -> Self {
        Self::InvalidDimensions {
            width,
            height,
            reason: reason.into(),
        }
    }

    /// Creates an [`Error::DimensionMismatch`] error.
    #[inline]
    pub fn dimension_mismatch(a: (usize, usize), b: (usize, usize)) -> Self {
        Self::DimensionMismatch {
            a_width: a.0,
            a_height: a.1,
            b_width: b.0,
            b_height: b.1,
        }
    }

    /// Creates an [`Error::UnsupportedFormat`] error.
    #[inline]
    pub fn unsupported_format(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }
}
