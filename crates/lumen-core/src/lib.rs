//! # lumen-core
//!
//! Backend-independent types for the lumen compute engine.
//!
//! - [`DataType`] - Element representation of tensors and images (F32, F16, U8)
//! - [`ImageFormat`] - Channel count + element type of an image
//! - [`ImageDesc`] - Image dimensions, format and byte strides
//! - [`luminance_rec709`] / [`sanitize_rgb`] - Pixel math shared by all kernels
//!
//! ## Crate Structure
//!
//! ```text
//! lumen-core (this crate)
//!    ^
//!    |
//!    +-- lumen-compute (engine, buffers, tensors, autoexposure)
//!    +-- lumen-bench
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod desc;
pub mod error;
pub mod format;
pub mod pixel;

pub use desc::*;
pub use error::*;
pub use format::*;
pub use pixel::{
    Element, REC709_LUMA, REC709_LUMA_B, REC709_LUMA_G, REC709_LUMA_R, luminance_rec709,
    sanitize_rgb,
};

/// Integer division rounding towards positive infinity.
///
/// # Example
/// ```
/// assert_eq!(lumen_core::ceil_div(33, 16), 3);
/// assert_eq!(lumen_core::ceil_div(32, 16), 2);
/// ```
#[inline]
pub const fn ceil_div(a: usize, b: usize) -> usize {
    a.div_ceil(b)
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::ceil_div;
    pub use crate::desc::ImageDesc;
    pub use crate::error::{Error, Result};
    pub use crate::format::{DataType, ImageFormat};
    pub use crate::pixel::{Element, luminance_rec709, sanitize_rgb};
}
