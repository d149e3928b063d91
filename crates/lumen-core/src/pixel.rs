//! Pixel math shared by the compute kernels.
//!
//! - [`Element`] - Conversion between stored channel values and f32
//! - [`luminance_rec709`] - Rec.709 luminance
//! - [`sanitize_rgb`] - NaN/Inf scrubbing before luminance is taken

use crate::format::DataType;
use half::f16;

// ============================================================================
// Rec.709 Luminance Constants
// ============================================================================

/// Rec.709 luminance coefficient for red channel.
///
/// Used in the standard luminance formula: `Y = 0.2126*R + 0.7152*G + 0.0722*B`
pub const REC709_LUMA_R: f32 = 0.2126;

/// Rec.709 luminance coefficient for green channel.
pub const REC709_LUMA_G: f32 = 0.7152;

/// Rec.709 luminance coefficient for blue channel.
pub const REC709_LUMA_B: f32 = 0.0722;

/// Rec.709 luminance coefficients as an array [R, G, B].
pub const REC709_LUMA: [f32; 3] = [REC709_LUMA_R, REC709_LUMA_G, REC709_LUMA_B];

/// Calculate Rec.709 luminance from RGB values.
///
/// # Example
/// ```
/// use lumen_core::pixel::luminance_rec709;
/// let luma = luminance_rec709([0.5, 0.3, 0.2]);
/// // 0.5 * 0.2126 + 0.3 * 0.7152 + 0.2 * 0.0722 = 0.3353
/// assert!((luma - 0.3353).abs() < 0.0001);
/// ```
#[inline]
pub fn luminance_rec709(rgb: [f32; 3]) -> f32 {
    rgb[0] * REC709_LUMA_R + rgb[1] * REC709_LUMA_G + rgb[2] * REC709_LUMA_B
}

/// Replaces non-finite channels with zero and clamps into `[0, f32::MAX]`.
///
/// ```
/// use lumen_core::pixel::sanitize_rgb;
/// let c = sanitize_rgb([f32::NAN, -1.0, f32::INFINITY]);
/// assert_eq!(c, [0.0, 0.0, 0.0]);
/// ```
#[inline]
pub fn sanitize_rgb(rgb: [f32; 3]) -> [f32; 3] {
    rgb.map(|v| if v.is_finite() { v.clamp(0.0, f32::MAX) } else { 0.0 })
}

/// Channel element stored in tensors and images.
///
/// Integers normalize to `[0.0, 1.0]`, floats convert directly.
pub trait Element: Copy + Default + Send + Sync + 'static {
    /// Runtime tag for this element type.
    const DATA_TYPE: DataType;

    /// Convert to f32.
    fn to_f32(self) -> f32;

    /// Convert from f32.
    fn from_f32(v: f32) -> Self;
}

impl Element for f32 {
    const DATA_TYPE: DataType = DataType::F32;

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
}

impl Element for f16 {
    const DATA_TYPE: DataType = DataType::F16;

    #[inline]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        f16::from_f32(v)
    }
}

impl Element for u8 {
    const DATA_TYPE: DataType = DataType::U8;

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32 / 255.0
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        (v.clamp(0.0, 1.0) * 255.0).round() as u8
    }
}
