//! Power-law color-space transform between linear and perceptual encodings.
//!
//! Renderer output is stored as 8-bit linear intensity. Comparing images
//! in the perceptual (gamma-encoded) domain weights errors the way a
//! display does, which is what the numeric metric needs when the
//! reference itself was produced linearly.
//!
//! ```text
//! perceptual = linear ^ (1 / gamma)
//! linear     = perceptual ^ gamma
//! ```
//!
//! Values outside `[0, 1]` are passed through the power function as-is.
//! Whether to transform at all is decided per comparison by the caller;
//! see [`ComparisonDomain`](crate::metric::ComparisonDomain).

use image::{Rgb32FImage, RgbImage};

/// Display gamma assumed for perceptual encoding.
pub const DEFAULT_GAMMA: f32 = 2.2;

/// Convert an 8-bit image into normalized `[0, 1]` floating values.
#[must_use]
pub fn normalize(image: &RgbImage) -> Rgb32FImage {
    let mut out = Rgb32FImage::new(image.width(), image.height());
    for (dst, &src) in out.iter_mut().zip(image.iter()) {
        *dst = f32::from(src) / 255.0;
    }
    out
}

/// Convert a normalized floating image back to 8-bit.
///
/// Each value is scaled by 255, clamped to `[0, 255]`, then rounded to the
/// nearest integer. This is the same conversion the merge reducer applies
/// after every averaging step.
#[must_use]
pub fn quantize(image: &Rgb32FImage) -> RgbImage {
    let mut out = RgbImage::new(image.width(), image.height());
    for (dst, &src) in out.iter_mut().zip(image.iter()) {
        *dst = to_code_value(src * 255.0);
    }
    out
}

/// Clamp a floating code value to the 8-bit range and round to nearest.
///
/// `NaN` maps to 0.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn to_code_value(value: f32) -> u8 {
    value.clamp(0.0, 255.0).round() as u8
}

/// Gamma-encode a linear image: `out = in ^ (1 / gamma)`.
#[must_use]
pub fn to_perceptual(image: &Rgb32FImage, gamma: f32) -> Rgb32FImage {
    map_values(image, |v| v.powf(gamma.recip()))
}

/// Decode a gamma-encoded image back to linear: `out = in ^ gamma`.
///
/// Exact mathematical inverse of [`to_perceptual`] for the same `gamma`.
#[must_use]
pub fn to_linear(image: &Rgb32FImage, gamma: f32) -> Rgb32FImage {
    map_values(image, |v| v.powf(gamma))
}

fn map_values(image: &Rgb32FImage, f: impl Fn(f32) -> f32) -> Rgb32FImage {
    let mut out = image.clone();
    for v in out.iter_mut() {
        *v = f(*v);
    }
    out
}
