//! Shared types for the groundtruth accumulation and evaluation core.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Re-export `RgbImage` so downstream crates can reference the 8-bit
/// storage representation without depending on `image` directly.
pub use image::RgbImage;

/// Re-export `Rgb32FImage`, the normalized floating representation used
/// by the color-space transform.
pub use image::Rgb32FImage;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of an 8-bit RGB image.
    #[must_use]
    pub fn of(image: &RgbImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }

    /// Total number of pixels.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Check that `images` all share the dimensions of the first one.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `images` is empty.
/// Returns [`PipelineError::ShapeMismatch`] naming the first offending
/// index otherwise.
pub fn ensure_same_shape(images: &[RgbImage]) -> Result<Dimensions, PipelineError> {
    let first = images.first().ok_or(PipelineError::EmptyInput)?;
    let expected = Dimensions::of(first);

    for (index, image) in images.iter().enumerate().skip(1) {
        let found = Dimensions::of(image);
        if found != expected {
            return Err(PipelineError::ShapeMismatch {
                index,
                expected,
                found,
            });
        }
    }

    Ok(expected)
}

/// Errors that can occur in the accumulation and evaluation core.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// No images were supplied to an operation that needs at least one.
    #[error("no input images")]
    EmptyInput,

    /// Images taking part in one merge or comparison differ in size.
    #[error("image {index} is {found}, expected {expected}")]
    ShapeMismatch {
        /// Position of the offending image in its input sequence.
        index: usize,
        /// Dimensions of the first image.
        expected: Dimensions,
        /// Dimensions of the offending image.
        found: Dimensions,
    },

    /// The perceptual metric could not be evaluated.
    #[error("perceptual metric failed: {0}")]
    Metric(String),
}
