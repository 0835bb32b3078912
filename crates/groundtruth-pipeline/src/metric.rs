//! Convergence metrics: numeric and perceptual error between two images.
//!
//! [`compare`] produces a [`MetricResult`] with two scores:
//!
//! - **Numeric error**: mean squared difference over every pixel and
//!   channel, in 8-bit code-value units. It is computed either on the
//!   stored values ([`ComparisonDomain::Linear`]) or after gamma encoding
//!   both images ([`ComparisonDomain::Perceptual`]).
//! - **Perceptual error**: the mean score of a [`PerceptualMetric`]. The
//!   metric models perception itself, so it always receives the original
//!   images, whatever the domain of the numeric comparison.

use std::fmt;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::colorspace::{DEFAULT_GAMMA, normalize, to_perceptual};
use crate::heatmap::{self, ErrorMap};
use crate::types::{Dimensions, PipelineError};

/// Decimal places kept in the reported perceptual error.
pub const PERCEPTUAL_ERROR_PLACES: i32 = 6;

/// Domain in which the numeric error is computed.
///
/// There is deliberately no `Default`: comparing an already gamma-encoded
/// image in the perceptual domain encodes it twice, so every caller has to
/// choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonDomain {
    /// Compare the stored 8-bit values directly.
    Linear,
    /// Gamma-encode both images (gamma 2.2) before comparing.
    Perceptual,
}

impl fmt::Display for ComparisonDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear => f.write_str("linear"),
            Self::Perceptual => f.write_str("perceptual"),
        }
    }
}

/// Dynamic-range profile requested from a perceptual metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DynamicRange {
    /// Low dynamic range: display-referred 8-bit images.
    Ldr,
    /// High dynamic range: scene-referred floating images.
    Hdr,
}

impl fmt::Display for DynamicRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ldr => f.write_str("LDR"),
            Self::Hdr => f.write_str("HDR"),
        }
    }
}

/// Parameters a perceptual metric evaluated with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerceptualParameters {
    /// Dynamic-range profile.
    pub mode: DynamicRange,
    /// Observer resolution in pixels per degree of visual angle.
    pub pixels_per_degree: f32,
}

/// Everything a perceptual metric returns for one image pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceptualOutcome {
    /// Per-pixel scores.
    pub error_map: ErrorMap,
    /// Mean score over the whole image.
    pub mean: f64,
    /// Parameters used.
    pub parameters: PerceptualParameters,
}

/// A perceptual image-difference metric, such as FLIP.
///
/// Implementations are opaque: the pipeline only relies on the error map
/// and its mean.
pub trait PerceptualMetric {
    /// Score `test` against `reference`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Metric`] if the metric cannot evaluate the
    /// pair (unsupported `mode`, backend failure).
    fn evaluate(
        &self,
        reference: &RgbImage,
        test: &RgbImage,
        mode: DynamicRange,
    ) -> Result<PerceptualOutcome, PipelineError>;

    /// False-color rendering of an error map produced by this metric.
    fn visualize(&self, map: &ErrorMap) -> RgbImage {
        heatmap::hot(map)
    }
}

/// Numeric and perceptual error for one image pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    /// Mean squared error in 8-bit code-value units.
    pub numeric_error: f64,
    /// Mean perceptual error, rounded to [`PERCEPTUAL_ERROR_PLACES`].
    pub perceptual_error: f64,
}

/// Compare `a` against `b`.
///
/// `a` is treated as the reference by the perceptual metric.
///
/// # Errors
///
/// Returns [`PipelineError::ShapeMismatch`] if the images differ in size.
/// Propagates any error from `metric`.
pub fn compare<M: PerceptualMetric + ?Sized>(
    a: &RgbImage,
    b: &RgbImage,
    domain: ComparisonDomain,
    metric: &M,
) -> Result<MetricResult, PipelineError> {
    let numeric_error = mean_squared_error(a, b, domain)?;
    let outcome = metric.evaluate(a, b, DynamicRange::Ldr)?;

    Ok(MetricResult {
        numeric_error,
        perceptual_error: round_to_places(outcome.mean, PERCEPTUAL_ERROR_PLACES),
    })
}

/// Mean of squared per-channel differences, in 8-bit code-value units.
///
/// # Errors
///
/// Returns [`PipelineError::ShapeMismatch`] if the images differ in size.
#[allow(clippy::cast_precision_loss)]
pub fn mean_squared_error(
    a: &RgbImage,
    b: &RgbImage,
    domain: ComparisonDomain,
) -> Result<f64, PipelineError> {
    let expected = Dimensions::of(a);
    let found = Dimensions::of(b);
    if expected != found {
        return Err(PipelineError::ShapeMismatch {
            index: 1,
            expected,
            found,
        });
    }
    if a.is_empty() {
        return Ok(0.0);
    }

    let sum: f64 = match domain {
        ComparisonDomain::Linear => a
            .iter()
            .zip(b.iter())
            .map(|(&x, &y)| squared_difference(f64::from(x), f64::from(y)))
            .sum(),
        ComparisonDomain::Perceptual => {
            let a = to_perceptual(&normalize(a), DEFAULT_GAMMA);
            let b = to_perceptual(&normalize(b), DEFAULT_GAMMA);
            a.iter()
                .zip(b.iter())
                .map(|(&x, &y)| {
                    squared_difference(f64::from(x) * 255.0, f64::from(y) * 255.0)
                })
                .sum()
        }
    };

    Ok(sum / a.len() as f64)
}

fn squared_difference(x: f64, y: f64) -> f64 {
    let d = x - y;
    d * d
}

/// Round `value` to `places` decimal places.
#[must_use]
pub fn round_to_places(value: f64, places: i32) -> f64 {
    let scale = 10_f64.powi(places);
    (value * scale).round() / scale
}
