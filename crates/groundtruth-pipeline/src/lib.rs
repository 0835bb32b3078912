//! groundtruth-pipeline: accumulation and evaluation core (sans-IO).
//!
//! Turns a sequence of equal-sample render batches into one reference
//! image, and scores candidate renders against a reference:
//!
//! - [`merge`]: pairwise tree reduction of batches into their mean
//! - [`colorspace`]: linear <-> gamma-encoded transform
//! - [`metric`]: numeric (MSE) and perceptual error between two images
//! - [`heatmap`]: per-pixel error maps and their visualization
//! - [`progress`]: clock abstraction and remaining-time estimate
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! images. Filesystem access and renderer processes live in
//! `groundtruth-io`.

pub mod colorspace;
pub mod heatmap;
pub mod merge;
pub mod metric;
pub mod progress;
pub mod types;

pub use heatmap::ErrorMap;
pub use merge::{MergeArena, merge_batches, merge_batches_in};
pub use metric::{
    ComparisonDomain, DynamicRange, MetricResult, PerceptualMetric, PerceptualOutcome,
    PerceptualParameters, compare,
};
pub use progress::{Clock, RemainingEstimate};
pub use types::{Dimensions, PipelineError, Rgb32FImage, RgbImage};
