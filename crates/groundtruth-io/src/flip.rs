//! NVIDIA FLIP as the perceptual metric, via the `nv-flip` bindings.
//!
//! FLIP compares a test image against a reference as a viewer at a given
//! angular resolution would see them, and produces a per-pixel error in
//! `[0, 1]`. Only the LDR variant is available for 8-bit inputs.

use groundtruth_pipeline::metric::{
    DynamicRange, PerceptualMetric, PerceptualOutcome, PerceptualParameters,
};
use groundtruth_pipeline::{Dimensions, ErrorMap, PipelineError, RgbImage, heatmap};

/// FLIP perceptual difference metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlipMetric {
    pixels_per_degree: f32,
}

impl FlipMetric {
    /// Use a custom observer resolution in pixels per degree.
    #[must_use]
    pub const fn with_pixels_per_degree(pixels_per_degree: f32) -> Self {
        Self { pixels_per_degree }
    }

    /// Observer resolution in pixels per degree.
    #[must_use]
    pub const fn pixels_per_degree(&self) -> f32 {
        self.pixels_per_degree
    }
}

impl Default for FlipMetric {
    /// A 0.7 m viewing distance from a 24" 4K monitor.
    fn default() -> Self {
        Self::with_pixels_per_degree(nv_flip::DEFAULT_PIXELS_PER_DEGREE)
    }
}

impl PerceptualMetric for FlipMetric {
    fn evaluate(
        &self,
        reference: &RgbImage,
        test: &RgbImage,
        mode: DynamicRange,
    ) -> Result<PerceptualOutcome, PipelineError> {
        if mode != DynamicRange::Ldr {
            return Err(PipelineError::Metric(format!(
                "FLIP {mode} needs floating-point exposures; 8-bit images only support LDR"
            )));
        }

        let dims = Dimensions::of(reference);
        let found = Dimensions::of(test);
        if dims != found {
            return Err(PipelineError::ShapeMismatch {
                index: 1,
                expected: dims,
                found,
            });
        }

        let reference_image =
            nv_flip::FlipImageRgb8::with_data(dims.width, dims.height, reference.as_raw());
        let test_image = nv_flip::FlipImageRgb8::with_data(dims.width, dims.height, test.as_raw());
        let flip_map = nv_flip::flip(reference_image, test_image, self.pixels_per_degree);

        let error_map = ErrorMap::new(dims, flip_map.to_vec())?;
        let mean = error_map.mean();
        tracing::debug!(%dims, mean, "evaluated FLIP");

        Ok(PerceptualOutcome {
            error_map,
            mean,
            parameters: PerceptualParameters {
                mode,
                pixels_per_degree: self.pixels_per_degree,
            },
        })
    }

    /// Render through FLIP's magma lookup table.
    fn visualize(&self, map: &ErrorMap) -> RgbImage {
        let dims = map.dimensions();
        let float = nv_flip::FlipImageFloat::with_data(dims.width, dims.height, map.values());
        let colored = float.apply_color_lut(&nv_flip::magma_lut());
        RgbImage::from_raw(dims.width, dims.height, colored.to_vec())
            .unwrap_or_else(|| heatmap::hot(map))
    }
}
