//! Per-pixel error maps and their false-color visualization.

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::colorspace::to_code_value;
use crate::types::{Dimensions, PipelineError};

/// Row-major grid of per-pixel error scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMap {
    dimensions: Dimensions,
    values: Vec<f32>,
}

impl ErrorMap {
    /// Wrap `values` as a `width x height` map.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Metric`] if `values` does not hold exactly
    /// one score per pixel.
    pub fn new(dimensions: Dimensions, values: Vec<f32>) -> Result<Self, PipelineError> {
        let expected = usize::try_from(dimensions.pixel_count()).unwrap_or(usize::MAX);
        if values.len() != expected {
            return Err(PipelineError::Metric(format!(
                "error map for {dimensions} needs {expected} values, got {}",
                values.len()
            )));
        }
        Ok(Self { dimensions, values })
    }

    /// Map dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Scores in row-major order.
    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Score at `(x, y)`, or `None` outside the map.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.dimensions.width || y >= self.dimensions.height {
            return None;
        }
        let index = u64::from(y) * u64::from(self.dimensions.width) + u64::from(x);
        usize::try_from(index)
            .ok()
            .and_then(|i| self.values.get(i).copied())
    }

    /// Arithmetic mean of all scores (0 for an empty map).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.values.iter().map(|&v| f64::from(v)).sum();
        sum / self.values.len() as f64
    }
}

/// Render `map` with a black-red-yellow-white ramp.
///
/// Scores are stretched so the smallest maps to black and the largest to
/// white. A constant map renders black.
#[must_use]
pub fn hot(map: &ErrorMap) -> RgbImage {
    let (min, max) = map
        .values()
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;

    let dims = map.dimensions();
    RgbImage::from_fn(dims.width, dims.height, |x, y| {
        let value = map.get(x, y).unwrap_or(min);
        let t = if range > 0.0 { (value - min) / range } else { 0.0 };
        hot_color(t)
    })
}

/// Breakpoints follow the classic "hot" colormap: red saturates first,
/// then green, then blue.
fn hot_color(t: f32) -> Rgb<u8> {
    const RED_END: f32 = 0.365;
    const GREEN_END: f32 = 0.746;

    let r = (t / RED_END).clamp(0.0, 1.0);
    let g = ((t - RED_END) / (GREEN_END - RED_END)).clamp(0.0, 1.0);
    let b = ((t - GREEN_END) / (1.0 - GREEN_END)).clamp(0.0, 1.0);
    Rgb([
        to_code_value(r * 255.0),
        to_code_value(g * 255.0),
        to_code_value(b * 255.0),
    ])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn dims(width: u32, height: u32) -> Dimensions {
        Dimensions { width, height }
    }

    #[test]
    fn wrong_value_count_is_rejected() {
        let result = ErrorMap::new(dims(2, 2), vec![0.0; 3]);
        assert!(matches!(result, Err(PipelineError::Metric(_))));
    }

    #[test]
    fn get_is_row_major() {
        let map = ErrorMap::new(dims(3, 2), vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5]).unwrap();
        assert_eq!(map.get(2, 0), Some(0.2));
        assert_eq!(map.get(0, 1), Some(0.3));
        assert_eq!(map.get(3, 0), None);
        assert_eq!(map.get(0, 2), None);
    }

    #[test]
    fn mean_of_scores() {
        let map = ErrorMap::new(dims(2, 2), vec![0.0, 0.5, 0.5, 1.0]).unwrap();
        assert!((map.mean() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn hot_ramp_endpoints() {
        let map = ErrorMap::new(dims(3, 1), vec![0.0, 0.5, 1.0]).unwrap();
        let img = hot(&map);
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(img.get_pixel(2, 0).0, [255, 255, 255]);

        let mid = img.get_pixel(1, 0).0;
        assert_eq!(mid[0], 255, "red saturates before the midpoint");
        assert!(mid[1] > 0 && mid[1] < 255, "green is ramping, got {mid:?}");
        assert_eq!(mid[2], 0, "blue has not started, got {mid:?}");
    }

    #[test]
    fn constant_map_renders_black() {
        let map = ErrorMap::new(dims(2, 2), vec![0.25; 4]).unwrap();
        let img = hot(&map);
        assert!(img.pixels().all(|p| p.0 == [0, 0, 0]));
    }
}
