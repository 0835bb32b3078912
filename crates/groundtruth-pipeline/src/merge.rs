//! Pairwise tree reduction of equally-weighted render batches.
//!
//! Each render batch is an independent estimate of the same image at a
//! fixed sample count. Averaging `N` of them yields an estimate at `N`
//! times the samples. Rather than keep one running floating sum across
//! all batches, the reducer halves the sequence repeatedly:
//!
//! ```text
//! [b0 b1 b2 b3 b4]  ->  [(b0+b1)/2  (b2+b3+b4)/3]  ->  [(m0+m1)/2]
//! ```
//!
//! When a pass starts with an odd count, the last output slot absorbs
//! three inputs so nothing is dropped. Every merged image is rounded back
//! to 8-bit before the next pass. That rounding is part of the contract:
//! references accumulated earlier were produced the same way, and
//! changing it would change their pixel values.

use image::RgbImage;

use crate::colorspace::to_code_value;
use crate::types::{Dimensions, PipelineError, ensure_same_shape};

/// Reusable floating-point scratch space for merge steps.
///
/// A single accumulation buffer is shared by every merge step of a
/// reduction (and across reductions when the arena is reused), so the
/// intermediate floating representation never exceeds one image.
#[derive(Debug, Default)]
pub struct MergeArena {
    accumulator: Vec<f32>,
    passes: usize,
    merge_steps: usize,
}

impl MergeArena {
    /// Create an empty arena. The buffer grows on first use.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of halving passes performed through this arena.
    #[must_use]
    pub const fn passes(&self) -> usize {
        self.passes
    }

    /// Number of individual two- or three-way merges performed.
    #[must_use]
    pub const fn merge_steps(&self) -> usize {
        self.merge_steps
    }

    /// Average `group` into a new 8-bit image.
    ///
    /// Callers guarantee `group` is non-empty and uniformly shaped.
    #[allow(clippy::cast_precision_loss)]
    fn mean_of(&mut self, group: &[RgbImage], dims: Dimensions) -> RgbImage {
        let mut out = RgbImage::new(dims.width, dims.height);

        self.accumulator.clear();
        self.accumulator.resize(out.len(), 0.0);
        for image in group {
            for (acc, &value) in self.accumulator.iter_mut().zip(image.iter()) {
                *acc += f32::from(value);
            }
        }

        let count = group.len() as f32;
        for (dst, &acc) in out.iter_mut().zip(&self.accumulator) {
            *dst = to_code_value(acc / count);
        }

        self.merge_steps += 1;
        out
    }
}

/// Reduce `batches` to their per-pixel mean with a fresh arena.
///
/// # Errors
///
/// See [`merge_batches_in`].
pub fn merge_batches(batches: &[RgbImage]) -> Result<RgbImage, PipelineError> {
    merge_batches_in(batches, &mut MergeArena::new())
}

/// Reduce `batches` to their per-pixel mean using `arena` for scratch.
///
/// A single batch is returned unchanged. `batches` itself is never
/// modified; each pass produces a new, shorter sequence.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `batches` is empty.
/// Returns [`PipelineError::ShapeMismatch`] if any batch differs in size
/// from the first. Shapes are checked before any averaging happens.
pub fn merge_batches_in(
    batches: &[RgbImage],
    arena: &mut MergeArena,
) -> Result<RgbImage, PipelineError> {
    let dims = ensure_same_shape(batches)?;

    if let [single] = batches {
        return Ok(single.clone());
    }

    let mut level = reduce_pass(batches, dims, arena);
    while level.len() > 1 {
        level = reduce_pass(&level, dims, arena);
    }

    level.pop().ok_or(PipelineError::EmptyInput)
}

/// One halving pass: `L` images in, `L / 2` images out.
fn reduce_pass(level: &[RgbImage], dims: Dimensions, arena: &mut MergeArena) -> Vec<RgbImage> {
    let half = level.len() / 2;
    let odd = level.len() % 2 == 1;

    let merged: Vec<RgbImage> = (0..half)
        .map(|i| {
            let end = if odd && i == half - 1 {
                2 * i + 3
            } else {
                2 * i + 2
            };
            arena.mean_of(&level[2 * i..end], dims)
        })
        .collect();

    arena.passes += 1;
    tracing::debug!(
        pass = arena.passes,
        input = level.len(),
        output = merged.len(),
        "averaged image pairs"
    );

    merged
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn constant(value: u8) -> RgbImage {
        RgbImage::from_pixel(3, 2, image::Rgb([value, value, value]))
    }

    fn values(values: &[u8]) -> Vec<RgbImage> {
        values.iter().copied().map(constant).collect()
    }

    fn assert_constant(image: &RgbImage, expected: u8) {
        for (i, &v) in image.iter().enumerate() {
            assert_eq!(v, expected, "subpixel {i} is {v}, expected {expected}");
        }
    }

    #[test]
    fn empty_input_fails() {
        let result = merge_batches(&[]);
        assert!(matches!(result, Err(PipelineError::EmptyInput)));
    }

    #[test]
    fn single_batch_is_returned_unchanged() {
        let img = RgbImage::from_fn(4, 4, |x, y| {
            #[allow(clippy::cast_possible_truncation)]
            let v = (x * 40 + y) as u8;
            image::Rgb([v, v.wrapping_mul(3), 7])
        });
        let mut arena = MergeArena::new();
        let merged = merge_batches_in(std::slice::from_ref(&img), &mut arena).unwrap();
        assert_eq!(merged, img);
        assert_eq!(arena.passes(), 0);
        assert_eq!(arena.merge_steps(), 0);
    }

    #[test]
    fn pair_rounds_to_nearest() {
        let merged = merge_batches(&values(&[100, 101])).unwrap();
        assert_constant(&merged, 101);
    }

    #[test]
    fn triple_exact_mean() {
        let merged = merge_batches(&values(&[10, 20, 30])).unwrap();
        assert_constant(&merged, 20);
    }

    #[test]
    fn triple_rounds_down() {
        let merged = merge_batches(&values(&[10, 10, 11])).unwrap();
        assert_constant(&merged, 10);
    }

    #[test]
    fn odd_pass_folds_last_three() {
        // 5 -> [(0+10)/2, (20+30+40)/3] = [5, 30] -> (5+30)/2 = 17.5 -> 18
        let mut arena = MergeArena::new();
        let merged = merge_batches_in(&values(&[0, 10, 20, 30, 40]), &mut arena).unwrap();
        assert_constant(&merged, 18);
        assert_eq!(arena.passes(), 2);
        assert_eq!(arena.merge_steps(), 3);
    }

    #[test]
    fn rounding_happens_every_pass() {
        // [0, 1, 0, 0] -> [0.5 -> 1, 0] -> 0.5 -> 1, although the exact
        // mean 0.25 would round to 0.
        let merged = merge_batches(&values(&[0, 1, 0, 0])).unwrap();
        assert_constant(&merged, 1);
    }

    #[test]
    fn identical_batches_keep_their_value() {
        for n in 1..=17 {
            for v in [0_u8, 1, 127, 200, 255] {
                let batches = vec![constant(v); n];
                let merged = merge_batches(&batches).unwrap();
                assert_constant(&merged, v);
            }
        }
    }

    #[test]
    fn per_pixel_means_are_independent() {
        let a = RgbImage::from_fn(2, 1, |x, _| image::Rgb([0, 50, if x == 0 { 0 } else { 255 }]));
        let b = RgbImage::from_fn(2, 1, |x, _| image::Rgb([20, 50, if x == 0 { 100 } else { 255 }]));
        let merged = merge_batches(&[a, b]).unwrap();
        assert_eq!(merged.get_pixel(0, 0).0, [10, 50, 50]);
        assert_eq!(merged.get_pixel(1, 0).0, [10, 50, 255]);
    }

    #[test]
    fn shape_mismatch_is_rejected_before_merging() {
        let mut batches = values(&[1, 2, 3]);
        batches.push(RgbImage::new(2, 2));
        let mut arena = MergeArena::new();
        let result = merge_batches_in(&batches, &mut arena);
        assert!(
            matches!(result, Err(PipelineError::ShapeMismatch { index: 3, .. })),
            "got {result:?}"
        );
        assert_eq!(arena.merge_steps(), 0);
    }

    #[test]
    fn input_sequence_is_not_modified() {
        let batches = values(&[3, 9, 12]);
        let snapshot = batches.clone();
        merge_batches(&batches).unwrap();
        assert_eq!(batches, snapshot);
    }

    #[test]
    fn arena_is_reusable_across_reductions() {
        let mut arena = MergeArena::new();
        let first = merge_batches_in(&values(&[2, 4]), &mut arena).unwrap();
        let second = merge_batches_in(&values(&[6, 8, 10]), &mut arena).unwrap();
        assert_constant(&first, 3);
        assert_constant(&second, 8);
        assert_eq!(arena.passes(), 2);
    }
}
