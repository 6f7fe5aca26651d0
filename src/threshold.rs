//! Otsu thresholding and foreground masks.
//!
//! Masks are plain values: they are built once from a reference band or crop
//! and passed explicitly to whatever needs them.

use ndarray::{Array3, ArrayView2, ArrayView3, Axis};

/// Number of histogram bins used by [`otsu_threshold`].
pub const OTSU_BINS: usize = 256;

/// Fraction of the band maximum below which pixels are ignored when the
/// foreground threshold is computed.
pub const FOREGROUND_FLOOR_FRACTION: f32 = 0.15;

/// Minimum fraction of pixels that must clear the threshold before falling
/// back to a threshold over the full band.
pub const MIN_FOREGROUND_FRACTION: f64 = 0.005;

/// Otsu threshold of a set of intensities.
///
/// Returns the centre of the histogram bin that maximizes between-class
/// variance, the single value when all intensities are equal, and `None` for
/// an empty input.
pub fn otsu_threshold<I>(values: I) -> Option<f32>
where
    I: IntoIterator<Item = f32>,
{
    let values: Vec<f32> = values.into_iter().filter(|v| v.is_finite()).collect();
    let (min, max) = values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if values.is_empty() {
        return None;
    }
    if max <= min {
        return Some(min);
    }

    let bin_width = (max - min) / OTSU_BINS as f32;
    let mut histogram = [0u64; OTSU_BINS];
    for &v in &values {
        let bin = (((v - min) / bin_width) as usize).min(OTSU_BINS - 1);
        histogram[bin] += 1;
    }

    let centre = |bin: usize| min + (bin as f32 + 0.5) * bin_width;
    let total = values.len() as f64;
    let total_sum: f64 = histogram
        .iter()
        .enumerate()
        .map(|(bin, &count)| count as f64 * centre(bin) as f64)
        .sum();

    let mut weight_low = 0.0f64;
    let mut sum_low = 0.0f64;
    let mut best_bin = 0usize;
    let mut best_variance = f64::NEG_INFINITY;

    for (bin, &count) in histogram.iter().enumerate().take(OTSU_BINS - 1) {
        weight_low += count as f64;
        sum_low += count as f64 * centre(bin) as f64;
        let weight_high = total - weight_low;
        if weight_low == 0.0 || weight_high == 0.0 {
            continue;
        }
        let mean_low = sum_low / weight_low;
        let mean_high = (total_sum - sum_low) / weight_high;
        let variance = weight_low * weight_high * (mean_low - mean_high).powi(2);
        if variance > best_variance {
            best_variance = variance;
            best_bin = bin;
        }
    }

    Some(centre(best_bin))
}

// =============================================================================
// Foreground Mask
// =============================================================================

/// Binary foreground mask with the threshold that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ForegroundMask {
    threshold: f32,
    mask: Array3<bool>,
}

impl ForegroundMask {
    /// Mask of a correlation band.
    ///
    /// The Otsu threshold is computed over pixels above 15% of the band
    /// maximum. If fewer than 0.5% of the band's pixels clear it, the
    /// threshold is recomputed over the whole band.
    pub fn from_band(band: ArrayView3<f32>) -> Self {
        let max = band.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let floor = FOREGROUND_FLOOR_FRACTION * max;

        let mut threshold = otsu_threshold(band.iter().copied().filter(|&v| v > floor));
        let cleared = threshold
            .map(|t| band.iter().filter(|&&v| v > t).count())
            .unwrap_or(0);
        let total = band.len().max(1);

        if (cleared as f64 / total as f64) < MIN_FOREGROUND_FRACTION {
            threshold = otsu_threshold(band.iter().copied());
        }

        Self::from_threshold(band, threshold.unwrap_or(f32::INFINITY))
    }

    /// Mask with a single global Otsu threshold over `volume`.
    pub fn otsu(volume: ArrayView3<f32>) -> Self {
        let threshold = otsu_threshold(volume.iter().copied()).unwrap_or(f32::INFINITY);
        Self::from_threshold(volume, threshold)
    }

    /// Mask of `volume` with a threshold computed elsewhere.
    pub fn from_threshold(volume: ArrayView3<f32>, threshold: f32) -> Self {
        Self {
            threshold,
            mask: volume.mapv(|v| v > threshold),
        }
    }

    /// Same threshold applied to another volume.
    pub fn reapply(&self, volume: ArrayView3<f32>) -> Self {
        Self::from_threshold(volume, self.threshold)
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        self.mask.dim()
    }

    pub fn depth(&self) -> usize {
        self.mask.dim().0
    }

    /// Mask of slice `z`.
    pub fn slice(&self, z: usize) -> ArrayView2<'_, bool> {
        self.mask.index_axis(Axis(0), z)
    }

    pub fn get(&self, z: usize, y: usize, x: usize) -> bool {
        self.mask.get((z, y, x)).copied().unwrap_or(false)
    }

    /// Number of foreground voxels.
    pub fn count(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    pub fn as_array(&self) -> &Array3<bool> {
        &self.mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Volume;

    #[test]
    fn test_otsu_bimodal() {
        let values = std::iter::repeat(10.0f32)
            .take(100)
            .chain(std::iter::repeat(200.0f32).take(100));
        let threshold = otsu_threshold(values).unwrap();
        assert!(threshold > 10.0 && threshold < 200.0, "threshold {}", threshold);
    }

    #[test]
    fn test_otsu_degenerate_inputs() {
        assert_eq!(otsu_threshold(Vec::<f32>::new()), None);
        assert_eq!(otsu_threshold(vec![3.0, 3.0, 3.0]), Some(3.0));
    }

    #[test]
    fn test_band_mask_separates_foreground() {
        let band = Volume::from_shape_fn((4, 10, 10), |(_, y, x)| {
            if (3..7).contains(&y) && (3..7).contains(&x) {
                1000.0
            } else {
                5.0
            }
        });

        let mask = ForegroundMask::from_band(band.view());
        assert_eq!(mask.count(), 4 * 16);
        assert!(mask.get(0, 4, 4));
        assert!(!mask.get(0, 0, 0));
    }

    #[test]
    fn test_band_mask_falls_back_to_full_band() {
        // Only one bright voxel survives the upper histogram threshold, which is
        // below 0.5% of the band, so the threshold is recomputed globally.
        let mut band =
            Volume::from_shape_fn((2, 20, 20), |(_, y, _)| if y < 10 { 10.0 } else { 50.0 });
        band[[0, 0, 0]] = 1000.0;

        let mask = ForegroundMask::from_band(band.view());
        assert!(mask.threshold() < 1000.0);
        assert!(mask.get(0, 0, 0));
    }

    #[test]
    fn test_reapply_keeps_threshold() {
        let reference =
            Volume::from_shape_fn((1, 4, 4), |(_, _, x)| if x < 2 { 0.0 } else { 100.0 });
        let moving = Volume::from_elem((1, 4, 4), 90.0);

        let mask = ForegroundMask::otsu(reference.view());
        let moving_mask = mask.reapply(moving.view());
        assert_eq!(moving_mask.threshold(), mask.threshold());
        assert_eq!(moving_mask.count(), 16);
    }
}
