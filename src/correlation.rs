//! Correlation-based slice matching.
//!
//! Scores are zero-mean normalized cross-correlations (NCC): each slice has
//! its own mean removed and the sum of products is divided by both standard
//! deviations and by the number of compared pixels. The score is bounded in
//! `[-1, 1]` and unaffected by a positive scale and shift of either input.
//!
//! Two search modes are provided:
//!
//! - [`best_offset`] compares a range of reference slices around the band
//!   centre with every moving slice and takes the median of the per-slice
//!   best offsets, so one noisy slice pair cannot drag the result.
//! - [`best_slice`] compares the middle reference slice with every moving
//!   slice and returns the best index.
//!
//! Zero-variance slices (or empty masks) score [`DEGENERATE_SCORE`] and are
//! counted instead of producing a division fault.

use ndarray::{ArrayView2, Axis};
use serde::Serialize;

use crate::error::ConfigError;
use crate::threshold::ForegroundMask;
use crate::volume::SliceBand;

/// Score reported for a comparison that has no defined correlation.
pub const DEGENERATE_SCORE: f64 = 0.0;

const VARIANCE_EPSILON: f64 = 1e-12;

// =============================================================================
// Pairwise Score
// =============================================================================

/// NCC of two slices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Correlation {
    pub score: f64,
    /// `true` when one side had zero variance or the mask was empty
    pub degenerate: bool,
}

impl Correlation {
    fn degenerate() -> Self {
        Self {
            score: DEGENERATE_SCORE,
            degenerate: true,
        }
    }
}

/// Zero-mean normalized cross-correlation of two equally sized slices.
///
/// With a mask, means, deviations and the product sum only use pixels where
/// the mask is set, and the pixel count is the masked count.
pub fn normalized_cross_correlation(
    first: ArrayView2<f32>,
    second: ArrayView2<f32>,
    mask: Option<ArrayView2<bool>>,
) -> Correlation {
    if first.dim() != second.dim() {
        return Correlation::degenerate();
    }

    let mut count = 0usize;
    let mut sum_first = 0.0f64;
    let mut sum_second = 0.0f64;
    for (a, b) in masked_pairs(first, second, mask) {
        count += 1;
        sum_first += a;
        sum_second += b;
    }
    if count == 0 {
        return Correlation::degenerate();
    }

    let n = count as f64;
    let mean_first = sum_first / n;
    let mean_second = sum_second / n;

    let mut cross = 0.0f64;
    let mut var_first = 0.0f64;
    let mut var_second = 0.0f64;
    for (a, b) in masked_pairs(first, second, mask) {
        let da = a - mean_first;
        let db = b - mean_second;
        cross += da * db;
        var_first += da * da;
        var_second += db * db;
    }

    let std_first = (var_first / n).sqrt();
    let std_second = (var_second / n).sqrt();
    if std_first * std_second <= VARIANCE_EPSILON {
        return Correlation::degenerate();
    }

    Correlation {
        score: cross / (std_first * std_second * n),
        degenerate: false,
    }
}

fn masked_pairs<'r, 'a: 'r, 'b: 'r, 'c: 'r>(
    first: ArrayView2<'a, f32>,
    second: ArrayView2<'b, f32>,
    mask: Option<ArrayView2<'c, bool>>,
) -> Box<dyn Iterator<Item = (f64, f64)> + 'r> {
    let pairs = first
        .into_iter()
        .zip(second)
        .map(|(&a, &b)| (a as f64, b as f64));
    match mask {
        Some(mask) => Box::new(
            pairs
                .zip(mask)
                .filter_map(|(pair, &keep)| keep.then_some(pair)),
        ),
        None => Box::new(pairs),
    }
}

// =============================================================================
// Band Mode
// =============================================================================

/// Result of a band search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandMatch {
    /// Median offset: moving slice index minus matching reference slice index
    pub offset: f64,
    /// Best offset found for each evaluated reference slice
    pub candidates: Vec<i64>,
    /// Score of each candidate
    pub scores: Vec<f64>,
    /// Comparisons that had no defined correlation
    pub degenerate_comparisons: usize,
}

impl BandMatch {
    /// `false` when no reference slice produced a defined correlation.
    pub fn is_usable(&self) -> bool {
        !self.candidates.is_empty()
    }
}

/// Median-aggregated best slice offset between two bands.
///
/// For every `i` in `[-search_radius, search_radius)`, reference slice
/// `depth / 2 + i` is compared with every moving slice; its candidate is the
/// best moving index minus the reference index. The returned offset is the
/// median candidate, so identical bands give `0`.
///
/// With `use_mask`, a [`ForegroundMask`] is built from the reference band and
/// each comparison is restricted to the reference slice's mask.
pub fn best_offset(
    reference: SliceBand,
    moving: SliceBand,
    search_radius: usize,
    use_mask: bool,
) -> Result<BandMatch, ConfigError> {
    if search_radius == 0 {
        return Err(ConfigError::NonPositiveSearchBand(0));
    }
    check_bands(&reference, &moving)?;

    let mask = use_mask.then(|| ForegroundMask::from_band(reference));
    let depth = reference.dim().0 as i64;
    let centre = depth / 2;
    let radius = search_radius as i64;

    let mut candidates = Vec::new();
    let mut scores = Vec::new();
    let mut degenerate_comparisons = 0usize;

    for i in -radius..radius {
        let r = centre + i;
        if r < 0 || r >= depth {
            continue;
        }
        let reference_slice = reference.index_axis(Axis(0), r as usize);
        let slice_mask = mask.as_ref().map(|m| m.slice(r as usize));

        let mut best: Option<(usize, f64)> = None;
        for (j, moving_slice) in moving.axis_iter(Axis(0)).enumerate() {
            let correlation =
                normalized_cross_correlation(reference_slice, moving_slice, slice_mask);
            if correlation.degenerate {
                degenerate_comparisons += 1;
                continue;
            }
            if best.map_or(true, |(_, score)| correlation.score > score) {
                best = Some((j, correlation.score));
            }
        }

        if let Some((j, score)) = best {
            candidates.push(j as i64 - r);
            scores.push(score);
        }
    }

    Ok(BandMatch {
        offset: median(&candidates).unwrap_or(0.0),
        candidates,
        scores,
        degenerate_comparisons,
    })
}

// =============================================================================
// Single-Slice Mode
// =============================================================================

/// Result of a single-slice search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SliceMatch {
    /// Index of the best moving slice
    pub index: usize,
    pub score: f64,
    /// Score of every moving slice, degenerate ones as [`DEGENERATE_SCORE`]
    pub scores: Vec<f64>,
}

/// Moving slice that best matches the middle reference slice.
pub fn best_slice(reference: SliceBand, moving: SliceBand) -> Result<SliceMatch, ConfigError> {
    check_bands(&reference, &moving)?;

    let middle = reference.index_axis(Axis(0), reference.dim().0 / 2);
    let scores: Vec<f64> = moving
        .axis_iter(Axis(0))
        .map(|slice| normalized_cross_correlation(middle, slice, None).score)
        .collect();

    let (index, score) = scores
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (j, score)| {
            if score > best.1 {
                (j, score)
            } else {
                best
            }
        });

    Ok(SliceMatch {
        index,
        score,
        scores,
    })
}

fn check_bands(reference: &SliceBand, moving: &SliceBand) -> Result<(), ConfigError> {
    let (rd, rh, rw) = reference.dim();
    let (md, mh, mw) = moving.dim();
    if rd == 0 || md == 0 {
        return Err(ConfigError::Invalid(
            "correlation bands must contain at least one slice".to_string(),
        ));
    }
    if (rh, rw) != (mh, mw) {
        return Err(ConfigError::Invalid(format!(
            "correlation bands have different slice shapes: {}x{} vs {}x{}",
            rh, rw, mh, mw
        )));
    }
    Ok(())
}

/// Median of integer candidates, averaging the middle pair for even counts.
fn median(values: &[i64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) as f64 / 2.0)
    } else {
        Some(sorted[mid] as f64)
    }
}
