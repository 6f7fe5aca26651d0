//! Translation solvers.
//!
//! A [`TranslationSolver`] finds the translation `t` that best maps a moving
//! volume onto a reference volume, `reference(p) ≈ moving(p - t)`. The
//! built-in [`ExhaustiveTranslationSolver`] scores every integer translation
//! inside a bounded window and refines the best one to sub-voxel precision
//! with a per-axis parabola fit.

use std::time::{Duration, Instant};

use ndarray::{s, Array3, ArrayView3, Zip};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::RegistrationError;
use crate::threshold::ForegroundMask;
use crate::transform::Translation;
use crate::volume::Volume;

/// Default integer search radius on every axis.
pub const DEFAULT_SEARCH_RADIUS: usize = 5;

/// Default minimum number of overlapping voxels for a candidate to count.
pub const DEFAULT_MIN_OVERLAP_VOXELS: usize = 32;

// =============================================================================
// Metric and Deadline
// =============================================================================

/// Similarity measure minimized by the solver.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum SimilarityMetric {
    /// Negative normalized cross-correlation
    Correlation,
    /// Mean of squared intensity differences
    #[default]
    MeanSquares,
}

/// Cooperative time limit checked by solvers between candidates.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    /// A deadline that never expires.
    pub fn none() -> Self {
        Self {
            started: Instant::now(),
            limit: None,
        }
    }

    /// A deadline `limit` from now.
    pub fn after(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit: Some(limit),
        }
    }

    pub fn limit(&self) -> Option<Duration> {
        self.limit
    }

    pub fn is_expired(&self) -> bool {
        self.limit
            .map(|limit| self.started.elapsed() >= limit)
            .unwrap_or(false)
    }

    /// `Err(TimedOut)` once the deadline has passed.
    pub fn check(&self) -> Result<(), RegistrationError> {
        match self.limit {
            Some(limit) if self.started.elapsed() >= limit => {
                Err(RegistrationError::TimedOut(limit))
            }
            _ => Ok(()),
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}

// =============================================================================
// TranslationSolver Trait
// =============================================================================

/// Finds the translation that maps `moving` onto `reference`.
///
/// Masks, when given, have the shape of the volume they belong to; only
/// voxels inside both masks are compared.
pub trait TranslationSolver: Send + Sync {
    fn solve_translation(
        &self,
        moving: &Volume,
        reference: &Volume,
        moving_mask: Option<&ForegroundMask>,
        reference_mask: Option<&ForegroundMask>,
        metric: SimilarityMetric,
        deadline: &Deadline,
    ) -> Result<Translation, RegistrationError>;
}

// =============================================================================
// Exhaustive Solver
// =============================================================================

/// Integer grid search followed by parabolic sub-voxel refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExhaustiveTranslationSolver {
    /// Search radius in voxels, `(z, y, x)`
    pub radius: [usize; 3],

    /// Candidates comparing fewer voxels are ignored
    pub min_overlap_voxels: usize,
}

impl ExhaustiveTranslationSolver {
    pub fn new(radius: [usize; 3]) -> Self {
        Self {
            radius,
            min_overlap_voxels: DEFAULT_MIN_OVERLAP_VOXELS,
        }
    }

    /// Same radius on every axis.
    pub fn with_radius(radius: usize) -> Self {
        Self::new([radius; 3])
    }

    pub fn with_min_overlap(mut self, voxels: usize) -> Self {
        self.min_overlap_voxels = voxels.max(1);
        self
    }
}

impl Default for ExhaustiveTranslationSolver {
    fn default() -> Self {
        Self::with_radius(DEFAULT_SEARCH_RADIUS)
    }
}

/// Running sums over the voxels compared for one candidate.
#[derive(Debug, Default)]
struct Sums {
    count: usize,
    reference: f64,
    moving: f64,
    reference_sq: f64,
    moving_sq: f64,
    product: f64,
    squared_difference: f64,
}

impl Sums {
    fn add(&mut self, r: f32, m: f32) {
        let (r, m) = (r as f64, m as f64);
        self.count += 1;
        self.reference += r;
        self.moving += m;
        self.reference_sq += r * r;
        self.moving_sq += m * m;
        self.product += r * m;
        self.squared_difference += (r - m) * (r - m);
    }

    /// Cost to minimize, `None` when undefined.
    fn cost(&self, metric: SimilarityMetric) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        match metric {
            SimilarityMetric::MeanSquares => Some(self.squared_difference / n),
            SimilarityMetric::Correlation => {
                let covariance = self.product - self.reference * self.moving / n;
                let var_r = self.reference_sq - self.reference * self.reference / n;
                let var_m = self.moving_sq - self.moving * self.moving / n;
                if var_r <= f64::EPSILON || var_m <= f64::EPSILON {
                    return None;
                }
                Some(-covariance / (var_r * var_m).sqrt())
            }
        }
    }
}

/// Overlap of `[0, reference)` with `[shift, moving + shift)` on one axis,
/// returned as the reference range start and end.
fn overlap(reference: usize, moving: usize, shift: i64) -> Option<(usize, usize)> {
    let start = shift.max(0);
    let end = (reference as i64).min(moving as i64 + shift);
    (start < end).then(|| (start as usize, end as usize))
}

impl ExhaustiveTranslationSolver {
    fn score(
        &self,
        views: &Views<'_>,
        shift: [i64; 3],
        metric: SimilarityMetric,
    ) -> Option<f64> {
        let (rd, rh, rw) = views.reference.dim();
        let (md, mh, mw) = views.moving.dim();
        let (z0, z1) = overlap(rd, md, shift[0])?;
        let (y0, y1) = overlap(rh, mh, shift[1])?;
        let (x0, x1) = overlap(rw, mw, shift[2])?;

        let (mz0, my0, mx0) = (
            (z0 as i64 - shift[0]) as usize,
            (y0 as i64 - shift[1]) as usize,
            (x0 as i64 - shift[2]) as usize,
        );
        let (mz1, my1, mx1) = (mz0 + (z1 - z0), my0 + (y1 - y0), mx0 + (x1 - x0));

        let mut sums = Sums::default();
        Zip::from(views.reference.slice(s![z0..z1, y0..y1, x0..x1]))
            .and(views.moving.slice(s![mz0..mz1, my0..my1, mx0..mx1]))
            .and(views.reference_mask.slice(s![z0..z1, y0..y1, x0..x1]))
            .and(views.moving_mask.slice(s![mz0..mz1, my0..my1, mx0..mx1]))
            .for_each(|&r, &m, &rm, &mm| {
                if rm && mm {
                    sums.add(r, m);
                }
            });

        if sums.count < self.min_overlap_voxels {
            return None;
        }
        sums.cost(metric)
    }
}

struct Views<'a> {
    reference: ArrayView3<'a, f32>,
    moving: ArrayView3<'a, f32>,
    reference_mask: ArrayView3<'a, bool>,
    moving_mask: ArrayView3<'a, bool>,
}

/// Offset of the vertex of the parabola through three equally spaced costs.
fn parabola_vertex(before: f64, centre: f64, after: f64) -> f64 {
    let curvature = before - 2.0 * centre + after;
    if curvature <= f64::EPSILON {
        return 0.0;
    }
    (0.5 * (before - after) / curvature).clamp(-0.5, 0.5)
}

impl TranslationSolver for ExhaustiveTranslationSolver {
    fn solve_translation(
        &self,
        moving: &Volume,
        reference: &Volume,
        moving_mask: Option<&ForegroundMask>,
        reference_mask: Option<&ForegroundMask>,
        metric: SimilarityMetric,
        deadline: &Deadline,
    ) -> Result<Translation, RegistrationError> {
        for (mask, volume, name) in [
            (moving_mask, moving, "moving"),
            (reference_mask, reference, "reference"),
        ] {
            if let Some(mask) = mask {
                if mask.dim() != volume.dim() {
                    return Err(RegistrationError::NotConverged(format!(
                        "{} mask shape {:?} does not match volume shape {:?}",
                        name,
                        mask.dim(),
                        volume.dim()
                    )));
                }
            }
        }

        let full_reference_mask;
        let full_moving_mask;
        let views = Views {
            reference: reference.view(),
            moving: moving.view(),
            reference_mask: match reference_mask {
                Some(mask) => mask.as_array().view(),
                None => {
                    full_reference_mask = Array3::from_elem(reference.dim(), true);
                    full_reference_mask.view()
                }
            },
            moving_mask: match moving_mask {
                Some(mask) => mask.as_array().view(),
                None => {
                    full_moving_mask = Array3::from_elem(moving.dim(), true);
                    full_moving_mask.view()
                }
            },
        };

        let radius = self.radius.map(|r| r as i64);
        let extent = radius.map(|r| (2 * r + 1) as usize);
        let mut costs: Array3<Option<f64>> = Array3::from_elem((extent[0], extent[1], extent[2]), None);
        let mut best: Option<([usize; 3], f64)> = None;

        for (iz, dz) in (-radius[0]..=radius[0]).enumerate() {
            for (iy, dy) in (-radius[1]..=radius[1]).enumerate() {
                deadline.check()?;
                for (ix, dx) in (-radius[2]..=radius[2]).enumerate() {
                    let cost = self.score(&views, [dz, dy, dx], metric);
                    costs[[iz, iy, ix]] = cost;
                    if let Some(cost) = cost {
                        let better = match best {
                            Some((_, best_cost)) => cost < best_cost,
                            None => true,
                        };
                        if better {
                            best = Some(([iz, iy, ix], cost));
                        }
                    }
                }
            }
        }

        let (index, best_cost) = best.ok_or(RegistrationError::EmptyOverlap)?;
        if !best_cost.is_finite() {
            return Err(RegistrationError::NotConverged(format!(
                "best cost is {}",
                best_cost
            )));
        }

        let mut offset = [0.0f64; 3];
        for axis in 0..3 {
            let integer = index[axis] as i64 - radius[axis];
            let mut refined = integer as f64;
            if index[axis] > 0 && index[axis] + 1 < extent[axis] {
                let mut before = index;
                let mut after = index;
                before[axis] -= 1;
                after[axis] += 1;
                if let (Some(b), Some(a)) = (
                    costs[[before[0], before[1], before[2]]],
                    costs[[after[0], after[1], after[2]]],
                ) {
                    refined += parabola_vertex(b, best_cost, a);
                }
            }
            offset[axis] = refined;
        }

        let translation = Translation::new(offset[0], offset[1], offset[2]);
        trace!("Cost landscape evaluated over {:?} candidates", extent);
        debug!(
            "Solved translation {:?} ({:?}, cost {:.6})",
            translation, metric, best_cost
        );
        Ok(translation)
    }
}
