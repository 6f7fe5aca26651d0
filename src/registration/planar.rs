//! Stitching of two overlapping 2D images.
//!
//! The caller provides the supposed offset between the images: the position
//! of a feature in the moving image minus its position in the reference
//! image. The moving image is pre-shifted by that guess, the residual is
//! registered with the correlation metric, and the pair is concatenated
//! along the axis where the offset is largest.

use ndarray::{s, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::solver::{Deadline, SimilarityMetric, TranslationSolver};
use crate::error::{ConfigError, StitchError};
use crate::report::{Diagnostic, Stage};
use crate::threshold::ForegroundMask;
use crate::transform::{bilinear_sample, shift_slice, Translation};
use crate::volume::Slice;

/// Where the moving image ends up relative to the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanarLayout {
    MovingAbove,
    MovingBelow,
    MovingLeft,
    MovingRight,
}

impl PlanarLayout {
    /// Layout implied by a supposed `(dy, dx)` offset.
    ///
    /// Equal magnitudes, including diagonal offsets, do not pick an axis.
    pub fn from_offset(dy: f64, dx: f64) -> Result<Self, ConfigError> {
        if !dy.is_finite() || !dx.is_finite() || dy.abs() == dx.abs() {
            return Err(ConfigError::AmbiguousPlanarOffset { dy, dx });
        }
        Ok(if dy.abs() > dx.abs() {
            if dy > 0.0 {
                PlanarLayout::MovingAbove
            } else {
                PlanarLayout::MovingBelow
            }
        } else if dx > 0.0 {
            PlanarLayout::MovingLeft
        } else {
            PlanarLayout::MovingRight
        })
    }

    pub fn is_vertical(self) -> bool {
        matches!(self, PlanarLayout::MovingAbove | PlanarLayout::MovingBelow)
    }
}

/// Options of a planar stitch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanarOptions {
    pub metric: SimilarityMetric,
    /// Round the registered placement to whole pixels
    pub integer_offsets: bool,
}

impl Default for PlanarOptions {
    fn default() -> Self {
        Self {
            metric: SimilarityMetric::Correlation,
            integer_offsets: false,
        }
    }
}

/// Result of [`stitch_planar_pair`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlanarStitch {
    pub image: Slice,
    pub layout: PlanarLayout,
    /// Placement of the moving image in the reference frame
    pub placement: Translation,
    /// Residual found by registration on top of the supposed offset
    pub residual: Translation,
    pub diagnostics: Vec<Diagnostic>,
}

/// Register `moving` against `reference` and concatenate them.
///
/// `supposed_offset` is `(dy, dx)`; its larger component decides between
/// vertical and horizontal concatenation and its sign decides the side. The
/// canvas spans both images along that axis and the reference along the
/// other one. The reference wins where the two images overlap.
///
/// A failed registration keeps the supposed offset and is reported as a
/// diagnostic.
pub fn stitch_planar_pair(
    reference: &Slice,
    moving: &Slice,
    supposed_offset: (f64, f64),
    solver: &dyn TranslationSolver,
    options: &PlanarOptions,
    deadline: &Deadline,
) -> Result<PlanarStitch, StitchError> {
    let (dy, dx) = supposed_offset;
    let layout = PlanarLayout::from_offset(dy, dx)?;
    if reference.is_empty() || moving.is_empty() {
        return Err(ConfigError::Invalid("planar images must not be empty".to_string()).into());
    }

    // Moving pixel q lands on reference pixel q + initial.
    let initial = Translation::planar(-dy, -dx);
    let shifted = shift_slice(moving.view(), initial.y, initial.x);
    let coverage = shift_slice(Array2::from_elem(moving.raw_dim(), 1.0f32).view(), initial.y, initial.x);

    let shifted = shifted.insert_axis(Axis(0));
    let coverage = ForegroundMask::from_threshold(coverage.view().insert_axis(Axis(0)), 0.999);
    let reference_volume = reference.view().insert_axis(Axis(0)).to_owned();

    let mut diagnostics = Vec::new();
    let residual = match solver.solve_translation(
        &shifted,
        &reference_volume,
        Some(&coverage),
        None,
        options.metric,
        deadline,
    ) {
        Ok(residual) => residual.without_depth(),
        Err(e) => {
            warn!("Planar registration failed: {}; keeping the supposed offset", e);
            diagnostics.push(Diagnostic::new(
                Stage::Planar,
                (0, 1),
                e.to_string(),
                "supposed offset",
            ));
            Translation::ZERO
        }
    };

    let mut placement = initial + residual;
    if options.integer_offsets {
        placement = placement.rounded();
    }
    info!(
        "Planar stitch {:?}: supposed ({}, {}), placement ({:.3}, {:.3})",
        layout, dy, dx, placement.y, placement.x
    );

    let image = compose(reference, moving, placement, layout);
    Ok(PlanarStitch {
        image,
        layout,
        placement,
        residual,
        diagnostics,
    })
}

/// Union extent along one axis: `(start, end)` in reference coordinates.
fn union_extent(reference: usize, moving: usize, offset: f64) -> (i64, i64) {
    let start = (offset.floor() as i64).min(0);
    let end = ((offset + moving as f64).ceil() as i64).max(reference as i64);
    (start, end)
}

fn compose(reference: &Slice, moving: &Slice, placement: Translation, layout: PlanarLayout) -> Slice {
    let (rh, rw) = reference.dim();
    let (mh, mw) = moving.dim();

    let ((top, bottom), (left, right)) = if layout.is_vertical() {
        (union_extent(rh, mh, placement.y), (0, rw as i64))
    } else {
        ((0, rh as i64), union_extent(rw, mw, placement.x))
    };

    let height = (bottom - top) as usize;
    let width = (right - left) as usize;
    let mut canvas = Array2::from_shape_fn((height, width), |(cy, cx)| {
        let y = (cy as i64 + top) as f64 - placement.y;
        let x = (cx as i64 + left) as f64 - placement.x;
        bilinear_sample(moving.view(), y, x)
    });

    let (oy, ox) = ((-top) as usize, (-left) as usize);
    canvas
        .slice_mut(s![oy..oy + rh, ox..ox + rw])
        .assign(reference);
    canvas
}
