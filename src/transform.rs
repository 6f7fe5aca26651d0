//! Translations, their composition, and translation resampling.
//!
//! Offsets follow the volume axis order `(z, y, x)`. A [`Translation`] `t`
//! between a reference and a moving volume means the moving content shifted
//! by `t` lands on the reference: `reference(p) ≈ moving(p - t)`.
//!
//! Pairwise registrations along a row (or between rows) are chained with
//! [`prefix_compose`] so every tile is placed relative to the first one.

use std::ops::{Add, Neg, Sub};

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::volume::{Slice, Volume};

// =============================================================================
// Translation
// =============================================================================

/// Real-valued offset in `(z, y, x)` order.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Translation {
    pub z: f64,
    pub y: f64,
    pub x: f64,
}

impl Translation {
    pub const ZERO: Translation = Translation {
        z: 0.0,
        y: 0.0,
        x: 0.0,
    };

    pub const fn new(z: f64, y: f64, x: f64) -> Self {
        Self { z, y, x }
    }

    /// In-plane offset with no depth component.
    pub const fn planar(y: f64, x: f64) -> Self {
        Self { z: 0.0, y, x }
    }

    /// Round every axis to the nearest whole voxel.
    pub fn rounded(self) -> Self {
        Self {
            z: self.z.round(),
            y: self.y.round(),
            x: self.x.round(),
        }
    }

    /// Same offset with the depth component cleared.
    pub fn without_depth(self) -> Self {
        Self { z: 0.0, ..self }
    }

    pub fn is_integer(&self) -> bool {
        self.z.fract() == 0.0 && self.y.fract() == 0.0 && self.x.fract() == 0.0
    }

    pub fn is_finite(&self) -> bool {
        self.z.is_finite() && self.y.is_finite() && self.x.is_finite()
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.z, self.y, self.x]
    }
}

impl Add for Translation {
    type Output = Translation;

    fn add(self, rhs: Translation) -> Translation {
        Translation::new(self.z + rhs.z, self.y + rhs.y, self.x + rhs.x)
    }
}

impl Sub for Translation {
    type Output = Translation;

    fn sub(self, rhs: Translation) -> Translation {
        Translation::new(self.z - rhs.z, self.y - rhs.y, self.x - rhs.x)
    }
}

impl Neg for Translation {
    type Output = Translation;

    fn neg(self) -> Translation {
        Translation::new(-self.z, -self.y, -self.x)
    }
}

// =============================================================================
// Transformation
// =============================================================================

/// Ordered composition of translations.
///
/// Steps are kept so reports can show how a chained placement was built;
/// [`Transformation::offset`] collapses them into one translation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Transformation {
    steps: Vec<Translation>,
}

impl Transformation {
    /// The identity transformation.
    pub fn identity() -> Self {
        Self { steps: Vec::new() }
    }

    /// A single translation step.
    pub fn translation(offset: Translation) -> Self {
        Self {
            steps: vec![offset],
        }
    }

    /// Apply `self`, then `next`.
    pub fn then(&self, next: &Transformation) -> Transformation {
        let mut steps = self.steps.clone();
        steps.extend_from_slice(&next.steps);
        Transformation { steps }
    }

    /// Net translation of all steps.
    pub fn offset(&self) -> Translation {
        self.steps
            .iter()
            .fold(Translation::ZERO, |acc, step| acc + *step)
    }

    pub fn steps(&self) -> &[Translation] {
        &self.steps
    }

    pub fn is_identity(&self) -> bool {
        self.offset() == Translation::ZERO
    }

    /// Round the net translation of every axis to whole voxels.
    pub fn rounded(&self) -> Transformation {
        Transformation::translation(self.offset().rounded())
    }

    /// Resample `volume` by the net translation.
    pub fn apply(&self, volume: &Volume) -> Volume {
        translate_volume(volume, self.offset())
    }
}

impl From<Translation> for Transformation {
    fn from(offset: Translation) -> Self {
        Transformation::translation(offset)
    }
}

/// Chain pairwise transformations into placements relative to the first item.
///
/// Returns `pairwise.len() + 1` transformations: the identity for the anchor,
/// then `pairwise[0]`, `pairwise[0].then(pairwise[1])`, and so on.
pub fn prefix_compose(pairwise: &[Transformation]) -> Vec<Transformation> {
    let mut chained = Vec::with_capacity(pairwise.len() + 1);
    let mut current = Transformation::identity();
    chained.push(current.clone());
    for step in pairwise {
        current = current.then(step);
        chained.push(current.clone());
    }
    chained
}

// =============================================================================
// Resampling
// =============================================================================

/// Resample `volume` so that `out(p) = volume(p - offset)` with trilinear
/// interpolation. Samples outside the input are zero.
pub fn translate_volume(volume: &Volume, offset: Translation) -> Volume {
    let (d, h, w) = volume.dim();
    if offset.is_integer() {
        let (oz, oy, ox) = (offset.z as i64, offset.y as i64, offset.x as i64);
        return Volume::from_shape_fn((d, h, w), |(z, y, x)| {
            let (sz, sy, sx) = (z as i64 - oz, y as i64 - oy, x as i64 - ox);
            if sz < 0 || sy < 0 || sx < 0 || sz >= d as i64 || sy >= h as i64 || sx >= w as i64 {
                0.0
            } else {
                volume[[sz as usize, sy as usize, sx as usize]]
            }
        });
    }

    Volume::from_shape_fn((d, h, w), |(z, y, x)| {
        trilinear_sample(
            volume,
            z as f64 - offset.z,
            y as f64 - offset.y,
            x as f64 - offset.x,
        )
    })
}

/// Shift a slice in-plane so that `out(y, x) = slice(y - dy, x - dx)`.
pub fn shift_slice(slice: ArrayView2<f32>, dy: f64, dx: f64) -> Slice {
    let (h, w) = slice.dim();
    Array2::from_shape_fn((h, w), |(y, x)| {
        bilinear_sample(slice, y as f64 - dy, x as f64 - dx)
    })
}

/// Bilinear sample at a fractional position, zero outside the slice.
pub fn bilinear_sample(slice: ArrayView2<f32>, y: f64, x: f64) -> f32 {
    let (h, w) = slice.dim();
    if h == 0 || w == 0 || y < 0.0 || x < 0.0 || y > (h - 1) as f64 || x > (w - 1) as f64 {
        return 0.0;
    }

    let y0 = y.floor() as usize;
    let x0 = x.floor() as usize;
    let y1 = (y0 + 1).min(h - 1);
    let x1 = (x0 + 1).min(w - 1);
    let fy = (y - y0 as f64) as f32;
    let fx = (x - x0 as f64) as f32;

    let top = slice[[y0, x0]] * (1.0 - fx) + slice[[y0, x1]] * fx;
    let bottom = slice[[y1, x0]] * (1.0 - fx) + slice[[y1, x1]] * fx;
    top * (1.0 - fy) + bottom * fy
}

fn trilinear_sample(volume: &Volume, z: f64, y: f64, x: f64) -> f32 {
    let d = volume.dim().0;
    if d == 0 || z < 0.0 || z > (d - 1) as f64 {
        return 0.0;
    }
    let z0 = z.floor() as usize;
    let z1 = (z0 + 1).min(d - 1);
    let fz = (z - z0 as f64) as f32;

    let lower = bilinear_sample(volume.index_axis(ndarray::Axis(0), z0), y, x);
    if fz == 0.0 {
        return lower;
    }
    let upper = bilinear_sample(volume.index_axis(ndarray::Axis(0), z1), y, x);
    lower * (1.0 - fz) + upper * fz
}
