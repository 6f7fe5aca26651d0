//! In-memory volume types.
//!
//! A [`Volume`] is a dense 3D array of `f32` intensities with axes
//! `(depth, height, width)`. Slices are 2D `(height, width)` arrays and a
//! [`SliceBand`] is a read-only depth sub-range of a volume.
//!
//! Cropping geometry is expressed with [`Bounds`]: one inclusive
//! [`AxisRange`] per axis, where `-1` means "up to the last index" and other
//! negative values count from the end.

mod convert;

use std::ops::Range;

use ndarray::{s, Array2, Array3, ArrayView3};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub use convert::interpolate_slices;

/// Dense 3D intensity array, axes `(depth, height, width)`.
pub type Volume = Array3<f32>;

/// One 2D slice, axes `(height, width)`.
pub type Slice = Array2<f32>;

/// Read-only depth sub-range of a [`Volume`].
pub type SliceBand<'a> = ArrayView3<'a, f32>;

/// Borrow `len` slices of `volume` starting at `start`, clamped to the volume.
pub fn band(volume: &Volume, start: usize, len: usize) -> SliceBand<'_> {
    let depth = volume.dim().0;
    let start = start.min(depth);
    let end = (start + len).min(depth);
    volume.slice(s![start..end, .., ..])
}

// =============================================================================
// Cropping Bounds
// =============================================================================

/// Inclusive index range along one axis.
///
/// Negative values count from the end of the axis, so `-1` is the last index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisRange {
    pub start: i64,
    pub end: i64,
}

impl AxisRange {
    /// Range `[start, end]`, both inclusive.
    pub const fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// The whole axis.
    pub const fn full() -> Self {
        Self { start: 0, end: -1 }
    }

    /// The last `count` indices of the axis.
    pub fn last(count: usize) -> Self {
        Self {
            start: -(count as i64),
            end: -1,
        }
    }

    /// The first `count` indices of the axis.
    pub fn first(count: usize) -> Self {
        Self {
            start: 0,
            end: count as i64 - 1,
        }
    }

    /// Resolve against an axis of length `len` into a half-open range.
    ///
    /// The end is clamped to the axis; an empty or inverted range is an error.
    pub fn resolve(&self, len: usize) -> Result<Range<usize>, ConfigError> {
        let len_i = len as i64;
        let start = if self.start < 0 {
            (len_i + self.start).max(0)
        } else {
            self.start
        };
        let end = if self.end < 0 {
            len_i + self.end
        } else {
            self.end.min(len_i - 1)
        };

        if len == 0 || start > end || start >= len_i {
            return Err(ConfigError::Invalid(format!(
                "crop range [{}, {}] is empty on an axis of length {}",
                self.start, self.end, len
            )));
        }

        Ok(start as usize..(end + 1) as usize)
    }
}

impl Default for AxisRange {
    fn default() -> Self {
        Self::full()
    }
}

/// Per-axis crop of a volume, in `(depth, height, width)` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub depth: AxisRange,
    pub height: AxisRange,
    pub width: AxisRange,
}

impl Bounds {
    /// Bounds covering the whole volume.
    pub const fn full() -> Self {
        Self {
            depth: AxisRange::full(),
            height: AxisRange::full(),
            width: AxisRange::full(),
        }
    }

    /// Replace the width range.
    pub fn with_width(mut self, width: AxisRange) -> Self {
        self.width = width;
        self
    }

    /// Replace the height range.
    pub fn with_height(mut self, height: AxisRange) -> Self {
        self.height = height;
        self
    }

    /// Replace the depth range.
    pub fn with_depth(mut self, depth: AxisRange) -> Self {
        self.depth = depth;
        self
    }

    /// Resolve all three axes against a `(depth, height, width)` shape.
    pub fn resolve(
        &self,
        shape: (usize, usize, usize),
    ) -> Result<[Range<usize>; 3], ConfigError> {
        Ok([
            self.depth.resolve(shape.0)?,
            self.height.resolve(shape.1)?,
            self.width.resolve(shape.2)?,
        ])
    }
}

/// Copy the region of `volume` selected by `bounds`.
pub fn crop(volume: &Volume, bounds: &Bounds) -> Result<Volume, ConfigError> {
    let [d, h, w] = bounds.resolve(volume.dim())?;
    Ok(volume.slice(s![d, h, w]).to_owned())
}
