//! Slice interpolation.

use ndarray::{Array2, ArrayView2, Zip};

use super::Slice;

/// Linear blend of two slices: `(1 - weight) * first + weight * second`.
///
/// Weight 0 returns `first` and weight 1 returns `second` exactly.
pub fn interpolate_slices(first: ArrayView2<f32>, second: ArrayView2<f32>, weight: f32) -> Slice {
    if weight <= 0.0 {
        return first.to_owned();
    }
    if weight >= 1.0 {
        return second.to_owned();
    }
    let mut out = Array2::zeros(first.raw_dim());
    Zip::from(&mut out)
        .and(&first)
        .and(&second)
        .for_each(|o, &a, &b| *o = (1.0 - weight) * a + weight * b);
    out
}
