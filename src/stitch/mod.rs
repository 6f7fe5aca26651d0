//! Volume stitching.
//!
//! - [`axis`]: tiles stacked along the depth axis, emitted slice by slice
//! - [`grid`]: a rectangular grid of laterally overlapping tiles

pub mod axis;
pub mod grid;

pub use axis::{
    AxisState, AxisStitchOptions, AxisStitchReport, AxisStitcher, BlendWeighting,
    CompositingMode, EmittedSlice, OverlapEstimate, DEFAULT_SEARCH_BAND, MAX_CORRELATION_RADIUS,
};
pub use grid::{GridCompositor, GridOptions, GridReport, Placement, RowPlacement};
