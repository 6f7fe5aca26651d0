//! # Tile Stitcher
//!
//! Assembles large 3D volumes from overlapping sub-volumes ("tiles"), each
//! stored on disk as an ordered sequence of 2D slices.
//!
//! ## Features
//!
//! - **Depth-axis stitching**: tiles stacked along the slice axis, overlap
//!   measured by band correlation, committed by cut-over or blending
//! - **Grid stitching**: a rectangular grid of laterally overlapping tiles,
//!   registered pairwise and chained, with fractional slice interpolation
//! - **Planar stitching**: two overlapping images and a supposed offset
//! - **Lazy slice access**: slices are decoded on demand through an LRU cache
//!   and emitted one at a time
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`volume`] - Volume, slice band and crop geometry types
//! - [`transform`] - Translations, chained transformations and resampling
//! - [`threshold`] - Otsu thresholding and foreground masks
//! - [`correlation`] - Band correlation between slice stacks
//! - [`grid`] - Serpentine ordering of tile grids
//! - [`io`] - Slice sets, tile sources, slice sinks and the slice cache
//! - [`registration`] - Translation solver and pairwise tile registration
//! - [`stitch`] - Depth-axis and grid stitchers
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tile_stitcher::{discover_tiles, AxisStitchOptions, AxisStitcher, DirectorySink};
//! use tile_stitcher::io::{BitDepth, SliceFormat};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tile_stitcher::StitchError> {
//!     let source = discover_tiles("/data/tiles", "tile_")?;
//!     let mut sink = DirectorySink::create("/data/out", "stitched_", SliceFormat::Tiff, BitDepth::Sixteen)?;
//!
//!     let options = AxisStitchOptions { delta_z: 80, ..AxisStitchOptions::default() };
//!     let mut stitcher = AxisStitcher::new(options)?;
//!     let report = stitcher.stitch(Arc::new(source), &mut sink).await?;
//!     println!("{} slices written", report.emitted.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod correlation;
pub mod error;
pub mod grid;
pub mod io;
pub mod pool;
pub mod registration;
pub mod report;
pub mod stitch;
pub mod threshold;
pub mod transform;
pub mod volume;

// Re-export commonly used types
pub use config::{AxisConfig, Cli, Command, GridConfig, PlanarConfig};
pub use correlation::{best_offset, best_slice, normalized_cross_correlation, BandMatch};
pub use error::{ConfigError, DataError, RegistrationError, StitchError};
pub use grid::{order, GridLayout, StartingCorner};
pub use io::{
    discover_tiles, open_cropped_volume, open_volume, save_volume, DirectorySink,
    DirectoryTileSource, MemorySink, MemoryTileSource, SliceCache, SliceSink, TileSource,
};
pub use registration::{
    stitch_planar_pair, ExhaustiveTranslationSolver, PairwiseTileRegistrar, RegistrationOptions,
    SimilarityMetric, TranslationSolver,
};
pub use report::{Diagnostic, Stage, StageTimings};
pub use stitch::{
    AxisStitchOptions, AxisStitchReport, AxisStitcher, GridCompositor, GridOptions, GridReport,
};
pub use threshold::ForegroundMask;
pub use transform::{prefix_compose, Transformation, Translation};
pub use volume::{Bounds, Volume};
