//! Configuration management for the tile stitcher.
//!
//! This module provides the command-line interface:
//! - Subcommands `axis`, `grid` and `planar` via clap
//! - Environment variables with the `STITCH_` prefix
//! - Defaults for every optional setting
//!
//! # Example
//!
//! ```ignore
//! use tile_stitcher::config::{Cli, Command};
//!
//! let cli = Cli::parse();
//! match cli.into_command() {
//!     Command::Axis(config) => println!("delta_z = {}", config.delta_z),
//!     Command::Grid(config) => println!("{} x {}", config.rows, config.columns),
//!     Command::Planar(config) => println!("{}", config.output.display()),
//! }
//! ```
//!
//! # Environment Variables
//!
//! Every option can also be set with a `STITCH_` variable, for example:
//!
//! - `STITCH_VERBOSE` - Debug logging and stage timings (default: false)
//! - `STITCH_WORKERS` - Concurrent registrations (default: available cores)
//! - `STITCH_DELTA_Z` - Nominal displacement between stacked tiles
//! - `STITCH_SEARCH_BAND` - Half-height of the correlation bands (default: 10)
//! - `STITCH_ROWS` / `STITCH_COLUMNS` - Grid dimensions
//! - `STITCH_OVERLAP_WIDTH` / `STITCH_OVERLAP_HEIGHT` - Nominal grid overlaps
//! - `STITCH_CORNER` - Starting corner of the acquisition (default: top-left)
//! - `STITCH_BIT_DEPTH` - Output bit depth, 8 or 16 (default: 16)

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::error::ConfigError;
use crate::grid::StartingCorner;
use crate::io::{BitDepth, SliceFormat, TransferMode};
use crate::registration::{
    default_workers, ExhaustiveTranslationSolver, PlanarLayout, PlanarOptions,
    RegistrationOptions, SimilarityMetric, DEFAULT_SEARCH_RADIUS,
};
use crate::stitch::{
    AxisStitchOptions, BlendWeighting, CompositingMode, GridOptions, DEFAULT_SEARCH_BAND,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default prefix of emitted slice files.
pub const DEFAULT_OUTPUT_PREFIX: &str = "stitched_";

/// Default number of slices in a blend band.
pub const DEFAULT_BLEND_WIDTH: usize = 4;

/// Default output bit depth.
pub const DEFAULT_BIT_DEPTH: u8 = 16;

/// Default registration time limit in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Tile Stitcher - assembles 3D volumes from overlapping slice stacks.
#[derive(Parser, Debug, Clone)]
#[command(name = "tile-stitcher")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

/// Stitching modes.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Stitch tiles stacked along the depth axis
    Axis(AxisConfig),

    /// Stitch a rectangular grid of laterally overlapping tiles
    Grid(GridConfig),

    /// Stitch two overlapping 2D images
    Planar(PlanarConfig),
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Enable verbose logging (debug level) and stage timings.
    #[arg(short, long, default_value_t = false, env = "STITCH_VERBOSE")]
    pub verbose: bool,

    /// Concurrent registrations (defaults to the available cores).
    #[arg(long, env = "STITCH_WORKERS")]
    pub workers: Option<usize>,

    /// Write a JSON run report to this file.
    #[arg(long, env = "STITCH_REPORT")]
    pub report: Option<PathBuf>,

    /// Print the effective options as JSON before running.
    #[arg(long, default_value_t = false)]
    pub options_json: bool,
}

impl CommonArgs {
    pub fn workers(&self) -> usize {
        self.workers.unwrap_or_else(default_workers)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == Some(0) {
            return Err(ConfigError::NoWorkers);
        }
        Ok(())
    }
}

/// Output slice settings.
#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// Directory receiving the stitched slices.
    #[arg(short, long, env = "STITCH_OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// File name prefix of the stitched slices.
    #[arg(long, default_value = DEFAULT_OUTPUT_PREFIX, env = "STITCH_OUTPUT_PREFIX")]
    pub output_prefix: String,

    /// Format of written slices.
    #[arg(long, value_enum, default_value_t = SliceFormat::Tiff, env = "STITCH_FORMAT")]
    pub format: SliceFormat,

    /// Output bit depth (8 or 16).
    #[arg(long, default_value_t = DEFAULT_BIT_DEPTH, env = "STITCH_BIT_DEPTH")]
    pub bit_depth: u8,
}

impl OutputArgs {
    pub fn bit_depth(&self) -> Result<BitDepth, ConfigError> {
        BitDepth::try_from(self.bit_depth)
    }
}

/// Registration solver settings.
#[derive(Args, Debug, Clone)]
pub struct SolverArgs {
    /// Similarity metric of the translation solver.
    #[arg(long, value_enum, default_value_t = SimilarityMetric::MeanSquares, env = "STITCH_METRIC")]
    pub metric: SimilarityMetric,

    /// Round registered offsets to whole voxels.
    #[arg(long, default_value_t = false, env = "STITCH_INTEGER_OFFSETS")]
    pub integer_offsets: bool,

    /// Search radius of the solver, in voxels per axis.
    #[arg(long, default_value_t = DEFAULT_SEARCH_RADIUS, env = "STITCH_SEARCH_RADIUS")]
    pub search_radius: usize,

    /// Time limit of one registration, in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, env = "STITCH_TIMEOUT")]
    pub timeout: u64,
}

impl SolverArgs {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout == 0 {
            return Err(ConfigError::Invalid(
                "registration timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

// =============================================================================
// Axis Command
// =============================================================================

/// Stitch tiles stacked along the depth axis.
#[derive(Args, Debug, Clone)]
pub struct AxisConfig {
    /// Directory holding one sub-directory per tile.
    #[arg(env = "STITCH_INPUT_DIR")]
    pub input_dir: PathBuf,

    /// Only tile directories starting with this prefix are used.
    #[arg(long, default_value = "", env = "STITCH_TILE_PREFIX")]
    pub tile_prefix: String,

    /// Nominal displacement between consecutive tiles, in slices.
    #[arg(long, env = "STITCH_DELTA_Z")]
    pub delta_z: usize,

    /// Half-height of the correlation bands, in slices.
    #[arg(long, default_value_t = DEFAULT_SEARCH_BAND, env = "STITCH_SEARCH_BAND", allow_hyphen_values = true)]
    pub search_band: i64,

    /// Trust delta_z instead of measuring the overlap.
    #[arg(long, default_value_t = false, env = "STITCH_NO_BEST_SLICE")]
    pub no_best_slice: bool,

    /// How overlapping slices are committed.
    #[arg(long, value_enum, default_value_t = CompositingMode::CutOver, env = "STITCH_MODE")]
    pub mode: CompositingMode,

    /// Slices in a blend band.
    #[arg(long, default_value_t = DEFAULT_BLEND_WIDTH, env = "STITCH_BLEND_WIDTH")]
    pub blend_width: usize,

    /// Weights inside a blend band.
    #[arg(long, value_enum, default_value_t = BlendWeighting::Mean, env = "STITCH_WEIGHTING")]
    pub weighting: BlendWeighting,

    /// Copy or move slice files that are emitted unchanged.
    #[arg(long, value_enum, default_value_t = TransferMode::Copy, env = "STITCH_TRANSFER")]
    pub transfer: TransferMode,

    /// Slice files are numbered from top to bottom.
    #[arg(long, default_value_t = false, env = "STITCH_FLIP")]
    pub flip: bool,

    #[command(flatten)]
    pub output: OutputArgs,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl AxisConfig {
    /// Validate the configuration before any tile is read.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.common.validate()?;
        self.output.bit_depth()?;
        self.options().validate()
    }

    pub fn options(&self) -> AxisStitchOptions {
        AxisStitchOptions {
            delta_z: self.delta_z,
            search_band: self.search_band,
            look_for_best_slice: !self.no_best_slice,
            mode: self.mode,
            blend_width: self.blend_width,
            weighting: self.weighting,
            transfer: self.transfer,
            flip: self.flip,
            workers: self.common.workers(),
            verbose: self.common.verbose,
        }
    }
}

// =============================================================================
// Grid Command
// =============================================================================

/// Stitch a rectangular grid of tiles.
#[derive(Args, Debug, Clone)]
pub struct GridConfig {
    /// Directory holding one sub-directory per tile.
    #[arg(env = "STITCH_INPUT_DIR")]
    pub input_dir: PathBuf,

    /// Only tile directories starting with this prefix are used.
    #[arg(long, default_value = "", env = "STITCH_TILE_PREFIX")]
    pub tile_prefix: String,

    /// Tiles along the height axis.
    #[arg(long, env = "STITCH_ROWS")]
    pub rows: usize,

    /// Tiles along the width axis.
    #[arg(long, env = "STITCH_COLUMNS")]
    pub columns: usize,

    /// Corner where the acquisition started.
    #[arg(long, value_enum, default_value_t = StartingCorner::TopLeft, env = "STITCH_CORNER")]
    pub corner: StartingCorner,

    /// Nominal overlap between horizontal neighbours, in pixels.
    #[arg(long, env = "STITCH_OVERLAP_WIDTH")]
    pub overlap_width: usize,

    /// Nominal overlap between vertical neighbours, in pixels.
    #[arg(long, env = "STITCH_OVERLAP_HEIGHT")]
    pub overlap_height: usize,

    /// Keep the assembled rows in this directory instead of a temporary one.
    #[arg(long, env = "STITCH_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    #[command(flatten)]
    pub solver: SolverArgs,

    #[command(flatten)]
    pub output: OutputArgs,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl GridConfig {
    /// Validate the configuration before any tile is read.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.common.validate()?;
        self.solver.validate()?;
        self.output.bit_depth()?;
        self.options().validate()
    }

    pub fn options(&self) -> GridOptions {
        GridOptions {
            rows: self.rows,
            columns: self.columns,
            corner: self.corner,
            overlap_width: self.overlap_width,
            overlap_height: self.overlap_height,
            registration: RegistrationOptions {
                metric: self.solver.metric,
                integer_offsets: self.solver.integer_offsets,
                workers: self.common.workers(),
                timeout: self.solver.timeout(),
            },
            work_dir: self.work_dir.clone(),
            verbose: self.common.verbose,
        }
    }

    pub fn solver(&self) -> ExhaustiveTranslationSolver {
        ExhaustiveTranslationSolver::with_radius(self.solver.search_radius)
    }
}

// =============================================================================
// Planar Command
// =============================================================================

/// Stitch two overlapping 2D images.
#[derive(Args, Debug, Clone)]
pub struct PlanarConfig {
    /// Reference image.
    pub reference: PathBuf,

    /// Image placed relative to the reference.
    pub moving: PathBuf,

    /// Stitched image to write.
    #[arg(short, long, env = "STITCH_OUTPUT")]
    pub output: PathBuf,

    /// Supposed vertical offset: feature row in moving minus in reference.
    #[arg(long, allow_hyphen_values = true)]
    pub offset_y: f64,

    /// Supposed horizontal offset: feature column in moving minus in reference.
    #[arg(long, allow_hyphen_values = true)]
    pub offset_x: f64,

    /// Similarity metric of the translation solver.
    #[arg(long, value_enum, default_value_t = SimilarityMetric::Correlation, env = "STITCH_METRIC")]
    pub metric: SimilarityMetric,

    /// Round the placement to whole pixels.
    #[arg(long, default_value_t = false, env = "STITCH_INTEGER_OFFSETS")]
    pub integer_offsets: bool,

    /// Search radius of the solver around the supposed offset, in pixels.
    #[arg(long, default_value_t = DEFAULT_SEARCH_RADIUS, env = "STITCH_SEARCH_RADIUS")]
    pub search_radius: usize,

    /// Time limit of the registration, in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, env = "STITCH_TIMEOUT")]
    pub timeout: u64,

    /// Output bit depth (8 or 16).
    #[arg(long, default_value_t = DEFAULT_BIT_DEPTH, env = "STITCH_BIT_DEPTH")]
    pub bit_depth: u8,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl PlanarConfig {
    /// Validate the configuration before any image is read.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.common.validate()?;
        BitDepth::try_from(self.bit_depth)?;
        if self.timeout == 0 {
            return Err(ConfigError::Invalid(
                "registration timeout must be > 0".to_string(),
            ));
        }
        self.layout().map(|_| ())
    }

    pub fn layout(&self) -> Result<PlanarLayout, ConfigError> {
        PlanarLayout::from_offset(self.offset_y, self.offset_x)
    }

    pub fn supposed_offset(&self) -> (f64, f64) {
        (self.offset_y, self.offset_x)
    }

    pub fn options(&self) -> PlanarOptions {
        PlanarOptions {
            metric: self.metric,
            integer_offsets: self.integer_offsets,
        }
    }

    /// Solver searching the image plane only.
    pub fn solver(&self) -> ExhaustiveTranslationSolver {
        ExhaustiveTranslationSolver::new([0, self.search_radius, self.search_radius])
    }
}

// =============================================================================
// Tests
// =============================================================================
