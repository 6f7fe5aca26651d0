use std::path::PathBuf;

use thiserror::Error;

/// Invalid or contradictory options.
///
/// Always fatal, and always raised before any tile is read.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    /// The correlation search band must be strictly positive
    #[error("Search band size must be > 0, got {0}")]
    NonPositiveSearchBand(i64),

    /// A grid dimension is zero
    #[error("Invalid grid dimensions: {rows} rows x {columns} columns")]
    InvalidGrid { rows: usize, columns: usize },

    /// Unknown starting corner name
    #[error(
        "Unknown starting corner '{0}' (expected top-left, top-right, bottom-left or bottom-right)"
    )]
    UnknownCorner(String),

    /// Nominal overlap does not fit inside a tile
    #[error("Overlap of {overlap} px along {axis} does not fit a tile of {extent} px")]
    OverlapOutOfRange {
        axis: &'static str,
        overlap: usize,
        extent: usize,
    },

    /// Blend mode requested with an empty blend band
    #[error("Blend mode requires a blend width > 0")]
    EmptyBlendBand,

    /// Output bit depth the writer cannot produce
    #[error("Unsupported output bit depth: {0} (expected 8 or 16)")]
    UnsupportedBitDepth(u8),

    /// Worker pool needs at least one worker
    #[error("Worker count must be > 0")]
    NoWorkers,

    /// Planar stitching cannot pick a concatenation axis
    #[error("Ambiguous planar offset ({dy}, {dx}): both axes have the same magnitude")]
    AmbiguousPlanarOffset { dy: f64, dx: f64 },

    /// Any other invalid option
    #[error("{0}")]
    Invalid(String),
}

/// Missing or unreadable input data, and output write failures.
#[derive(Debug, Error)]
pub enum DataError {
    /// No tile directory matched the input listing
    #[error("No tiles found under {dir} with prefix '{prefix}'")]
    NoTiles { dir: PathBuf, prefix: String },

    /// A tile source was handed to a stitcher without any tile
    #[error("Tile source holds no tiles")]
    EmptySource,

    /// The declared grid does not match the discovered tiles
    #[error("Grid of {rows}x{columns} expects {expected} tiles, found {found}")]
    TileCountMismatch {
        rows: usize,
        columns: usize,
        expected: usize,
        found: usize,
    },

    /// Tile directory absent or contains no slice files
    #[error("No slices found in tile directory {0}")]
    EmptyTile(PathBuf),

    /// Requested tile index outside the source
    #[error("Tile {index} not found (source holds {count} tiles)")]
    TileNotFound { index: usize, count: usize },

    /// Requested slice index outside the tile
    #[error("Slice {index} out of range for tile {tile} ({depth} slices)")]
    SliceOutOfRange {
        tile: usize,
        index: usize,
        depth: usize,
    },

    /// Slices of one set do not share the same dimensions
    #[error("Slice {path} has dimensions {actual:?}, expected {expected:?}")]
    InconsistentSlice {
        path: PathBuf,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// Image decoding failed
    #[error("Failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    /// Image encoding failed
    #[error("Failed to encode {path}: {message}")]
    Encode { path: PathBuf, message: String },

    /// Filesystem error
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DataError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DataError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures of a single registration solve.
///
/// Recoverable: the registrar substitutes the nominal offset and records a
/// diagnostic instead of aborting the run.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistrationError {
    /// The solver ran past its deadline
    #[error("Registration timed out after {0:?}")]
    TimedOut(std::time::Duration),

    /// No candidate translation left enough overlapping voxels
    #[error("No usable overlap between the two volumes")]
    EmptyOverlap,

    /// The solver finished without a finite optimum
    #[error("Registration did not converge: {0}")]
    NotConverged(String),

    /// The worker running the solve panicked or was cancelled
    #[error("Registration worker failed: {0}")]
    Worker(String),
}

/// Top-level error for a stitching run.
#[derive(Debug, Error)]
pub enum StitchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Missing data: {0}")]
    Data(#[from] DataError),

    #[error("Registration failed: {0}")]
    Registration(#[from] RegistrationError),

    /// Report serialization failed
    #[error("Report error: {0}")]
    Report(#[from] serde_json::Error),
}

impl StitchError {
    /// Process exit code for this error class.
    pub fn exit_code(&self) -> u8 {
        match self {
            StitchError::Config(_) => 2,
            StitchError::Data(DataError::Io { .. })
            | StitchError::Data(DataError::Encode { .. }) => 4,
            StitchError::Data(_) => 3,
            StitchError::Registration(_) | StitchError::Report(_) => 1,
        }
    }
}
