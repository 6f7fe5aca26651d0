//! Translation registration between tiles.
//!
//! - [`solver`]: the solver seam and the built-in exhaustive solver
//! - [`pairwise`]: lateral registration of adjacent tiles on a worker pool
//! - [`planar`]: two-image stitching with a supposed offset

pub mod pairwise;
pub mod planar;
pub mod solver;

pub use pairwise::{
    default_workers, Adjacency, OverlapGeometry, PairRegistration, PairwiseResults,
    PairwiseTileRegistrar, RegistrationOptions, TilePair, DEFAULT_REGISTRATION_TIMEOUT,
};
pub use planar::{stitch_planar_pair, PlanarLayout, PlanarOptions, PlanarStitch};
pub use solver::{
    Deadline, ExhaustiveTranslationSolver, SimilarityMetric, TranslationSolver,
    DEFAULT_SEARCH_RADIUS,
};
