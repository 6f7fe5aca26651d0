//! Registration of adjacent tiles from their overlapping crops.
//!
//! Each pair is registered on the nominal overlap only: the rightmost
//! `overlap` columns of the left tile against the leftmost `overlap` columns
//! of the right tile (or the same on the height axis for rows). A perfectly
//! placed pair therefore registers to the zero translation, and the result
//! is the residual relative to the nominal grid placement.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::solver::{Deadline, SimilarityMetric, TranslationSolver};
use crate::error::{ConfigError, RegistrationError, StitchError};
use crate::io::TileSource;
use crate::pool::{run_blocking, JobOutcome};
use crate::report::{Diagnostic, Stage};
use crate::threshold::ForegroundMask;
use crate::transform::{Transformation, Translation};
use crate::volume::{AxisRange, Bounds};

/// Default per-pair registration time limit.
pub const DEFAULT_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Fallback recorded when a pair keeps its nominal placement.
pub const NOMINAL_FALLBACK: &str = "nominal offset (zero residual)";

// =============================================================================
// Options
// =============================================================================

/// Options shared by every pairwise registration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationOptions {
    pub metric: SimilarityMetric,

    /// Round every axis of the result to whole voxels
    pub integer_offsets: bool,

    /// Registrations running at once
    pub workers: usize,

    /// Time limit of one registration
    pub timeout: Duration,
}

impl Default for RegistrationOptions {
    fn default() -> Self {
        Self {
            metric: SimilarityMetric::default(),
            integer_offsets: false,
            workers: default_workers(),
            timeout: DEFAULT_REGISTRATION_TIMEOUT,
        }
    }
}

impl RegistrationOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "registration timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Available parallelism, or 1 when it cannot be determined.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

// =============================================================================
// Overlap Geometry
// =============================================================================

/// Which neighbours a pair of tiles are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Adjacency {
    /// Side by side, overlapping on the width axis
    Column,
    /// Stacked, overlapping on the height axis
    Row,
}

/// Crops compared when registering two neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlapGeometry {
    pub adjacency: Adjacency,
    /// Nominal overlap in pixels
    pub overlap: usize,
}

impl OverlapGeometry {
    pub fn columns(overlap: usize) -> Self {
        Self {
            adjacency: Adjacency::Column,
            overlap,
        }
    }

    pub fn rows(overlap: usize) -> Self {
        Self {
            adjacency: Adjacency::Row,
            overlap,
        }
    }

    /// Trailing `overlap` pixels of the reference (left or upper) tile.
    pub fn reference_crop(&self) -> Bounds {
        self.crop(AxisRange::last(self.overlap))
    }

    /// Leading `overlap` pixels of the moving (right or lower) tile.
    pub fn moving_crop(&self) -> Bounds {
        self.crop(AxisRange::first(self.overlap))
    }

    fn crop(&self, range: AxisRange) -> Bounds {
        match self.adjacency {
            Adjacency::Column => Bounds::full().with_width(range),
            Adjacency::Row => Bounds::full().with_height(range),
        }
    }
}

// =============================================================================
// Registrar
// =============================================================================

/// Pair of tiles to register, by index in a [`TileSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TilePair {
    pub reference: usize,
    pub moving: usize,
}

impl TilePair {
    pub fn new(reference: usize, moving: usize) -> Self {
        Self { reference, moving }
    }
}

/// Outcome of one pair registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairRegistration {
    pub pair: TilePair,
    pub transformation: Transformation,
    /// `true` when the registration failed and the nominal placement was kept
    pub fallback: bool,
}

/// Results of a batch of registrations, in pair order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PairwiseResults {
    pub registrations: Vec<PairRegistration>,
    pub diagnostics: Vec<Diagnostic>,
}

impl PairwiseResults {
    pub fn transformations(&self) -> Vec<Transformation> {
        self.registrations
            .iter()
            .map(|r| r.transformation.clone())
            .collect()
    }
}

/// Registers tiles pairwise with a [`TranslationSolver`].
#[derive(Clone)]
pub struct PairwiseTileRegistrar {
    solver: Arc<dyn TranslationSolver>,
    options: RegistrationOptions,
}

impl PairwiseTileRegistrar {
    pub fn new(solver: Arc<dyn TranslationSolver>, options: RegistrationOptions) -> Self {
        Self { solver, options }
    }

    pub fn options(&self) -> &RegistrationOptions {
        &self.options
    }

    /// Register the `moving_crop` of one tile against the `reference_crop`
    /// of another.
    ///
    /// An Otsu threshold computed on the reference crop masks both crops.
    /// Unreadable tiles are returned as data errors; solver failures as
    /// [`StitchError::Registration`]. The `deadline` covers reading the
    /// crops as well as solving.
    pub fn register_lateral(
        &self,
        source: &dyn TileSource,
        reference_tile: usize,
        reference_crop: &Bounds,
        moving_tile: usize,
        moving_crop: &Bounds,
        deadline: &Deadline,
    ) -> Result<Transformation, StitchError> {
        let reference = source.read_cropped(reference_tile, reference_crop)?;
        let moving = source.read_cropped(moving_tile, moving_crop)?;

        let reference_mask = ForegroundMask::otsu(reference.view());
        let moving_mask = reference_mask.reapply(moving.view());
        debug!(
            "Registering tile {} onto tile {}: crops {:?} / {:?}, threshold {}",
            moving_tile,
            reference_tile,
            moving.dim(),
            reference.dim(),
            reference_mask.threshold()
        );

        let mut offset = self.solver.solve_translation(
            &moving,
            &reference,
            Some(&moving_mask),
            Some(&reference_mask),
            self.options.metric,
            deadline,
        )?;

        if !offset.is_finite() {
            return Err(RegistrationError::NotConverged(format!("{:?}", offset)).into());
        }
        if self.options.integer_offsets {
            offset = offset.rounded();
        }
        Ok(Transformation::translation(offset))
    }

    /// Register every pair concurrently on the bounded worker pool.
    ///
    /// Registration failures and timeouts keep the nominal placement (zero
    /// residual) and are recorded as diagnostics. Data errors abort the
    /// batch.
    pub async fn register_pairs(
        &self,
        source: Arc<dyn TileSource>,
        pairs: &[TilePair],
        geometry: OverlapGeometry,
        stage: Stage,
    ) -> Result<PairwiseResults, StitchError> {
        let jobs: Vec<_> = pairs
            .iter()
            .map(|&pair| {
                let registrar = self.clone();
                let source = Arc::clone(&source);
                move || {
                    let deadline = Deadline::after(registrar.options.timeout);
                    registrar.register_lateral(
                        source.as_ref(),
                        pair.reference,
                        &geometry.reference_crop(),
                        pair.moving,
                        &geometry.moving_crop(),
                        &deadline,
                    )
                }
            })
            .collect();

        // The pool limit sits slightly above the solver deadline so that a
        // cooperative timeout is reported by the solver itself.
        let pool_limit = self.options.timeout + Duration::from_secs(1);
        let outcomes = run_blocking(self.options.workers, jobs, Some(pool_limit)).await;

        let mut results = PairwiseResults::default();
        for (pair, outcome) in pairs.iter().zip(outcomes) {
            let failure = match outcome {
                JobOutcome::Done(Ok(transformation)) => {
                    info!(
                        "Tiles {} -> {}: offset {:?}",
                        pair.reference,
                        pair.moving,
                        transformation.offset()
                    );
                    results.registrations.push(PairRegistration {
                        pair: *pair,
                        transformation,
                        fallback: false,
                    });
                    continue;
                }
                JobOutcome::Done(Err(StitchError::Registration(e))) => e,
                JobOutcome::Done(Err(fatal)) => return Err(fatal),
                JobOutcome::TimedOut(limit) => RegistrationError::TimedOut(limit),
                JobOutcome::Failed(message) => RegistrationError::Worker(message),
            };

            warn!(
                "{} of tiles {} -> {} failed: {}; using the nominal offset",
                stage, pair.reference, pair.moving, failure
            );
            results.diagnostics.push(Diagnostic::new(
                stage,
                (pair.reference, pair.moving),
                failure.to_string(),
                NOMINAL_FALLBACK,
            ));
            results.registrations.push(PairRegistration {
                pair: *pair,
                transformation: Transformation::translation(Translation::ZERO),
                fallback: true,
            });
        }

        Ok(results)
    }
}
