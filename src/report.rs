//! Run reports.
//!
//! Absorbed failures are collected as [`Diagnostic`]s and stage durations as
//! [`StageTimings`]; both end up in the JSON report of a run.

use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{DataError, StitchError};

/// Pipeline stage that produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Depth overlap estimation between consecutive tiles
    AxisOverlap,
    /// Registration of horizontally adjacent tiles
    ColumnRegistration,
    /// Registration of vertically adjacent assembled rows
    RowRegistration,
    /// Two-image planar registration
    Planar,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::AxisOverlap => "axis overlap",
            Stage::ColumnRegistration => "column registration",
            Stage::RowRegistration => "row registration",
            Stage::Planar => "planar registration",
        };
        f.write_str(name)
    }
}

/// A recoverable failure and what replaced the failed result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub stage: Stage,
    /// Indices of the two tiles (or rows) involved
    pub pair: (usize, usize),
    pub message: String,
    /// Value used instead
    pub fallback: String,
}

impl Diagnostic {
    pub fn new(
        stage: Stage,
        pair: (usize, usize),
        message: impl Into<String>,
        fallback: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            pair,
            message: message.into(),
            fallback: fallback.into(),
        }
    }
}

// =============================================================================
// Stage Timings
// =============================================================================

/// Wall-clock duration of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: String,
    pub seconds: f64,
}

/// Ordered stage durations, logged as they are recorded when enabled.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StageTimings {
    stages: Vec<StageTiming>,
    #[serde(skip)]
    log: bool,
}

impl StageTimings {
    /// Timings that are also logged at `info` level.
    pub fn logged() -> Self {
        Self {
            stages: Vec::new(),
            log: true,
        }
    }

    /// Record the time elapsed since `started`.
    pub fn record(&mut self, stage: impl Into<String>, started: Instant) -> Duration {
        let elapsed = started.elapsed();
        let stage = stage.into();
        if self.log {
            info!("{} time: {:.3}s", stage, elapsed.as_secs_f64());
        }
        self.stages.push(StageTiming {
            stage,
            seconds: elapsed.as_secs_f64(),
        });
        elapsed
    }

    pub fn stages(&self) -> &[StageTiming] {
        &self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Write any serializable report as pretty JSON.
pub fn write_report<T: Serialize>(report: &T, path: &Path) -> Result<(), StitchError> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).map_err(|e| DataError::io(path, e))?;
    info!("Report written to {}", path.display());
    Ok(())
}
