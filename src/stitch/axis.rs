//! Stitching of tiles stacked along the depth axis.
//!
//! Consecutive tiles `k` (bottom) and `k + 1` (top) overlap by roughly
//! `n - delta_z` slices. The nominal corresponding slices are
//! `nominal_bottom = n - (n - delta_z) / 2` and
//! `nominal_top = (n - delta_z) / 2`. Band correlation measures the residual
//! `e` such that bottom slice `X` matches top slice
//! `X - nominal_bottom + nominal_top + e`, and the bottom tile is committed
//! up to `nominal_bottom - round(e)`.
//!
//! Overlap estimation for all pairs runs on the worker pool; emission then
//! walks the tiles strictly in order, one slice at a time, through a
//! [`SliceSink`].

use std::sync::Arc;
use std::time::Instant;

use ndarray::Axis;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::correlation::{best_offset, BandMatch};
use crate::error::{ConfigError, DataError, StitchError};
use crate::io::{SliceSink, TileSource, TransferMode};
use crate::pool::{run_blocking, JobOutcome};
use crate::registration::default_workers;
use crate::report::{Diagnostic, Stage, StageTimings};
use crate::volume::{interpolate_slices, Volume};

/// Largest correlation search radius used inside a band.
pub const MAX_CORRELATION_RADIUS: usize = 10;

/// Default half-height of the correlation bands.
pub const DEFAULT_SEARCH_BAND: i64 = 10;

// =============================================================================
// Options
// =============================================================================

/// How overlapping slices are committed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum CompositingMode {
    /// Bottom tile up to the boundary, then the top tile
    #[default]
    CutOver,
    /// Weighted blend of both tiles across a band around the boundary
    Blend,
}

/// Weights of the two tiles inside a blend band.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum BlendWeighting {
    /// Arithmetic mean
    #[default]
    Mean,
    /// Top tile weight rising linearly across the band
    LinearRamp,
}

impl BlendWeighting {
    /// Weight of the top tile for slice `i` of a band of `width` slices.
    pub fn top_weight(self, i: usize, width: usize) -> f32 {
        match self {
            BlendWeighting::Mean => 0.5,
            BlendWeighting::LinearRamp => (i + 1) as f32 / (width + 1) as f32,
        }
    }
}

/// Options of a depth-axis stitching run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisStitchOptions {
    /// Nominal displacement between consecutive tiles, in slices
    pub delta_z: usize,

    /// Half-height of the correlation bands
    pub search_band: i64,

    /// Measure the residual by band correlation instead of trusting `delta_z`
    pub look_for_best_slice: bool,

    pub mode: CompositingMode,

    /// Slices in a blend band
    pub blend_width: usize,

    pub weighting: BlendWeighting,

    pub transfer: TransferMode,

    /// Tiles list their slices in reverse order
    pub flip: bool,

    /// Overlap estimations running at once
    pub workers: usize,

    /// Log stage timings
    pub verbose: bool,
}

impl Default for AxisStitchOptions {
    fn default() -> Self {
        Self {
            delta_z: 0,
            search_band: DEFAULT_SEARCH_BAND,
            look_for_best_slice: true,
            mode: CompositingMode::CutOver,
            blend_width: 0,
            weighting: BlendWeighting::Mean,
            transfer: TransferMode::Copy,
            flip: false,
            workers: default_workers(),
            verbose: false,
        }
    }
}

impl AxisStitchOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.search_band <= 0 {
            return Err(ConfigError::NonPositiveSearchBand(self.search_band));
        }
        if self.mode == CompositingMode::Blend && self.blend_width == 0 {
            return Err(ConfigError::EmptyBlendBand);
        }
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        Ok(())
    }

    fn band(&self) -> usize {
        self.search_band.max(1) as usize
    }
}

// =============================================================================
// State and Report
// =============================================================================

/// Progress of an [`AxisStitcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AxisState {
    AwaitingPair,
    EstimatingOverlap,
    Compositing,
    Done,
}

/// Measured correspondence between two consecutive tiles.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlapEstimate {
    pub bottom: usize,
    pub top: usize,
    pub nominal_bottom: usize,
    pub nominal_top: usize,
    /// Residual `e` in slices
    pub residual: f64,
    /// Band search result, absent when the nominal overlap was trusted
    pub band_match: Option<BandMatch>,
}

impl OverlapEstimate {
    /// Last bottom slice (exclusive) committed before the top tile.
    pub fn bottom_boundary(&self) -> i64 {
        self.nominal_bottom as i64 - self.residual.round() as i64
    }
}

/// One output slice and where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmittedSlice {
    pub output: usize,
    pub tile: usize,
    pub source_index: usize,
    /// Top tile slice mixed in, for blended slices
    pub blended_with: Option<(usize, usize)>,
}

/// Outcome of a depth-axis stitching run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AxisStitchReport {
    pub tiles: Vec<String>,
    pub estimates: Vec<OverlapEstimate>,
    pub emitted: Vec<EmittedSlice>,
    pub diagnostics: Vec<Diagnostic>,
    pub timings: StageTimings,
}

// =============================================================================
// Axis Stitcher
// =============================================================================

/// Depth-axis stitcher.
pub struct AxisStitcher {
    options: AxisStitchOptions,
    state: AxisState,
}

impl AxisStitcher {
    pub fn new(options: AxisStitchOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        Ok(Self {
            options,
            state: AxisState::AwaitingPair,
        })
    }

    pub fn options(&self) -> &AxisStitchOptions {
        &self.options
    }

    pub fn state(&self) -> AxisState {
        self.state
    }

    fn transition(&mut self, next: AxisState) {
        if self.state != next {
            debug!("Axis stitcher: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Estimate and composite every tile of `source` into `sink`.
    pub async fn stitch(
        &mut self,
        source: Arc<dyn TileSource>,
        sink: &mut dyn SliceSink,
    ) -> Result<AxisStitchReport, StitchError> {
        let mut timings = if self.options.verbose {
            StageTimings::logged()
        } else {
            StageTimings::default()
        };
        let total = Instant::now();

        let started = Instant::now();
        let (estimates, diagnostics) = self.estimate_overlaps(Arc::clone(&source)).await?;
        timings.record("overlap estimation", started);

        let started = Instant::now();
        let mut report = self.composite(source.as_ref(), &estimates, sink)?;
        timings.record("compositing", started);
        timings.record("total", total);

        report.diagnostics = diagnostics;
        report.timings = timings;
        Ok(report)
    }

    /// Nominal corresponding slices of every consecutive pair.
    fn nominal_pairs(&self, source: &dyn TileSource) -> Result<Vec<(usize, usize)>, StitchError> {
        let count = source.tile_count();
        let mut nominal = Vec::with_capacity(count.saturating_sub(1));
        for k in 0..count.saturating_sub(1) {
            let (n, _, _) = source.dimensions(k)?;
            if self.options.delta_z > n {
                return Err(ConfigError::OverlapOutOfRange {
                    axis: "depth",
                    overlap: self.options.delta_z,
                    extent: n,
                }
                .into());
            }
            let half = (n - self.options.delta_z) / 2;
            nominal.push((n - half, half));
        }
        Ok(nominal)
    }

    /// Measure the residual of every consecutive pair.
    ///
    /// Pairs whose bands give no defined correlation keep the nominal
    /// overlap and produce a diagnostic.
    pub async fn estimate_overlaps(
        &mut self,
        source: Arc<dyn TileSource>,
    ) -> Result<(Vec<OverlapEstimate>, Vec<Diagnostic>), StitchError> {
        if source.tile_count() == 0 {
            return Err(DataError::EmptySource.into());
        }
        let nominal = self.nominal_pairs(source.as_ref())?;
        self.transition(AxisState::EstimatingOverlap);

        if !self.options.look_for_best_slice {
            let estimates = nominal
                .iter()
                .enumerate()
                .map(|(k, &(nb, nt))| OverlapEstimate {
                    bottom: k,
                    top: k + 1,
                    nominal_bottom: nb,
                    nominal_top: nt,
                    residual: 0.0,
                    band_match: None,
                })
                .collect();
            return Ok((estimates, Vec::new()));
        }

        let band = self.options.band();
        let jobs: Vec<_> = nominal
            .iter()
            .enumerate()
            .map(|(k, &(nb, nt))| {
                let source = Arc::clone(&source);
                move || estimate_pair(source.as_ref(), k, nb, nt, band)
            })
            .collect();

        let outcomes = run_blocking(self.options.workers, jobs, None).await;

        let mut estimates = Vec::with_capacity(outcomes.len());
        let mut diagnostics = Vec::new();
        for (k, outcome) in outcomes.into_iter().enumerate() {
            let (nb, nt) = nominal[k];
            let estimate = match outcome {
                JobOutcome::Done(result) => result?,
                JobOutcome::TimedOut(_) | JobOutcome::Failed(_) => {
                    return Err(StitchError::Registration(
                        crate::error::RegistrationError::Worker(format!(
                            "overlap estimation of tiles {} and {} did not complete",
                            k,
                            k + 1
                        )),
                    ));
                }
            };

            let usable = estimate
                .band_match
                .as_ref()
                .map(BandMatch::is_usable)
                .unwrap_or(false);
            if let Some(band_match) = &estimate.band_match {
                if band_match.degenerate_comparisons > 0 {
                    warn!(
                        "Tiles {} and {}: {} slice comparisons had no defined correlation",
                        k,
                        k + 1,
                        band_match.degenerate_comparisons
                    );
                }
            }

            if usable {
                info!(
                    "Tiles {} and {}: nominal slices {} / {}, residual {}",
                    k,
                    k + 1,
                    nb,
                    nt,
                    estimate.residual
                );
                estimates.push(estimate);
            } else {
                warn!(
                    "Tiles {} and {}: correlation undefined, using the nominal overlap",
                    k,
                    k + 1
                );
                diagnostics.push(Diagnostic::new(
                    Stage::AxisOverlap,
                    (k, k + 1),
                    "no slice comparison produced a defined correlation",
                    "nominal overlap (zero residual)",
                ));
                estimates.push(OverlapEstimate {
                    residual: 0.0,
                    ..estimate
                });
            }
        }

        Ok((estimates, diagnostics))
    }

    /// Emit every tile in order, using the given pair estimates.
    pub fn composite(
        &mut self,
        source: &dyn TileSource,
        estimates: &[OverlapEstimate],
        sink: &mut dyn SliceSink,
    ) -> Result<AxisStitchReport, StitchError> {
        let count = source.tile_count();
        if estimates.len() + 1 != count {
            return Err(ConfigError::Invalid(format!(
                "{} overlap estimates for {} tiles",
                estimates.len(),
                count
            ))
            .into());
        }
        self.transition(AxisState::Compositing);

        let mut report = AxisStitchReport {
            tiles: (0..count)
                .map(|k| source.tile_name(k))
                .collect::<Result<_, _>>()?,
            estimates: estimates.to_vec(),
            ..AxisStitchReport::default()
        };
        let mut emitter = Emitter {
            source,
            sink,
            transfer: self.options.transfer,
            emitted: &mut report.emitted,
        };

        let mut start = 0usize;
        for k in 0..count {
            let (depth, _, _) = source.dimensions(k)?;
            let Some(estimate) = estimates.get(k) else {
                // Last tile: everything from its start boundary to the end
                emitter.emit_range(k, start, depth)?;
                break;
            };

            let boundary = estimate
                .bottom_boundary()
                .clamp(start.min(depth) as i64, depth as i64) as usize;
            if boundary as i64 != estimate.bottom_boundary() {
                warn!(
                    "Tile {}: boundary {} clamped to {}",
                    k,
                    estimate.bottom_boundary(),
                    boundary
                );
            }

            start = match self.options.mode {
                CompositingMode::CutOver => {
                    emitter.emit_range(k, start, boundary)?;
                    estimate.nominal_top
                }
                CompositingMode::Blend => {
                    let width = self.options.blend_width;
                    let (lo, hi) = (width / 2, width - width / 2);
                    let (top_depth, _, _) = source.dimensions(k + 1)?;
                    if boundary < start + lo
                        || boundary + hi > depth
                        || estimate.nominal_top < lo
                        || estimate.nominal_top + hi > top_depth
                    {
                        return Err(ConfigError::Invalid(format!(
                            "blend band of {} slices does not fit around slice {} of tile {} and slice {} of tile {}",
                            width,
                            boundary,
                            k,
                            estimate.nominal_top,
                            k + 1
                        ))
                        .into());
                    }

                    emitter.emit_range(k, start, boundary - lo)?;
                    for i in 0..width {
                        emitter.emit_blend(
                            (k, boundary - lo + i),
                            (k + 1, estimate.nominal_top - lo + i),
                            self.options.weighting.top_weight(i, width),
                        )?;
                    }
                    estimate.nominal_top + hi
                }
            };
            debug!("Tile {} committed, next tile starts at slice {}", k, start);
        }

        info!(
            "Axis stitching done: {} tiles, {} output slices",
            count,
            report.emitted.len()
        );
        self.transition(AxisState::Done);
        Ok(report)
    }
}

/// Correlate the bands around the nominal slices of one pair.
fn estimate_pair(
    source: &dyn TileSource,
    bottom: usize,
    nominal_bottom: usize,
    nominal_top: usize,
    band: usize,
) -> Result<OverlapEstimate, StitchError> {
    let (bottom_start, bottom_band) = read_band(source, bottom, nominal_bottom, band)?;
    let (top_start, top_band) = read_band(source, bottom + 1, nominal_top, band)?;

    let radius = band.min(MAX_CORRELATION_RADIUS);
    let band_match = best_offset(bottom_band.view(), top_band.view(), radius, true)?;

    // Band-relative offset to the residual against the nominal pairing.
    let residual = band_match.offset + (top_start as f64 - nominal_top as f64)
        - (bottom_start as f64 - nominal_bottom as f64);

    Ok(OverlapEstimate {
        bottom,
        top: bottom + 1,
        nominal_bottom,
        nominal_top,
        residual,
        band_match: Some(band_match),
    })
}

/// Slices `[centre - band, centre + band)` of a tile, clamped to the tile.
fn read_band(
    source: &dyn TileSource,
    tile: usize,
    centre: usize,
    band: usize,
) -> Result<(usize, Volume), StitchError> {
    let (depth, height, width) = source.dimensions(tile)?;
    let start = centre.saturating_sub(band).min(depth);
    let end = (centre + band).min(depth);

    let mut volume = Volume::zeros((end - start, height, width));
    for (z, index) in (start..end).enumerate() {
        let slice = source.read_slice(tile, index)?;
        if slice.dim() != (height, width) {
            return Err(DataError::InconsistentSlice {
                path: source.slice_path(tile, index).unwrap_or_default(),
                expected: (height, width),
                actual: slice.dim(),
            }
            .into());
        }
        volume.index_axis_mut(Axis(0), z).assign(slice.as_ref());
    }
    Ok((start, volume))
}

/// Sequential writer of output slices.
struct Emitter<'a> {
    source: &'a dyn TileSource,
    sink: &'a mut dyn SliceSink,
    transfer: TransferMode,
    emitted: &'a mut Vec<EmittedSlice>,
}

impl Emitter<'_> {
    fn next_index(&self) -> usize {
        self.emitted.len()
    }

    /// Emit slices `[start, end)` of a tile unchanged.
    fn emit_range(&mut self, tile: usize, start: usize, end: usize) -> Result<(), StitchError> {
        for index in start..end {
            let output = self.next_index();
            match self.source.slice_path(tile, index) {
                Some(path) => self.sink.transfer(output, &path, self.transfer)?,
                None => {
                    let slice = self.source.read_slice(tile, index)?;
                    self.sink.write(output, slice.view())?;
                }
            }
            self.emitted.push(EmittedSlice {
                output,
                tile,
                source_index: index,
                blended_with: None,
            });
        }
        Ok(())
    }

    fn emit_blend(
        &mut self,
        bottom: (usize, usize),
        top: (usize, usize),
        top_weight: f32,
    ) -> Result<(), StitchError> {
        let output = self.next_index();
        let first = self.source.read_slice(bottom.0, bottom.1)?;
        let second = self.source.read_slice(top.0, top.1)?;
        if first.dim() != second.dim() {
            return Err(DataError::InconsistentSlice {
                path: self.source.slice_path(top.0, top.1).unwrap_or_default(),
                expected: first.dim(),
                actual: second.dim(),
            }
            .into());
        }

        let blended = interpolate_slices(first.view(), second.view(), top_weight);
        self.sink.write(output, blended.view())?;
        self.emitted.push(EmittedSlice {
            output,
            tile: bottom.0,
            source_index: bottom.1,
            blended_with: Some(top),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MemorySink, MemoryTileSource};
    use crate::volume::Slice;

    /// Tiles cut from one textured stack: tile k covers global slices
    /// `[k * displacement, k * displacement + depth)`.
    fn stacked_tiles(count: usize, depth: usize, displacement: usize) -> MemoryTileSource {
        let global = |z: usize, y: usize, x: usize| {
            let mut v = (z * 4096 + y * 64 + x) as u64 ^ 0x9E37_79B9_7F4A_7C15;
            v = (v ^ (v >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            v = (v ^ (v >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            (200 + (v ^ (v >> 31)) % 1000) as f32
        };
        MemoryTileSource::from_volumes(
            (0..count)
                .map(|k| {
                    Volume::from_shape_fn((depth, 12, 12), |(z, y, x)| {
                        global(k * displacement + z, y, x)
                    })
                })
                .collect(),
        )
    }

    fn options(delta_z: usize) -> AxisStitchOptions {
        AxisStitchOptions {
            delta_z,
            search_band: 4,
            workers: 2,
            ..AxisStitchOptions::default()
        }
    }

    #[test]
    fn test_options_validation() {
        let mut opts = options(10);
        opts.search_band = 0;
        assert_eq!(opts.validate(), Err(ConfigError::NonPositiveSearchBand(0)));
        opts.search_band = -3;
        assert!(AxisStitcher::new(opts.clone()).is_err());

        let opts = AxisStitchOptions {
            mode: CompositingMode::Blend,
            blend_width: 0,
            ..options(10)
        };
        assert_eq!(opts.validate(), Err(ConfigError::EmptyBlendBand));
    }

    #[test]
    fn test_blend_weights() {
        assert_eq!(BlendWeighting::Mean.top_weight(0, 4), 0.5);
        let ramp: Vec<f32> = (0..4).map(|i| BlendWeighting::LinearRamp.top_weight(i, 4)).collect();
        assert_eq!(ramp, vec![0.2, 0.4, 0.6, 0.8]);
    }

    #[tokio::test]
    async fn test_estimates_nominal_pairs() {
        // delta_z matches the real displacement, so the residual is zero.
        let source: Arc<dyn TileSource> = Arc::new(stacked_tiles(3, 30, 20));
        let mut stitcher = AxisStitcher::new(options(20)).unwrap();

        let (estimates, diagnostics) = stitcher.estimate_overlaps(source).await.unwrap();
        assert!(diagnostics.is_empty());
        assert_eq!(estimates.len(), 2);
        assert_eq!((estimates[0].nominal_bottom, estimates[0].nominal_top), (25, 5));
        assert_eq!(estimates[0].residual, 0.0);
        assert_eq!(stitcher.state(), AxisState::EstimatingOverlap);
    }

    #[tokio::test]
    async fn test_residual_corrects_wrong_delta_z() {
        // Real displacement 22, declared 20: bottom 25 matches top 3.
        let source: Arc<dyn TileSource> = Arc::new(stacked_tiles(2, 30, 22));
        let mut stitcher = AxisStitcher::new(options(20)).unwrap();

        let (estimates, _) = stitcher.estimate_overlaps(source).await.unwrap();
        assert_eq!(estimates[0].residual, -2.0);
        assert_eq!(estimates[0].bottom_boundary(), 27);
    }

    #[tokio::test]
    async fn test_cut_over_covers_global_stack_once() {
        let source = Arc::new(stacked_tiles(3, 30, 22));
        let mut stitcher = AxisStitcher::new(options(20)).unwrap();
        let mut sink = MemorySink::new();

        let report = stitcher.stitch(source.clone(), &mut sink).await.unwrap();
        assert_eq!(stitcher.state(), AxisState::Done);

        // Global slice of every emitted slice: strictly consecutive.
        let globals: Vec<usize> = report
            .emitted
            .iter()
            .map(|e| e.tile * 22 + e.source_index)
            .collect();
        assert_eq!(globals, (0..2 * 22 + 30).collect::<Vec<_>>());

        let volume = sink.into_volume().unwrap();
        let expected = source.volume(2).unwrap();
        assert_eq!(
            volume.index_axis(Axis(0), 2 * 22 + 29),
            expected.index_axis(Axis(0), 29)
        );
    }

    #[tokio::test]
    async fn test_blend_band_mixes_corresponding_slices() {
        let source = Arc::new(stacked_tiles(2, 30, 20));
        let options = AxisStitchOptions {
            mode: CompositingMode::Blend,
            blend_width: 4,
            look_for_best_slice: false,
            ..options(20)
        };
        let mut stitcher = AxisStitcher::new(options).unwrap();
        let mut sink = MemorySink::new();

        let report = stitcher.stitch(source.clone(), &mut sink).await.unwrap();

        // Bottom up to 23, blend of bottom 23..27 with top 3..7, then top 7..30.
        assert_eq!(report.emitted.len(), 23 + 4 + 23);
        let blended: Vec<_> = report
            .emitted
            .iter()
            .filter_map(|e| e.blended_with.map(|top| (e.source_index, top.1)))
            .collect();
        assert_eq!(blended, vec![(23, 3), (24, 4), (25, 5), (26, 6)]);

        // Corresponding slices are identical, so the blend reproduces them.
        let slices = sink.slices();
        let bottom = source.read_slice(0, 24).unwrap();
        assert_eq!(slices[24].1, *bottom);
        assert_eq!(report.emitted.last().map(|e| e.source_index), Some(29));
    }

    #[tokio::test]
    async fn test_blend_band_out_of_range() {
        let source = Arc::new(stacked_tiles(2, 30, 20));
        let options = AxisStitchOptions {
            mode: CompositingMode::Blend,
            blend_width: 20,
            look_for_best_slice: false,
            ..options(20)
        };
        let mut stitcher = AxisStitcher::new(options).unwrap();
        let mut sink = MemorySink::new();

        let result = stitcher.stitch(source, &mut sink).await;
        assert!(matches!(result, Err(StitchError::Config(_))));
    }

    #[tokio::test]
    async fn test_flat_bands_fall_back_to_nominal() {
        let flat = Volume::from_elem((30, 8, 8), 5.0);
        let source: Arc<dyn TileSource> =
            Arc::new(MemoryTileSource::from_volumes(vec![flat.clone(), flat]));
        let mut stitcher = AxisStitcher::new(options(20)).unwrap();
        let mut sink = MemorySink::new();

        let report = stitcher.stitch(source, &mut sink).await.unwrap();
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].stage, Stage::AxisOverlap);
        assert_eq!(report.estimates[0].residual, 0.0);
        assert_eq!(report.emitted.len(), 25 + 25);
        assert_eq!(sink.slices()[0].1, Slice::from_elem((8, 8), 5.0));
    }

    #[tokio::test]
    async fn test_delta_z_larger_than_tile() {
        let source: Arc<dyn TileSource> = Arc::new(stacked_tiles(2, 10, 5));
        let mut stitcher = AxisStitcher::new(options(20)).unwrap();
        let result = stitcher.estimate_overlaps(source).await;
        assert!(matches!(
            result,
            Err(StitchError::Config(ConfigError::OverlapOutOfRange { .. }))
        ));
    }

    #[tokio::test]
    async fn test_empty_source_is_missing_data() {
        let source: Arc<dyn TileSource> = Arc::new(MemoryTileSource::new());
        let mut stitcher = AxisStitcher::new(options(10)).unwrap();
        let mut sink = MemorySink::new();

        let err = stitcher.stitch(source, &mut sink).await.unwrap_err();
        assert!(matches!(err, StitchError::Data(DataError::EmptySource)));
        assert_eq!(err.exit_code(), 3);
        assert_eq!(err.to_string(), "Missing data: Tile source holds no tiles");
    }
}
