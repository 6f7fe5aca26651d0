//! Stitching of a rectangular grid of laterally overlapping tiles.
//!
//! The grid is processed in two passes with the same structure:
//!
//! 1. tiles of each row are registered pairwise, the translations are
//!    chained from the first column, and each row is assembled slice by
//!    slice into its own directory of 16-bit TIFF slices;
//! 2. the rows are read back and registered pairwise on their facing bands,
//!    chained from the first row, and the final volume is emitted slice by
//!    slice to a [`SliceSink`].
//!
//! Depth offsets are normalized so the smallest is zero. Fractional depth
//! offsets interpolate the two bracketing slices and in-plane residuals are
//! applied by bilinear shifting. Neighbours are cropped at half the nominal
//! overlap on their facing edges.
//!
//! Rows are written under [`GridOptions::work_dir`] when set, which keeps
//! them after the run, and under a temporary directory otherwise. Peak
//! memory stays at a few slices per tile and per row.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::error::{ConfigError, DataError, StitchError};
use crate::grid::{order, GridLayout, StartingCorner};
use crate::io::{BitDepth, DirectorySink, DirectoryTileSource, SliceFormat, SliceSink, TileSource};
use crate::registration::{
    OverlapGeometry, PairRegistration, PairwiseTileRegistrar, RegistrationOptions, TilePair,
    TranslationSolver,
};
use crate::report::{Diagnostic, Stage, StageTimings};
use crate::transform::{prefix_compose, shift_slice, Transformation, Translation};
use crate::volume::{interpolate_slices, Slice};

// =============================================================================
// Options
// =============================================================================

/// Options of a grid stitching run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridOptions {
    pub rows: usize,
    pub columns: usize,
    pub corner: StartingCorner,

    /// Nominal overlap between horizontal neighbours, in pixels
    pub overlap_width: usize,

    /// Nominal overlap between vertical neighbours, in pixels
    pub overlap_height: usize,

    pub registration: RegistrationOptions,

    /// Directory receiving the assembled rows, kept after the run
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Log stage timings
    pub verbose: bool,
}

impl GridOptions {
    pub fn new(rows: usize, columns: usize, overlap: usize) -> Self {
        Self {
            rows,
            columns,
            corner: StartingCorner::TopLeft,
            overlap_width: overlap,
            overlap_height: overlap,
            registration: RegistrationOptions::default(),
            work_dir: None,
            verbose: false,
        }
    }

    /// Checks that do not need any tile.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rows == 0 || self.columns == 0 {
            return Err(ConfigError::InvalidGrid {
                rows: self.rows,
                columns: self.columns,
            });
        }
        self.registration.validate()
    }

    /// Checks against the tile dimensions.
    pub fn validate_tile(&self, height: usize, width: usize) -> Result<(), ConfigError> {
        check_overlap("width", self.overlap_width, width, self.columns)?;
        check_overlap("height", self.overlap_height, height, self.rows)
    }
}

fn check_overlap(axis: &'static str, overlap: usize, extent: usize, count: usize) -> Result<(), ConfigError> {
    if count > 1 && (overlap == 0 || overlap >= extent) {
        return Err(ConfigError::OverlapOutOfRange {
            axis,
            overlap,
            extent,
        });
    }
    Ok(())
}

// =============================================================================
// Report
// =============================================================================

/// Where one tile landed in the final volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub tile: usize,
    pub row: usize,
    pub column: usize,

    /// Chained translation of the tile within its row
    pub offset: Translation,

    /// Origin of the uncropped tile in the final canvas, `(z, y, x)`
    pub origin: Translation,

    /// Output slices the tile contributes to
    pub depth_range: Range<usize>,

    /// Tile columns kept after cropping
    pub crop: Range<usize>,
}

/// Where one assembled row landed in the final volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowPlacement {
    pub row: usize,
    pub offset: Translation,
    pub depth_range: Range<usize>,
    /// Row lines kept after cropping
    pub crop: Range<usize>,
}

/// Outcome of a grid stitching run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridReport {
    pub layout: GridLayout,
    pub column_registrations: Vec<PairRegistration>,
    pub row_registrations: Vec<PairRegistration>,
    pub placements: Vec<Placement>,
    pub row_placements: Vec<RowPlacement>,
    /// `(depth, height, width)` of the emitted volume
    pub canvas: (usize, usize, usize),
    pub diagnostics: Vec<Diagnostic>,
    pub timings: StageTimings,
}

// =============================================================================
// Strip Compositing
// =============================================================================

/// Axis along which strips sit side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lateral {
    Width,
    Height,
}

/// One item of a stitched strip: a tile within a row, or a row within the
/// grid.
#[derive(Debug, Clone)]
struct Strip {
    item: usize,
    depth: usize,
    /// Normalized depth offset
    z: f64,
    /// In-plane residual `(y, x)`
    shift: (f64, f64),
    /// Kept range along the lateral axis, in item coordinates
    crop: Range<usize>,
    /// Nominal position of the item along the lateral axis
    origin: usize,
}

impl Strip {
    /// Output slices this strip contributes to.
    fn depth_range(&self) -> Range<usize> {
        let start = self.z.ceil().max(0.0) as usize;
        let end = (self.z + self.depth as f64 - 1.0).floor() as usize + 1;
        start..end
    }
}

/// Kept range of item `index` out of `count` along an axis of `extent`.
fn lateral_crop(index: usize, count: usize, extent: usize, overlap: usize) -> Range<usize> {
    let head = overlap - overlap / 2;
    let tail = extent - overlap / 2;
    match (index == 0, index + 1 == count) {
        (true, true) => 0..extent,
        (true, false) => 0..tail,
        (false, true) => head..extent,
        (false, false) => head..tail,
    }
}

/// Depth of the union of all strip extents.
fn union_depth(strips: &[Strip]) -> usize {
    let last = strips
        .iter()
        .map(|strip| strip.z + strip.depth as f64 - 1.0)
        .fold(f64::NEG_INFINITY, f64::max)
        .floor()
        .max(-1.0) as i64;
    (last + 1) as usize
}

/// Build strips from chained translations, normalizing depth offsets.
fn strips_from_chain(
    items: &[usize],
    depths: &[usize],
    chain: &[Transformation],
    extent: usize,
    overlap: usize,
) -> Vec<Strip> {
    let offsets: Vec<Translation> = chain.iter().map(Transformation::offset).collect();
    let min_z = offsets.iter().map(|t| t.z).fold(f64::INFINITY, f64::min);
    let count = items.len();

    items
        .iter()
        .enumerate()
        .map(|(i, &item)| Strip {
            item,
            depth: depths[i],
            z: offsets[i].z - min_z,
            shift: (offsets[i].y, offsets[i].x),
            crop: lateral_crop(i, count, extent, overlap),
            origin: i * (extent - overlap),
        })
        .collect()
}

/// Slice of an item at fractional depth `p`, `None` outside the item.
fn sample_depth(
    source: &dyn TileSource,
    item: usize,
    depth: usize,
    p: f64,
) -> Result<Option<Slice>, StitchError> {
    if depth == 0 || p < 0.0 || p > (depth - 1) as f64 {
        return Ok(None);
    }
    let lower = p.floor() as usize;
    let weight = (p - lower as f64) as f32;
    let first = source.read_slice(item, lower)?;
    if weight == 0.0 || lower + 1 >= depth {
        return Ok(Some(first.as_ref().clone()));
    }

    let second = source.read_slice(item, lower + 1)?;
    if second.dim() != first.dim() {
        return Err(DataError::InconsistentSlice {
            path: source.slice_path(item, lower + 1).unwrap_or_default(),
            expected: first.dim(),
            actual: second.dim(),
        }
        .into());
    }
    Ok(Some(interpolate_slices(first.view(), second.view(), weight)))
}

/// Output slice `index` of a strip of items placed along `lateral`.
fn composite_slice(
    source: &dyn TileSource,
    strips: &[Strip],
    lateral: Lateral,
    shape: (usize, usize),
    index: usize,
) -> Result<Slice, StitchError> {
    let mut canvas = Array2::zeros(shape);
    for strip in strips {
        let Some(slice) = sample_depth(source, strip.item, strip.depth, index as f64 - strip.z)?
        else {
            continue;
        };

        let (dy, dx) = strip.shift;
        let slice = if dy != 0.0 || dx != 0.0 {
            shift_slice(slice.view(), dy, dx)
        } else {
            slice
        };

        let kept = strip.origin + strip.crop.start..strip.origin + strip.crop.end;
        match lateral {
            Lateral::Width => canvas
                .slice_mut(s![.., kept])
                .assign(&slice.slice(s![.., strip.crop.clone()])),
            Lateral::Height => canvas
                .slice_mut(s![kept, ..])
                .assign(&slice.slice(s![strip.crop.clone(), ..])),
        }
    }
    Ok(canvas)
}

// =============================================================================
// Row Storage
// =============================================================================

/// Directory holding the assembled rows between the two passes.
enum RowStore {
    Kept(PathBuf),
    Temporary(TempDir),
}

impl RowStore {
    fn open(work_dir: Option<&Path>) -> Result<Self, DataError> {
        match work_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|e| DataError::io(dir, e))?;
                Ok(Self::Kept(dir.to_path_buf()))
            }
            None => tempfile::Builder::new()
                .prefix("tile-stitcher-rows-")
                .tempdir()
                .map(Self::Temporary)
                .map_err(|e| DataError::io(std::env::temp_dir(), e)),
        }
    }

    fn path(&self) -> &Path {
        match self {
            Self::Kept(dir) => dir.as_path(),
            Self::Temporary(dir) => dir.path(),
        }
    }

    /// Empty sink for row `row`. Slices left by an earlier run are removed.
    fn row_sink(&self, row: usize) -> Result<DirectorySink, DataError> {
        let dir = self.path().join(format!("row_{:04}", row));
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| DataError::io(&dir, e))?;
        }
        DirectorySink::create(dir, "row_", SliceFormat::Tiff, BitDepth::Sixteen)
    }
}

// =============================================================================
// Grid Compositor
// =============================================================================

/// Grid stitcher.
pub struct GridCompositor {
    options: GridOptions,
    registrar: PairwiseTileRegistrar,
}

impl GridCompositor {
    pub fn new(options: GridOptions, solver: Arc<dyn TranslationSolver>) -> Result<Self, ConfigError> {
        options.validate()?;
        let registrar = PairwiseTileRegistrar::new(solver, options.registration.clone());
        Ok(Self { options, registrar })
    }

    pub fn options(&self) -> &GridOptions {
        &self.options
    }

    /// Stitch every tile of `source` and emit the result into `sink`.
    pub async fn run(
        &self,
        source: Arc<dyn TileSource>,
        sink: &mut dyn SliceSink,
    ) -> Result<GridReport, StitchError> {
        let opts = &self.options;
        let mut timings = if opts.verbose {
            StageTimings::logged()
        } else {
            StageTimings::default()
        };
        let total = Instant::now();

        // 1. Introduction
        let started = Instant::now();
        let count = source.tile_count();
        if count == 0 {
            return Err(DataError::EmptySource.into());
        }
        if opts.rows * opts.columns != count {
            return Err(DataError::TileCountMismatch {
                rows: opts.rows,
                columns: opts.columns,
                expected: opts.rows * opts.columns,
                found: count,
            }
            .into());
        }

        let layout = order(opts.corner, opts.rows, opts.columns)?;
        let mut depths = Vec::with_capacity(count);
        let (_, height, width) = source.dimensions(0)?;
        for tile in 0..count {
            let (depth, h, w) = source.dimensions(tile)?;
            if (h, w) != (height, width) {
                return Err(DataError::InconsistentSlice {
                    path: source.slice_path(tile, 0).unwrap_or_default(),
                    expected: (height, width),
                    actual: (h, w),
                }
                .into());
            }
            depths.push(depth);
        }
        opts.validate_tile(height, width)?;
        info!(
            "Grid of {}x{} tiles ({} x {} x {} max), starting {}",
            opts.rows,
            opts.columns,
            depths.iter().max().copied().unwrap_or(0),
            height,
            width,
            opts.corner
        );
        timings.record("introduction", started);

        // 2. First registrations: horizontal neighbours
        let started = Instant::now();
        let column_pairs: Vec<TilePair> = (0..opts.rows)
            .flat_map(|r| {
                let row = layout.row(r);
                row.windows(2)
                    .map(|pair| TilePair::new(pair[0], pair[1]))
                    .collect::<Vec<_>>()
            })
            .collect();
        let columns = self
            .registrar
            .register_pairs(
                Arc::clone(&source),
                &column_pairs,
                OverlapGeometry::columns(opts.overlap_width),
                Stage::ColumnRegistration,
            )
            .await?;
        timings.record("first registrations", started);

        // 3. Row assembly
        let started = Instant::now();
        let row_width = opts.columns * width - (opts.columns - 1) * opts.overlap_width;
        let per_row = opts.columns - 1;
        let store = RowStore::open(opts.work_dir.as_deref())?;
        let mut row_dirs = Vec::with_capacity(opts.rows);
        let mut tile_strips = Vec::with_capacity(opts.rows);
        for r in 0..opts.rows {
            let chain = prefix_compose(&columns.transformations()[r * per_row..(r + 1) * per_row]);
            let items = layout.row(r);
            let item_depths: Vec<usize> = items.iter().map(|&t| depths[t]).collect();
            let strips = strips_from_chain(items, &item_depths, &chain, width, opts.overlap_width);

            let row_depth = union_depth(&strips);
            let mut row_sink = store.row_sink(r)?;
            for z in 0..row_depth {
                let slice =
                    composite_slice(source.as_ref(), &strips, Lateral::Width, (height, row_width), z)?;
                row_sink.write(z, slice.view())?;
            }
            debug!(
                "Row {} assembled: {} x {} x {} in {}",
                r,
                row_depth,
                height,
                row_width,
                row_sink.dir().display()
            );
            row_dirs.push(row_sink.dir().to_path_buf());
            tile_strips.push(strips);
        }
        timings.record("row assembly", started);

        // 4. Second registrations: vertical neighbours
        let started = Instant::now();
        let rows = Arc::new(DirectoryTileSource::from_dirs(&row_dirs)?);
        let row_pairs: Vec<TilePair> = (0..opts.rows.saturating_sub(1))
            .map(|r| TilePair::new(r, r + 1))
            .collect();
        let row_results = self
            .registrar
            .register_pairs(
                Arc::clone(&rows) as Arc<dyn TileSource>,
                &row_pairs,
                OverlapGeometry::rows(opts.overlap_height),
                Stage::RowRegistration,
            )
            .await?;
        timings.record("second registrations", started);

        // 5. Final concatenation
        let started = Instant::now();
        let row_chain = prefix_compose(&row_results.transformations());
        let row_items: Vec<usize> = (0..opts.rows).collect();
        let row_depths = (0..opts.rows)
            .map(|r| rows.dimensions(r).map(|d| d.0))
            .collect::<Result<Vec<_>, _>>()?;
        let row_strips =
            strips_from_chain(&row_items, &row_depths, &row_chain, height, opts.overlap_height);

        let final_height = opts.rows * height - (opts.rows - 1) * opts.overlap_height;
        let final_depth = union_depth(&row_strips);
        for z in 0..final_depth {
            let slice = composite_slice(
                rows.as_ref(),
                &row_strips,
                Lateral::Height,
                (final_height, row_width),
                z,
            )?;
            sink.write(z, slice.view())?;
        }
        info!(
            "Grid stitching done: {} x {} x {} written",
            final_depth, final_height, row_width
        );
        timings.record("final concatenation", started);
        timings.record("total", total);

        let placements = tile_placements(&layout, &tile_strips, &row_strips, height, opts.overlap_height);
        let row_placements = row_strips
            .iter()
            .map(|strip| RowPlacement {
                row: strip.item,
                offset: row_chain[strip.item].offset(),
                depth_range: strip.depth_range(),
                crop: strip.crop.clone(),
            })
            .collect();

        let mut diagnostics = columns.diagnostics.clone();
        diagnostics.extend(row_results.diagnostics.iter().cloned());

        Ok(GridReport {
            layout,
            column_registrations: columns.registrations,
            row_registrations: row_results.registrations,
            placements,
            row_placements,
            canvas: (final_depth, final_height, row_width),
            diagnostics,
            timings,
        })
    }
}

fn tile_placements(
    layout: &GridLayout,
    tile_strips: &[Vec<Strip>],
    row_strips: &[Strip],
    height: usize,
    overlap_height: usize,
) -> Vec<Placement> {
    let mut placements = Vec::with_capacity(layout.len());
    for (r, strips) in tile_strips.iter().enumerate() {
        let row = &row_strips[r];
        let row_origin = (r * (height - overlap_height.min(height))) as f64;
        for (c, strip) in strips.iter().enumerate() {
            let offset = Translation::new(strip.z, strip.shift.0, strip.shift.1);
            let origin = Translation::new(
                row.z + strip.z,
                row_origin + row.shift.0 + strip.shift.0,
                strip.origin as f64 + row.shift.1 + strip.shift.1,
            );
            let start = (origin.z.ceil().max(0.0)) as usize;
            let end = (origin.z + strip.depth as f64 - 1.0).floor() as usize + 1;
            placements.push(Placement {
                tile: strip.item,
                row: r,
                column: c,
                offset,
                origin,
                depth_range: start..end,
                crop: strip.crop.clone(),
            });
        }
    }
    placements
}
