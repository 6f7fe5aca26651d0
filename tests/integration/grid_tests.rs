//! End-to-end tests of grid stitching.

use std::sync::Arc;

use tempfile::TempDir;

use tile_stitcher::io::{open_volume, BitDepth, SliceFormat, SliceSet};
use tile_stitcher::registration::Deadline;
use tile_stitcher::{
    discover_tiles, order, DataError, DirectorySink, ExhaustiveTranslationSolver, ForegroundMask,
    GridCompositor, GridOptions, MemorySink, MemoryTileSource, RegistrationError,
    SimilarityMetric, StartingCorner, StitchError, TileSource, TranslationSolver, Translation,
    Volume,
};

use super::test_utils::{scene, scene_region, write_tile};

/// Solver that recognizes the moving tile by its constant value.
struct OffsetsByTile(Vec<Translation>);

impl TranslationSolver for OffsetsByTile {
    fn solve_translation(
        &self,
        moving: &Volume,
        _reference: &Volume,
        _moving_mask: Option<&ForegroundMask>,
        _reference_mask: Option<&ForegroundMask>,
        _metric: SimilarityMetric,
        _deadline: &Deadline,
    ) -> Result<Translation, RegistrationError> {
        let tile = (moving[[0, 0, 0]] / 1000.0) as usize - 1;
        self.0
            .get(tile)
            .copied()
            .ok_or(RegistrationError::EmptyOverlap)
    }
}

fn grid_options(rows: usize, columns: usize, overlap: usize) -> GridOptions {
    let mut options = GridOptions::new(rows, columns, overlap);
    options.registration.workers = 2;
    options
}

fn read_output(dir: &std::path::Path) -> Volume {
    let slices = SliceSet::discover(dir).unwrap();
    open_volume(slices.paths()).unwrap()
}

#[tokio::test]
async fn test_one_row_of_three_tiles() {
    // Right neighbours register 3 slices higher, then 1 slice lower.
    let tiles = (1..=3)
        .map(|k| Volume::from_elem((100, 50, 50), (k * 1000) as f32))
        .collect();
    let source: Arc<dyn TileSource> = Arc::new(MemoryTileSource::from_volumes(tiles));
    let solver = OffsetsByTile(vec![
        Translation::ZERO,
        Translation::new(3.0, 0.0, 0.0),
        Translation::new(-1.0, 0.0, 0.0),
    ]);
    let compositor = GridCompositor::new(grid_options(1, 3, 10), Arc::new(solver)).unwrap();
    let mut sink = MemorySink::new();

    let report = compositor.run(source, &mut sink).await.unwrap();
    assert_eq!(report.canvas, (103, 50, 130));
    assert!(report.diagnostics.is_empty());

    let ranges: Vec<_> = report
        .placements
        .iter()
        .map(|p| p.depth_range.clone())
        .collect();
    assert_eq!(ranges, vec![0..100, 3..103, 2..102]);
    assert_eq!(report.placements[1].origin, Translation::new(3.0, 0.0, 40.0));
    assert_eq!(report.placements[2].crop, 5..50);

    let volume = sink.into_volume().unwrap();
    assert_eq!(volume.dim(), (103, 50, 130));
    // Slice 0: only the first tile is present
    assert_eq!(volume[[0, 10, 44]], 1000.0);
    assert_eq!(volume[[0, 10, 45]], 0.0);
    assert_eq!(volume[[0, 10, 129]], 0.0);
    // Slice 50: every tile, cropped at half the overlap
    assert_eq!(volume[[50, 10, 45]], 2000.0);
    assert_eq!(volume[[50, 10, 84]], 2000.0);
    assert_eq!(volume[[50, 10, 85]], 3000.0);
    // Slice 102: only the middle tile reaches it
    assert_eq!(volume[[102, 10, 60]], 2000.0);
    assert_eq!(volume[[102, 10, 100]], 0.0);
}

#[tokio::test]
async fn test_registration_recovers_misplaced_tile() {
    // The right tile sits one slice deeper and two columns further right
    // than its nominal position.
    let root = TempDir::new().unwrap();
    let out = root.path().join("out");
    let shape = (8, 16, 24);
    write_tile(root.path(), "tile_00", &scene_region((0, 0, 0), shape), SliceFormat::Tiff);
    write_tile(root.path(), "tile_01", &scene_region((1, 0, 14), shape), SliceFormat::Tiff);

    let source = discover_tiles(root.path(), "tile_").unwrap();
    let mut sink =
        DirectorySink::create(&out, "grid_", SliceFormat::Tiff, BitDepth::Sixteen).unwrap();
    let mut options = grid_options(1, 2, 12);
    options.registration.integer_offsets = true;
    let compositor =
        GridCompositor::new(options, Arc::new(ExhaustiveTranslationSolver::with_radius(3))).unwrap();

    let report = compositor.run(Arc::new(source), &mut sink).await.unwrap();
    assert_eq!(
        report.column_registrations[0].transformation.offset(),
        Translation::new(1.0, 0.0, 2.0)
    );
    assert_eq!(report.canvas, (9, 16, 36));

    let volume = read_output(&out);
    for z in 1..8 {
        for y in 0..16 {
            for x in 0..36 {
                assert_eq!(volume[[z, y, x]], scene(z as i64, y as i64, x as i64));
            }
        }
    }
    // Outside each tile's depth extent the canvas is empty
    assert_eq!(volume[[0, 3, 30]], 0.0);
    assert_eq!(volume[[0, 3, 5]], scene(0, 3, 5));
    assert_eq!(volume[[8, 3, 5]], 0.0);
    assert_eq!(volume[[8, 3, 30]], scene(8, 3, 30));
}

#[tokio::test]
async fn test_two_by_two_grid_from_bottom_right() {
    let root = TempDir::new().unwrap();
    let out = root.path().join("out");
    let (depth, height, width, overlap) = (6, 16, 20, 8);

    let layout = order(StartingCorner::BottomRight, 2, 2).unwrap();
    for r in 0..2 {
        for c in 0..2 {
            let index = layout.get(r, c).unwrap();
            let origin = (0, (r * (height - overlap)) as i64, (c * (width - overlap)) as i64);
            write_tile(
                root.path(),
                &format!("tile_{:02}", index),
                &scene_region(origin, (depth, height, width)),
                SliceFormat::Png,
            );
        }
    }

    let source = discover_tiles(root.path(), "tile_").unwrap();
    let mut sink =
        DirectorySink::create(&out, "grid_", SliceFormat::Tiff, BitDepth::Sixteen).unwrap();
    let mut options = grid_options(2, 2, overlap);
    options.corner = StartingCorner::BottomRight;
    options.registration.integer_offsets = true;
    options.work_dir = Some(root.path().join("rows"));
    let compositor =
        GridCompositor::new(options, Arc::new(ExhaustiveTranslationSolver::with_radius(2))).unwrap();

    let report = compositor.run(Arc::new(source), &mut sink).await.unwrap();
    assert!(report
        .column_registrations
        .iter()
        .chain(&report.row_registrations)
        .all(|r| r.transformation.offset() == Translation::ZERO && !r.fallback));

    let corner = report
        .placements
        .iter()
        .find(|p| (p.row, p.column) == (1, 1))
        .unwrap();
    assert_eq!(corner.tile, layout.get(1, 1).unwrap());
    assert_eq!(corner.origin, Translation::new(0.0, 8.0, 12.0));

    assert_eq!(read_output(&out), scene_region((0, 0, 0), (6, 24, 32)));

    // Assembled rows stay on disk, one directory per row
    for r in 0..2 {
        let row = read_output(&root.path().join("rows").join(format!("row_{:04}", r)));
        let origin = (0, (r * (height - overlap)) as i64, 0);
        assert_eq!(row, scene_region(origin, (depth, height, 32)));
    }
}

#[tokio::test]
async fn test_tile_count_mismatch() {
    let root = TempDir::new().unwrap();
    for k in 0..3 {
        write_tile(
            root.path(),
            &format!("tile_{:02}", k),
            &scene_region((0, 0, 0), (2, 8, 8)),
            SliceFormat::Tiff,
        );
    }

    let source = discover_tiles(root.path(), "tile_").unwrap();
    let compositor = GridCompositor::new(
        grid_options(2, 2, 2),
        Arc::new(ExhaustiveTranslationSolver::default()),
    )
    .unwrap();
    let mut sink = MemorySink::new();

    let err = compositor
        .run(Arc::new(source), &mut sink)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StitchError::Data(DataError::TileCountMismatch { found: 3, .. })
    ));
    assert_eq!(err.exit_code(), 3);
}
