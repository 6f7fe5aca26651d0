//! End-to-end tests of depth-axis stitching on slice sets stored on disk.

use std::sync::Arc;

use ndarray::s;
use tempfile::TempDir;

use tile_stitcher::io::{open_volume, BitDepth, SliceFormat, SliceSet};
use tile_stitcher::stitch::{BlendWeighting, CompositingMode};
use tile_stitcher::{
    discover_tiles, AxisStitchOptions, AxisStitcher, DataError, DirectorySink,
    DirectoryTileSource, MemorySink, SliceSink, StitchError,
};

use super::test_utils::{scene_region, stacked_scene, write_stacked_tiles, write_tile};

const SHAPE: (usize, usize, usize) = (40, 16, 16);

fn options(delta_z: usize) -> AxisStitchOptions {
    AxisStitchOptions {
        delta_z,
        search_band: 4,
        workers: 2,
        ..AxisStitchOptions::default()
    }
}

fn read_output(dir: &std::path::Path) -> tile_stitcher::Volume {
    let slices = SliceSet::discover(dir).unwrap();
    open_volume(slices.paths()).unwrap()
}

#[tokio::test]
async fn test_cut_over_reassembles_stack() {
    let root = TempDir::new().unwrap();
    let tiles = root.path().join("tiles");
    let out = root.path().join("out");
    let dirs = write_stacked_tiles(&tiles, 3, SHAPE, 30);

    let source = discover_tiles(&tiles, "tile_").unwrap();
    let mut sink =
        DirectorySink::create(&out, "stitched_", SliceFormat::Tiff, BitDepth::Sixteen).unwrap();
    let mut stitcher = AxisStitcher::new(options(30)).unwrap();

    let report = stitcher.stitch(Arc::new(source), &mut sink).await.unwrap();
    assert_eq!(report.tiles, vec!["tile_00", "tile_01", "tile_02"]);
    assert!(report.estimates.iter().all(|e| e.residual == 0.0));
    assert!(report.diagnostics.is_empty());
    assert_eq!(sink.emitted(), 100);

    assert_eq!(read_output(&out), stacked_scene(3, SHAPE, 30));

    // Copy mode leaves the tiles untouched
    for dir in dirs {
        assert_eq!(SliceSet::discover(dir).unwrap().len(), 40);
    }
}

#[tokio::test]
async fn test_measured_residual_overrides_delta_z() {
    // Real displacement 32, declared 30.
    let root = TempDir::new().unwrap();
    let tiles = root.path().join("tiles");
    let out = root.path().join("out");
    write_stacked_tiles(&tiles, 2, SHAPE, 32);

    let source = discover_tiles(&tiles, "tile_").unwrap();
    let mut sink =
        DirectorySink::create(&out, "stitched_", SliceFormat::Png, BitDepth::Sixteen).unwrap();
    let mut stitcher = AxisStitcher::new(options(30)).unwrap();

    let report = stitcher.stitch(Arc::new(source), &mut sink).await.unwrap();
    assert_eq!(report.estimates[0].residual, -2.0);
    assert_eq!(read_output(&out), stacked_scene(2, SHAPE, 32));
}

#[tokio::test]
async fn test_blend_band_on_matching_tiles() {
    let root = TempDir::new().unwrap();
    let tiles = root.path().join("tiles");
    let out = root.path().join("out");
    write_stacked_tiles(&tiles, 2, SHAPE, 30);

    let source = discover_tiles(&tiles, "tile_").unwrap();
    let mut sink =
        DirectorySink::create(&out, "stitched_", SliceFormat::Tiff, BitDepth::Sixteen).unwrap();
    let options = AxisStitchOptions {
        mode: CompositingMode::Blend,
        blend_width: 4,
        weighting: BlendWeighting::LinearRamp,
        ..options(30)
    };
    let mut stitcher = AxisStitcher::new(options).unwrap();

    let report = stitcher.stitch(Arc::new(source), &mut sink).await.unwrap();
    let blended = report
        .emitted
        .iter()
        .filter(|e| e.blended_with.is_some())
        .count();
    assert_eq!(blended, 4);

    // Both tiles see the same scene, so the blend reproduces it.
    assert_eq!(read_output(&out), stacked_scene(2, SHAPE, 30));
}

#[tokio::test]
async fn test_flipped_slice_order() {
    let root = TempDir::new().unwrap();
    let dirs: Vec<_> = (0..2)
        .map(|k| {
            let volume = scene_region((k * 30, 0, 0), SHAPE);
            let reversed = volume.slice(s![..;-1, .., ..]).to_owned();
            write_tile(root.path(), &format!("tile_{:02}", k), &reversed, SliceFormat::Tiff)
        })
        .collect();

    let source = DirectoryTileSource::from_dirs(&dirs).unwrap().reversed();
    let mut sink = MemorySink::new();
    let options = AxisStitchOptions {
        flip: true,
        ..options(30)
    };
    let mut stitcher = AxisStitcher::new(options).unwrap();

    stitcher.stitch(Arc::new(source), &mut sink).await.unwrap();
    assert_eq!(sink.transfers().len(), 70);
    assert_eq!(sink.into_volume().unwrap(), stacked_scene(2, SHAPE, 30));
}

#[tokio::test]
async fn test_empty_tile_directory_is_missing_data() {
    let root = TempDir::new().unwrap();
    write_stacked_tiles(root.path(), 1, SHAPE, 30);
    std::fs::create_dir(root.path().join("tile_01")).unwrap();

    let err: StitchError = discover_tiles(root.path(), "tile_").err().unwrap().into();
    assert!(matches!(err, StitchError::Data(DataError::EmptyTile(_))));
    assert_eq!(err.exit_code(), 3);
}

#[tokio::test]
async fn test_delta_z_beyond_tile_depth_is_config_error() {
    let root = TempDir::new().unwrap();
    write_stacked_tiles(root.path(), 2, (10, 8, 8), 5);

    let source = discover_tiles(root.path(), "tile_").unwrap();
    let mut sink = MemorySink::new();
    let mut stitcher = AxisStitcher::new(options(12)).unwrap();

    let err = stitcher
        .stitch(Arc::new(source), &mut sink)
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 2);
    assert_eq!(sink.emitted(), 0);
}
