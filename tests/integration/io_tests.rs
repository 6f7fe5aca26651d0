//! Slice set reading, writing and caching on disk.

use std::sync::Arc;

use tempfile::TempDir;

use tile_stitcher::io::{slice_file_name, BitDepth, SliceFormat, SliceSet};
use tile_stitcher::volume::AxisRange;
use tile_stitcher::{
    open_cropped_volume, open_volume, save_volume, Bounds, DataError, DirectoryTileSource,
    SliceCache, StitchError, TileSource, Volume,
};

use super::test_utils::{scene_region, write_tile};

#[test]
fn test_slice_file_names_are_zero_padded() {
    assert_eq!(slice_file_name("stitched_", 7, "tif"), "stitched_0007.tif");
    assert_eq!(slice_file_name("", 12345, "png"), "12345.png");
}

#[test]
fn test_eight_bit_output_is_clamped() {
    let root = TempDir::new().unwrap();
    let volume = Volume::from_shape_vec((1, 1, 4), vec![-5.0, 300.0, 127.6, f32::NAN]).unwrap();

    let paths = save_volume(&volume, root.path(), "s_", SliceFormat::Png, BitDepth::Eight).unwrap();
    assert_eq!(paths.len(), 1);
    assert!(paths[0].ends_with("s_0000.png"));

    let read = open_volume(&paths).unwrap();
    assert_eq!(read.iter().copied().collect::<Vec<_>>(), vec![0.0, 255.0, 128.0, 0.0]);
}

#[test]
fn test_open_cropped_volume() {
    let root = TempDir::new().unwrap();
    let volume = scene_region((0, 0, 0), (5, 6, 7));
    let dir = write_tile(root.path(), "tile", &volume, SliceFormat::Tiff);
    let slices = SliceSet::discover(&dir).unwrap();

    let bounds = Bounds::full()
        .with_depth(AxisRange::new(1, -1))
        .with_width(AxisRange::last(3));
    let cropped = open_cropped_volume(slices.paths(), &bounds).unwrap();
    assert_eq!(cropped.dim(), (4, 6, 3));
    assert_eq!(cropped[[0, 2, 0]], volume[[1, 2, 4]]);
    assert_eq!(cropped[[3, 5, 2]], volume[[4, 5, 6]]);
}

#[test]
fn test_inconsistent_slice_sizes() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("tile");
    save_volume(&scene_region((0, 0, 0), (1, 4, 4)), &dir, "a_", SliceFormat::Tiff, BitDepth::Sixteen)
        .unwrap();
    save_volume(&scene_region((0, 0, 0), (1, 4, 5)), &dir, "b_", SliceFormat::Tiff, BitDepth::Sixteen)
        .unwrap();

    let slices = SliceSet::discover(&dir).unwrap();
    assert!(matches!(
        open_volume(slices.paths()),
        Err(DataError::InconsistentSlice { .. })
    ));
}

#[test]
fn test_bounded_cache_keeps_reads_correct() {
    let root = TempDir::new().unwrap();
    let volume = scene_region((0, 0, 0), (6, 8, 8));
    let dir = write_tile(root.path(), "tile", &volume, SliceFormat::Tiff);

    // Room for two 8x8 slices only
    let cache = Arc::new(SliceCache::with_capacity(2 * 8 * 8 * 4));
    let source = DirectoryTileSource::from_dirs(&[dir])
        .unwrap()
        .with_cache(Arc::clone(&cache));

    for round in 0..2 {
        for z in 0..6 {
            let slice = source.read_slice(0, z).unwrap();
            assert_eq!(slice[[3, 3]], volume[[z, 3, 3]], "round {}", round);
        }
    }
    assert!(cache.len() <= 2);
    assert!(cache.size() <= cache.capacity());
}

#[test]
fn test_undecodable_slice_is_missing_data() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("tile");
    std::fs::create_dir(&dir).unwrap();
    std::fs::write(dir.join("slice_0000.tif"), b"not an image").unwrap();

    let source = DirectoryTileSource::from_dirs(&[dir]).unwrap();
    let err: StitchError = source.read_slice(0, 0).unwrap_err().into();
    assert!(matches!(err, StitchError::Data(DataError::Decode { .. })));
    assert_eq!(err.exit_code(), 3);
}
