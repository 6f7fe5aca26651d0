//! Test utilities for integration tests.
//!
//! This module provides a deterministic textured scene and helpers that cut
//! tiles out of it and write them to disk as slice sets.

use std::path::{Path, PathBuf};

use tile_stitcher::io::{save_volume, BitDepth, SliceFormat};
use tile_stitcher::Volume;

// =============================================================================
// Scene
// =============================================================================

/// Value of the global scene at `(z, y, x)`.
///
/// Every voxel is an independent pseudo-random integer in `[100, 1100)`, so
/// any misplacement shows up as a mismatch and 16-bit files store it exactly.
pub fn scene(z: i64, y: i64, x: i64) -> f32 {
    let key = ((z as u64) << 40) ^ ((y as u64) << 20) ^ (x as u64);
    let mut v = key ^ 0x9E37_79B9_7F4A_7C15;
    v = (v ^ (v >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    v = (v ^ (v >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    (100 + (v ^ (v >> 31)) % 1000) as f32
}

/// Region of the scene with its first voxel at `origin`.
pub fn scene_region(origin: (i64, i64, i64), shape: (usize, usize, usize)) -> Volume {
    Volume::from_shape_fn(shape, |(z, y, x)| {
        scene(origin.0 + z as i64, origin.1 + y as i64, origin.2 + x as i64)
    })
}

// =============================================================================
// Tiles on Disk
// =============================================================================

/// Write `volume` as a tile directory `root/name` of 16-bit slices.
pub fn write_tile(root: &Path, name: &str, volume: &Volume, format: SliceFormat) -> PathBuf {
    let dir = root.join(name);
    save_volume(volume, &dir, "slice_", format, BitDepth::Sixteen).unwrap();
    dir
}

/// Tiles stacked along depth: tile `k` starts at global slice
/// `k * displacement`.
pub fn write_stacked_tiles(
    root: &Path,
    count: usize,
    shape: (usize, usize, usize),
    displacement: usize,
) -> Vec<PathBuf> {
    (0..count)
        .map(|k| {
            let volume = scene_region(((k * displacement) as i64, 0, 0), shape);
            write_tile(root, &format!("tile_{:02}", k), &volume, SliceFormat::Tiff)
        })
        .collect()
}

/// Expected stitched stack of [`write_stacked_tiles`].
pub fn stacked_scene(count: usize, shape: (usize, usize, usize), displacement: usize) -> Volume {
    let depth = (count - 1) * displacement + shape.0;
    scene_region((0, 0, 0), (depth, shape.1, shape.2))
}
