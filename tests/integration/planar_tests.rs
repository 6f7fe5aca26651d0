//! Planar stitching of two image files.

use ndarray::Axis;
use tempfile::TempDir;

use tile_stitcher::io::{read_slice, write_slice, BitDepth};
use tile_stitcher::registration::{Deadline, PlanarLayout, PlanarOptions};
use tile_stitcher::volume::Slice;
use tile_stitcher::{stitch_planar_pair, ConfigError, ExhaustiveTranslationSolver, StitchError, Translation};

use super::test_utils::{scene, scene_region};

fn image(origin: (i64, i64), shape: (usize, usize)) -> Slice {
    scene_region((0, origin.0, origin.1), (1, shape.0, shape.1))
        .index_axis(Axis(0), 0)
        .to_owned()
}

fn options() -> PlanarOptions {
    PlanarOptions {
        integer_offsets: true,
        ..PlanarOptions::default()
    }
}

#[test]
fn test_planar_files_round_trip() {
    let root = TempDir::new().unwrap();
    let reference_path = root.path().join("reference.png");
    let moving_path = root.path().join("moving.png");
    let output_path = root.path().join("stitched.tif");

    write_slice(&reference_path, image((0, 10), (20, 30)).view(), BitDepth::Sixteen).unwrap();
    write_slice(&moving_path, image((0, 30), (20, 30)).view(), BitDepth::Sixteen).unwrap();

    let reference = read_slice(&reference_path).unwrap();
    let moving = read_slice(&moving_path).unwrap();
    let solver = ExhaustiveTranslationSolver::new([0, 3, 3]);
    let stitched =
        stitch_planar_pair(&reference, &moving, (0.0, -20.0), &solver, &options(), &Deadline::none())
            .unwrap();
    assert_eq!(stitched.layout, PlanarLayout::MovingRight);
    assert_eq!(stitched.placement, Translation::planar(0.0, 20.0));

    write_slice(&output_path, stitched.image.view(), BitDepth::Sixteen).unwrap();
    assert_eq!(read_slice(&output_path).unwrap(), image((0, 10), (20, 50)));
}

#[test]
fn test_planar_residual_on_minor_axis() {
    // The moving image is one row lower than the guess says.
    let reference = image((0, 10), (20, 30));
    let moving = image((1, 30), (20, 30));
    let solver = ExhaustiveTranslationSolver::new([0, 3, 3]);

    let stitched =
        stitch_planar_pair(&reference, &moving, (0.0, -20.0), &solver, &options(), &Deadline::none())
            .unwrap();
    assert_eq!(stitched.residual.rounded(), Translation::planar(1.0, 0.0));
    assert_eq!(stitched.image.dim(), (20, 50));

    // The moving image does not cover the first canvas row
    assert_eq!(stitched.image[[0, 40]], 0.0);
    assert_eq!(stitched.image[[5, 40]], scene(0, 5, 50));
    assert_eq!(stitched.image[[5, 5]], scene(0, 5, 15));
}

#[test]
fn test_diagonal_guess_is_rejected() {
    let reference = image((0, 0), (10, 10));
    let solver = ExhaustiveTranslationSolver::new([0, 3, 3]);
    let err = stitch_planar_pair(&reference, &reference, (4.0, 4.0), &solver, &options(), &Deadline::none())
        .unwrap_err();
    assert!(matches!(
        err,
        StitchError::Config(ConfigError::AmbiguousPlanarOffset { .. })
    ));
    assert_eq!(err.exit_code(), 2);
}
