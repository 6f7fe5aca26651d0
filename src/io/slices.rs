//! Slice-set reader and writer.
//!
//! A slice set is a directory of 2D image files, one per depth index, read in
//! lexicographic order. Decoding and encoding go through the `image` crate;
//! 8 and 16-bit greyscale values are kept as-is, any other pixel type is
//! converted to luma in `[0, 1]`.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageBuffer, ImageError, ImageFormat, Luma};
use ndarray::{s, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, DataError, StitchError};
use crate::volume::{Bounds, Slice, Volume};

/// File extensions recognised as slices.
pub const SLICE_EXTENSIONS: &[&str] = &["tif", "tiff", "png"];

/// Minimum number of digits of an output slice index.
pub const INDEX_WIDTH: usize = 4;

// =============================================================================
// Output Format
// =============================================================================

/// Integer depth of written slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum BitDepth {
    Eight,
    #[default]
    Sixteen,
}

impl BitDepth {
    /// Largest value the depth can represent.
    pub fn max_value(self) -> f32 {
        match self {
            BitDepth::Eight => u8::MAX as f32,
            BitDepth::Sixteen => u16::MAX as f32,
        }
    }
}

impl TryFrom<u8> for BitDepth {
    type Error = ConfigError;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            8 => Ok(BitDepth::Eight),
            16 => Ok(BitDepth::Sixteen),
            other => Err(ConfigError::UnsupportedBitDepth(other)),
        }
    }
}

impl From<BitDepth> for u8 {
    fn from(depth: BitDepth) -> u8 {
        match depth {
            BitDepth::Eight => 8,
            BitDepth::Sixteen => 16,
        }
    }
}

/// Container of written slices.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SliceFormat {
    #[default]
    Tiff,
    Png,
}

impl SliceFormat {
    pub fn extension(self) -> &'static str {
        match self {
            SliceFormat::Tiff => "tif",
            SliceFormat::Png => "png",
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            SliceFormat::Tiff => ImageFormat::Tiff,
            SliceFormat::Png => ImageFormat::Png,
        }
    }

    /// Format matching a file extension, if it is one we write.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "tif" | "tiff" => Some(SliceFormat::Tiff),
            "png" => Some(SliceFormat::Png),
            _ => None,
        }
    }
}

/// `{prefix}{index:04}.{extension}`, with at least four index digits.
pub fn slice_file_name(prefix: &str, index: usize, extension: &str) -> String {
    format!(
        "{}{:0width$}.{}",
        prefix,
        index,
        extension,
        width = INDEX_WIDTH
    )
}

// =============================================================================
// Slice Set
// =============================================================================

/// Ordered list of slice files in one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceSet {
    dir: PathBuf,
    paths: Vec<PathBuf>,
}

impl SliceSet {
    /// List the slice files of `dir`, sorted by file name.
    ///
    /// A missing directory or one without slice files is a
    /// [`DataError::EmptyTile`].
    pub fn discover(dir: impl AsRef<Path>) -> Result<Self, DataError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(DataError::EmptyTile(dir.to_path_buf()));
        }

        let entries = std::fs::read_dir(dir).map_err(|e| DataError::io(dir, e))?;
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| DataError::io(dir, e))?.path();
            if path.is_file() && is_slice_file(&path) {
                paths.push(path);
            }
        }

        if paths.is_empty() {
            return Err(DataError::EmptyTile(dir.to_path_buf()));
        }
        paths.sort();

        debug!("Discovered {} slices in {}", paths.len(), dir.display());
        Ok(Self {
            dir: dir.to_path_buf(),
            paths,
        })
    }

    /// Slice set over explicit paths, in the given order.
    pub fn from_paths(dir: impl Into<PathBuf>, paths: Vec<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            paths,
        }
    }

    /// Same files in reverse order.
    pub fn reversed(mut self) -> Self {
        self.paths.reverse();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn path(&self, index: usize) -> Option<&Path> {
        self.paths.get(index).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

fn is_slice_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SLICE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

// =============================================================================
// Reading
// =============================================================================

/// Decode one slice.
pub fn read_slice(path: &Path) -> Result<Slice, DataError> {
    let image = image::open(path).map_err(|e| decode_error(path, e))?;
    let (width, height) = (image.width() as usize, image.height() as usize);

    let data: Vec<f32> = match image {
        DynamicImage::ImageLuma8(buffer) => buffer.into_raw().into_iter().map(f32::from).collect(),
        DynamicImage::ImageLuma16(buffer) => {
            buffer.into_raw().into_iter().map(f32::from).collect()
        }
        other => other.to_luma32f().into_raw(),
    };

    Array2::from_shape_vec((height, width), data).map_err(|e| DataError::Decode {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Decode every slice into a volume.
pub fn open_volume(paths: &[PathBuf]) -> Result<Volume, DataError> {
    let first = paths
        .first()
        .ok_or_else(|| DataError::EmptyTile(PathBuf::new()))?;
    let first_slice = read_slice(first)?;
    let (height, width) = first_slice.dim();

    let mut volume = Volume::zeros((paths.len(), height, width));
    volume.index_axis_mut(Axis(0), 0).assign(&first_slice);

    for (z, path) in paths.iter().enumerate().skip(1) {
        let slice = read_slice(path)?;
        check_dimensions(path, (height, width), slice.dim())?;
        volume.index_axis_mut(Axis(0), z).assign(&slice);
    }
    Ok(volume)
}

/// Decode the region of a slice set selected by `bounds`.
///
/// Only the slices inside the depth range are read.
pub fn open_cropped_volume(paths: &[PathBuf], bounds: &Bounds) -> Result<Volume, StitchError> {
    let depth = bounds.depth.resolve(paths.len())?;
    let selected = &paths[depth];
    let first = selected
        .first()
        .ok_or_else(|| DataError::EmptyTile(PathBuf::new()))?;

    let first_slice = read_slice(first)?;
    let shape = first_slice.dim();
    let rows = bounds.height.resolve(shape.0)?;
    let cols = bounds.width.resolve(shape.1)?;

    let mut volume = Volume::zeros((selected.len(), rows.len(), cols.len()));
    for (z, path) in selected.iter().enumerate() {
        let slice = if z == 0 {
            first_slice.clone()
        } else {
            read_slice(path)?
        };
        check_dimensions(path, shape, slice.dim())?;
        volume
            .index_axis_mut(Axis(0), z)
            .assign(&slice.slice(s![rows.clone(), cols.clone()]));
    }
    Ok(volume)
}

pub(crate) fn check_dimensions(
    path: &Path,
    expected: (usize, usize),
    actual: (usize, usize),
) -> Result<(), DataError> {
    if expected != actual {
        return Err(DataError::InconsistentSlice {
            path: path.to_path_buf(),
            expected,
            actual,
        });
    }
    Ok(())
}

fn decode_error(path: &Path, error: ImageError) -> DataError {
    match error {
        ImageError::IoError(source) => DataError::io(path, source),
        other => DataError::Decode {
            path: path.to_path_buf(),
            message: other.to_string(),
        },
    }
}

// =============================================================================
// Writing
// =============================================================================

/// Encode one slice, clamping and rounding values to `bit_depth`.
///
/// The container follows the file extension. The file is opened, written
/// and closed within this call.
pub fn write_slice(path: &Path, slice: ArrayView2<f32>, bit_depth: BitDepth) -> Result<(), DataError> {
    let format = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(SliceFormat::from_extension)
        .ok_or_else(|| DataError::Encode {
            path: path.to_path_buf(),
            message: "unsupported slice extension".to_string(),
        })?;

    let (height, width) = slice.dim();
    let max = bit_depth.max_value();
    let clamped = slice.iter().map(|&v| {
        if v.is_finite() {
            v.round().clamp(0.0, max)
        } else {
            0.0
        }
    });

    let image = match bit_depth {
        BitDepth::Eight => {
            ImageBuffer::<Luma<u8>, Vec<u8>>::from_raw(
                width as u32,
                height as u32,
                clamped.map(|v| v as u8).collect(),
            )
            .map(DynamicImage::ImageLuma8)
        }
        BitDepth::Sixteen => {
            ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(
                width as u32,
                height as u32,
                clamped.map(|v| v as u16).collect(),
            )
            .map(DynamicImage::ImageLuma16)
        }
    }
    .ok_or_else(|| DataError::Encode {
        path: path.to_path_buf(),
        message: format!("cannot build a {}x{} image buffer", width, height),
    })?;

    let file = File::create(path).map_err(|e| DataError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    image
        .write_to(&mut writer, format.image_format())
        .map_err(|e| match e {
            ImageError::IoError(source) => DataError::io(path, source),
            other => DataError::Encode {
                path: path.to_path_buf(),
                message: other.to_string(),
            },
        })
}

/// Write every depth index of `volume` as `{prefix}{index:04}.{ext}` in `dir`.
pub fn save_volume(
    volume: &Volume,
    dir: &Path,
    prefix: &str,
    format: SliceFormat,
    bit_depth: BitDepth,
) -> Result<Vec<PathBuf>, DataError> {
    std::fs::create_dir_all(dir).map_err(|e| DataError::io(dir, e))?;

    let mut written = Vec::with_capacity(volume.dim().0);
    for (z, slice) in volume.axis_iter(Axis(0)).enumerate() {
        let path = dir.join(slice_file_name(prefix, z, format.extension()));
        write_slice(&path, slice, bit_depth)?;
        written.push(path);
    }
    debug!("Saved {} slices to {}", written.len(), dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ramp(depth: usize, height: usize, width: usize) -> Volume {
        Volume::from_shape_fn((depth, height, width), |(z, y, x)| {
            (z * 1000 + y * 10 + x) as f32
        })
    }

    #[test]
    fn test_slice_file_name_padding() {
        assert_eq!(slice_file_name("out_", 7, "tif"), "out_0007.tif");
        assert_eq!(slice_file_name("", 12345, "png"), "12345.png");
    }

    #[test]
    fn test_bit_depth_conversion() {
        assert_eq!(BitDepth::try_from(8), Ok(BitDepth::Eight));
        assert_eq!(BitDepth::try_from(16), Ok(BitDepth::Sixteen));
        assert_eq!(
            BitDepth::try_from(12),
            Err(ConfigError::UnsupportedBitDepth(12))
        );
    }

    #[test]
    fn test_save_and_open_round_trip() {
        let dir = TempDir::new().unwrap();
        let volume = ramp(3, 4, 5);

        let written = save_volume(
            &volume,
            dir.path(),
            "slice_",
            SliceFormat::Tiff,
            BitDepth::Sixteen,
        )
        .unwrap();
        assert_eq!(written.len(), 3);
        assert!(written[2].ends_with("slice_0002.tif"));

        let set = SliceSet::discover(dir.path()).unwrap();
        assert_eq!(set.len(), 3);
        let reopened = open_volume(set.paths()).unwrap();
        assert_eq!(reopened, volume);
    }

    #[test]
    fn test_open_cropped_volume() {
        let dir = TempDir::new().unwrap();
        let volume = ramp(4, 6, 8);
        save_volume(&volume, dir.path(), "", SliceFormat::Png, BitDepth::Sixteen).unwrap();
        let set = SliceSet::discover(dir.path()).unwrap();

        let bounds = Bounds::full()
            .with_depth(crate::volume::AxisRange::new(1, 2))
            .with_width(crate::volume::AxisRange::last(3));
        let cropped = open_cropped_volume(set.paths(), &bounds).unwrap();

        assert_eq!(cropped.dim(), (2, 6, 3));
        assert_eq!(cropped[[0, 0, 0]], volume[[1, 0, 5]]);
        assert_eq!(cropped[[1, 5, 2]], volume[[2, 5, 7]]);
    }

    #[test]
    fn test_eight_bit_clamps() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clamped.png");
        let slice = ndarray::array![[-4.0f32, 100.4], [300.0, f32::NAN]];

        write_slice(&path, slice.view(), BitDepth::Eight).unwrap();
        let back = read_slice(&path).unwrap();
        assert_eq!(back, ndarray::array![[0.0f32, 100.0], [255.0, 0.0]]);
    }

    #[test]
    fn test_discover_missing_or_empty_directory() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            SliceSet::discover(dir.path()),
            Err(DataError::EmptyTile(_))
        ));
        assert!(matches!(
            SliceSet::discover(dir.path().join("absent")),
            Err(DataError::EmptyTile(_))
        ));

        std::fs::write(dir.path().join("notes.txt"), b"not a slice").unwrap();
        assert!(SliceSet::discover(dir.path()).is_err());
    }

    #[test]
    fn test_inconsistent_slices_are_rejected() {
        let dir = TempDir::new().unwrap();
        write_slice(&dir.path().join("a.png"), Slice::zeros((2, 2)).view(), BitDepth::Eight).unwrap();
        write_slice(&dir.path().join("b.png"), Slice::zeros((3, 2)).view(), BitDepth::Eight).unwrap();

        let set = SliceSet::discover(dir.path()).unwrap();
        assert!(matches!(
            open_volume(set.paths()),
            Err(DataError::InconsistentSlice { .. })
        ));
    }
}
