//! Slice sinks.
//!
//! Stitched output is emitted one slice at a time, in output order. A sink
//! either transfers an existing slice file unchanged or encodes a computed
//! slice. The stitched stack is never held in memory by the pipeline.

use std::path::{Path, PathBuf};

use ndarray::{Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::slices::{read_slice, slice_file_name, write_slice, BitDepth, SliceFormat};
use crate::error::DataError;
use crate::volume::{Slice, Volume};

/// How source slice files reach the output directory.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    #[default]
    Copy,
    Move,
}

// =============================================================================
// SliceSink Trait
// =============================================================================

/// Destination of emitted output slices.
pub trait SliceSink: Send {
    /// Emit an existing slice file as output slice `index`.
    fn transfer(&mut self, index: usize, source: &Path, mode: TransferMode) -> Result<(), DataError>;

    /// Encode a computed slice as output slice `index`.
    fn write(&mut self, index: usize, slice: ArrayView2<f32>) -> Result<(), DataError>;

    /// Number of slices emitted so far.
    fn emitted(&self) -> usize;
}

// =============================================================================
// Directory Sink
// =============================================================================

/// Writes `{prefix}{index:04}.{ext}` files into a directory.
///
/// Transferred files keep their source extension; computed slices use the
/// configured format and bit depth.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
    prefix: String,
    format: SliceFormat,
    bit_depth: BitDepth,
    written: Vec<PathBuf>,
}

impl DirectorySink {
    /// Create the output directory if needed.
    pub fn create(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        format: SliceFormat,
        bit_depth: BitDepth,
    ) -> Result<Self, DataError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| DataError::io(&dir, e))?;
        Ok(Self {
            dir,
            prefix: prefix.into(),
            format,
            bit_depth,
            written: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Paths written so far, in emission order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn output_path(&self, index: usize, extension: &str) -> PathBuf {
        self.dir
            .join(slice_file_name(&self.prefix, index, extension))
    }
}

impl SliceSink for DirectorySink {
    fn transfer(&mut self, index: usize, source: &Path, mode: TransferMode) -> Result<(), DataError> {
        let extension = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or(self.format.extension());
        let destination = self.output_path(index, extension);

        match mode {
            TransferMode::Copy => {
                std::fs::copy(source, &destination).map_err(|e| DataError::io(source, e))?;
            }
            TransferMode::Move => {
                if let Err(e) = std::fs::rename(source, &destination) {
                    // Renames fail across filesystems
                    debug!("Rename of {} failed ({}), copying instead", source.display(), e);
                    std::fs::copy(source, &destination).map_err(|e| DataError::io(source, e))?;
                    std::fs::remove_file(source).map_err(|e| DataError::io(source, e))?;
                }
            }
        }

        self.written.push(destination);
        Ok(())
    }

    fn write(&mut self, index: usize, slice: ArrayView2<f32>) -> Result<(), DataError> {
        let destination = self.output_path(index, self.format.extension());
        write_slice(&destination, slice, self.bit_depth)?;
        self.written.push(destination);
        Ok(())
    }

    fn emitted(&self) -> usize {
        self.written.len()
    }
}

// =============================================================================
// Memory Sink
// =============================================================================

/// Keeps emitted slices in memory, in index order.
///
/// Transferred files are decoded; the transfer mode is recorded but the
/// source file is left in place.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    slices: Vec<(usize, Slice)>,
    transfers: Vec<(usize, PathBuf, TransferMode)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emitted slices as `(index, slice)` pairs.
    pub fn slices(&self) -> &[(usize, Slice)] {
        &self.slices
    }

    /// Recorded file transfers.
    pub fn transfers(&self) -> &[(usize, PathBuf, TransferMode)] {
        &self.transfers
    }

    /// Stack the emitted slices into a volume, ordered by index.
    ///
    /// Returns `None` when nothing was emitted or slice shapes differ.
    pub fn into_volume(mut self) -> Option<Volume> {
        self.slices.sort_by_key(|(index, _)| *index);
        let (height, width) = self.slices.first()?.1.dim();
        if self.slices.iter().any(|(_, s)| s.dim() != (height, width)) {
            warn!("Emitted slices have different shapes");
            return None;
        }

        let mut volume = Array3::zeros((self.slices.len(), height, width));
        for (z, (_, slice)) in self.slices.iter().enumerate() {
            volume.index_axis_mut(Axis(0), z).assign(slice);
        }
        Some(volume)
    }
}

impl SliceSink for MemorySink {
    fn transfer(&mut self, index: usize, source: &Path, mode: TransferMode) -> Result<(), DataError> {
        let slice = read_slice(source)?;
        self.transfers.push((index, source.to_path_buf(), mode));
        self.slices.push((index, slice));
        Ok(())
    }

    fn write(&mut self, index: usize, slice: ArrayView2<f32>) -> Result<(), DataError> {
        self.slices.push((index, slice.to_owned()));
        Ok(())
    }

    fn emitted(&self) -> usize {
        self.slices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_directory_sink_names_and_extensions() {
        let root = TempDir::new().unwrap();
        let source = root.path().join("src.png");
        write_slice(&source, Slice::from_elem((2, 2), 7.0).view(), BitDepth::Eight).unwrap();

        let mut sink =
            DirectorySink::create(root.path().join("out"), "vol_", SliceFormat::Tiff, BitDepth::Sixteen)
                .unwrap();
        sink.transfer(0, &source, TransferMode::Copy).unwrap();
        sink.write(1, Slice::from_elem((2, 2), 300.0).view()).unwrap();

        assert_eq!(sink.emitted(), 2);
        assert!(sink.written()[0].ends_with("vol_0000.png"));
        assert!(sink.written()[1].ends_with("vol_0001.tif"));
        assert!(source.exists());
        assert_eq!(read_slice(&sink.written()[1]).unwrap()[[1, 1]], 300.0);
    }

    #[test]
    fn test_directory_sink_move_removes_source() {
        let root = TempDir::new().unwrap();
        let source = root.path().join("src.tif");
        write_slice(&source, Slice::zeros((2, 3)).view(), BitDepth::Sixteen).unwrap();

        let mut sink =
            DirectorySink::create(root.path().join("out"), "", SliceFormat::Tiff, BitDepth::Sixteen)
                .unwrap();
        sink.transfer(5, &source, TransferMode::Move).unwrap();

        assert!(!source.exists());
        assert!(root.path().join("out").join("0005.tif").exists());
    }

    #[test]
    fn test_memory_sink_into_volume_orders_by_index() {
        let mut sink = MemorySink::new();
        sink.write(1, Slice::from_elem((2, 2), 1.0).view()).unwrap();
        sink.write(0, Slice::from_elem((2, 2), 0.0).view()).unwrap();

        let volume = sink.into_volume().unwrap();
        assert_eq!(volume.dim(), (2, 2, 2));
        assert_eq!(volume[[0, 0, 0]], 0.0);
        assert_eq!(volume[[1, 1, 1]], 1.0);
    }
}
