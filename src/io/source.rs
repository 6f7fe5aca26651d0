//! Tile sources.
//!
//! A [`TileSource`] hands out the slices of an ordered list of tiles. The
//! directory source reads slice files lazily through a shared
//! [`SliceCache`]; the memory source serves volumes that are already
//! materialized.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{s, Axis};
use tracing::{debug, info};

use super::cache::{SliceCache, SliceKey};
use super::slices::{check_dimensions, read_slice, SliceSet};
use crate::error::{DataError, StitchError};
use crate::volume::{Bounds, Slice, Volume};

// =============================================================================
// TileSource Trait
// =============================================================================

/// Read access to an ordered list of tiles.
///
/// Implementations must be shareable across blocking workers.
pub trait TileSource: Send + Sync {
    /// Number of tiles.
    fn tile_count(&self) -> usize;

    /// Display name of a tile.
    fn tile_name(&self, tile: usize) -> Result<String, DataError>;

    /// Native `(depth, height, width)` of a tile.
    fn dimensions(&self, tile: usize) -> Result<(usize, usize, usize), DataError>;

    /// One slice of a tile.
    fn read_slice(&self, tile: usize, index: usize) -> Result<Arc<Slice>, DataError>;

    /// File backing a slice, when the source is file-based.
    fn slice_path(&self, _tile: usize, _index: usize) -> Option<PathBuf> {
        None
    }

    /// Read the region of a tile selected by `bounds`.
    fn read_cropped(&self, tile: usize, bounds: &Bounds) -> Result<Volume, StitchError> {
        let [depth, rows, cols] = bounds.resolve(self.dimensions(tile)?)?;
        let mut volume = Volume::zeros((depth.len(), rows.len(), cols.len()));
        for (z, index) in depth.enumerate() {
            let slice = self.read_slice(tile, index)?;
            volume
                .index_axis_mut(Axis(0), z)
                .assign(&slice.slice(s![rows.clone(), cols.clone()]));
        }
        Ok(volume)
    }

    /// Read a whole tile.
    fn read_volume(&self, tile: usize) -> Result<Volume, StitchError> {
        self.read_cropped(tile, &Bounds::full())
    }
}

fn check_tile(tile: usize, count: usize) -> Result<(), DataError> {
    if tile >= count {
        return Err(DataError::TileNotFound { index: tile, count });
    }
    Ok(())
}

// =============================================================================
// Directory Source
// =============================================================================

/// One tile directory and its slice files.
#[derive(Debug, Clone)]
struct TileEntry {
    name: String,
    slices: SliceSet,
}

/// Tiles stored as directories of slice files.
pub struct DirectoryTileSource {
    tiles: Vec<TileEntry>,
    cache: Arc<SliceCache>,
}

impl DirectoryTileSource {
    /// Source over explicit tile directories, in the given order.
    pub fn from_dirs<P: AsRef<Path>>(dirs: &[P]) -> Result<Self, DataError> {
        let tiles = dirs
            .iter()
            .map(|dir| {
                let dir = dir.as_ref();
                Ok(TileEntry {
                    name: tile_name_of(dir),
                    slices: SliceSet::discover(dir)?,
                })
            })
            .collect::<Result<Vec<_>, DataError>>()?;

        Ok(Self {
            tiles,
            cache: Arc::new(SliceCache::new()),
        })
    }

    /// Use a caller-provided cache, e.g. with a different capacity.
    ///
    /// Keys are tile indices, so the cache must not be shared with a
    /// source listing other tiles.
    pub fn with_cache(mut self, cache: Arc<SliceCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Read every tile's slices in reverse order.
    pub fn reversed(mut self) -> Self {
        for tile in &mut self.tiles {
            tile.slices = tile.slices.clone().reversed();
        }
        self.cache.clear();
        self
    }

    pub fn cache(&self) -> &Arc<SliceCache> {
        &self.cache
    }

    /// Directory of a tile.
    pub fn tile_dir(&self, tile: usize) -> Option<&Path> {
        self.tiles.get(tile).map(|t| t.slices.dir())
    }

    fn entry(&self, tile: usize) -> Result<&TileEntry, DataError> {
        check_tile(tile, self.tiles.len())?;
        Ok(&self.tiles[tile])
    }
}

impl TileSource for DirectoryTileSource {
    fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    fn tile_name(&self, tile: usize) -> Result<String, DataError> {
        Ok(self.entry(tile)?.name.clone())
    }

    fn dimensions(&self, tile: usize) -> Result<(usize, usize, usize), DataError> {
        let depth = self.entry(tile)?.slices.len();
        let (height, width) = self.read_slice(tile, 0)?.dim();
        Ok((depth, height, width))
    }

    fn read_slice(&self, tile: usize, index: usize) -> Result<Arc<Slice>, DataError> {
        let entry = self.entry(tile)?;
        let path = entry
            .slices
            .path(index)
            .ok_or(DataError::SliceOutOfRange {
                tile,
                index,
                depth: entry.slices.len(),
            })?;

        let slice = self
            .cache
            .get_or_load(SliceKey::new(tile, index), || read_slice(path))?;

        if index > 0 {
            if let Some(first) = self.cache.get(&SliceKey::new(tile, 0)) {
                check_dimensions(path, first.dim(), slice.dim())?;
            }
        }
        Ok(slice)
    }

    fn slice_path(&self, tile: usize, index: usize) -> Option<PathBuf> {
        self.tiles
            .get(tile)
            .and_then(|t| t.slices.path(index))
            .map(Path::to_path_buf)
    }
}

/// Discover tile directories under `dir` whose name starts with `prefix`.
///
/// Tiles are sorted by directory name, which is their acquisition order.
pub fn discover_tiles(dir: impl AsRef<Path>, prefix: &str) -> Result<DirectoryTileSource, DataError> {
    let dir = dir.as_ref();
    let no_tiles = || DataError::NoTiles {
        dir: dir.to_path_buf(),
        prefix: prefix.to_string(),
    };
    if !dir.is_dir() {
        return Err(no_tiles());
    }

    let entries = std::fs::read_dir(dir).map_err(|e| DataError::io(dir, e))?;
    let mut tile_dirs = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| DataError::io(dir, e))?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(prefix))
            .unwrap_or(false);
        if path.is_dir() && matches {
            tile_dirs.push(path);
        }
    }

    if tile_dirs.is_empty() {
        return Err(no_tiles());
    }
    tile_dirs.sort();

    info!(
        "Found {} tiles under {} with prefix '{}'",
        tile_dirs.len(),
        dir.display(),
        prefix
    );
    DirectoryTileSource::from_dirs(&tile_dirs)
}

fn tile_name_of(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}

// =============================================================================
// Memory Source
// =============================================================================

/// Tiles held as in-memory volumes.
#[derive(Debug, Clone, Default)]
pub struct MemoryTileSource {
    tiles: Vec<(String, Arc<Volume>)>,
}

impl MemoryTileSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source over volumes named `tile_0000`, `tile_0001`, ...
    pub fn from_volumes(volumes: Vec<Volume>) -> Self {
        let mut source = Self::new();
        for (i, volume) in volumes.into_iter().enumerate() {
            source.push(format!("tile_{:04}", i), volume);
        }
        source
    }

    /// Append a tile and return its index.
    pub fn push(&mut self, name: impl Into<String>, volume: Volume) -> usize {
        debug!("Holding tile {} in memory: {:?}", self.tiles.len(), volume.dim());
        self.tiles.push((name.into(), Arc::new(volume)));
        self.tiles.len() - 1
    }

    /// Shared handle to a tile volume.
    pub fn volume(&self, tile: usize) -> Result<Arc<Volume>, DataError> {
        check_tile(tile, self.tiles.len())?;
        Ok(Arc::clone(&self.tiles[tile].1))
    }
}

impl TileSource for MemoryTileSource {
    fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    fn tile_name(&self, tile: usize) -> Result<String, DataError> {
        check_tile(tile, self.tiles.len())?;
        Ok(self.tiles[tile].0.clone())
    }

    fn dimensions(&self, tile: usize) -> Result<(usize, usize, usize), DataError> {
        Ok(self.volume(tile)?.dim())
    }

    fn read_slice(&self, tile: usize, index: usize) -> Result<Arc<Slice>, DataError> {
        let volume = self.volume(tile)?;
        let depth = volume.dim().0;
        if index >= depth {
            return Err(DataError::SliceOutOfRange { tile, index, depth });
        }
        Ok(Arc::new(volume.index_axis(Axis(0), index).to_owned()))
    }

    fn read_cropped(&self, tile: usize, bounds: &Bounds) -> Result<Volume, StitchError> {
        let volume = self.volume(tile)?;
        Ok(crate::volume::crop(&volume, bounds)?)
    }
}
