//! Slice-file I/O.
//!
//! - `slices`: slice-set discovery, decoding and encoding
//! - `source`: tile sources over directories or in-memory volumes
//! - `sink`: incremental output of stitched slices
//! - `cache`: LRU cache of decoded slices

mod cache;
mod sink;
mod slices;
mod source;

pub use cache::{SliceCache, SliceKey, DEFAULT_SLICE_CACHE_CAPACITY};
pub use sink::{DirectorySink, MemorySink, SliceSink, TransferMode};
pub use slices::{
    open_cropped_volume, open_volume, read_slice, save_volume, slice_file_name, write_slice,
    BitDepth, SliceFormat, SliceSet, INDEX_WIDTH, SLICE_EXTENSIONS,
};
pub use source::{discover_tiles, DirectoryTileSource, MemoryTileSource, TileSource};
