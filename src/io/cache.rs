//! Decoded slice cache.
//!
//! Row assembly with fractional depth offsets reads each source slice for two
//! consecutive output slices. This LRU cache keeps decoded slices around so
//! every file is decoded once per pass.
//!
//! # Size-Based Eviction
//!
//! The cache tracks the total size of cached slices in bytes and evicts
//! least-recently-used entries when the capacity is exceeded.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;

use crate::volume::Slice;

/// Default cache capacity: 256MB
pub const DEFAULT_SLICE_CACHE_CAPACITY: usize = 256 * 1024 * 1024;

/// Default maximum number of entries (to bound LRU overhead)
const DEFAULT_MAX_ENTRIES: usize = 4_096;

// =============================================================================
// Cache Key
// =============================================================================

/// Cache key for decoded slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SliceKey {
    /// Tile index within its source
    pub tile: usize,

    /// Depth index within the tile
    pub index: usize,
}

impl SliceKey {
    pub fn new(tile: usize, index: usize) -> Self {
        Self { tile, index }
    }
}

// =============================================================================
// Slice Cache
// =============================================================================

struct Inner {
    entries: LruCache<SliceKey, Arc<Slice>>,
    current_size: usize,
}

/// LRU cache for decoded slices with size-based capacity.
///
/// The cache is thread-safe and can be shared across blocking workers via
/// `Arc`.
pub struct SliceCache {
    inner: Mutex<Inner>,

    /// Maximum total size in bytes
    max_size: usize,
}

impl SliceCache {
    /// Create a new slice cache with default capacity (256MB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SLICE_CACHE_CAPACITY)
    }

    /// Create a new slice cache with the specified capacity in bytes.
    pub fn with_capacity(max_size: usize) -> Self {
        Self::with_capacity_and_entries(max_size, DEFAULT_MAX_ENTRIES)
    }

    /// Create a new slice cache with specified capacity and maximum entries.
    pub fn with_capacity_and_entries(max_size: usize, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN)),
                current_size: 0,
            }),
            max_size,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a slice from the cache, marking it as recently used.
    pub fn get(&self, key: &SliceKey) -> Option<Arc<Slice>> {
        self.lock().entries.get(key).cloned()
    }

    /// Check if a slice is cached without updating LRU order.
    pub fn contains(&self, key: &SliceKey) -> bool {
        self.lock().entries.contains(key)
    }

    /// Store a slice in the cache.
    ///
    /// If the cache is over capacity after insertion, least-recently-used
    /// entries are evicted until the cache is within capacity.
    pub fn put(&self, key: SliceKey, slice: Arc<Slice>) {
        let slice_size = slice_bytes(&slice);
        let mut inner = self.lock();

        if let Some(old) = inner.entries.peek(&key) {
            let old_size = slice_bytes(old);
            inner.current_size = inner.current_size.saturating_sub(old_size);
        }

        // The LRU may evict on its own when the entry limit is reached
        if let Some((evicted_key, evicted)) = inner.entries.push(key, slice) {
            if evicted_key != key {
                inner.current_size = inner.current_size.saturating_sub(slice_bytes(&evicted));
            }
        }
        inner.current_size += slice_size;

        while inner.current_size > self.max_size {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => {
                    inner.current_size = inner.current_size.saturating_sub(slice_bytes(&evicted));
                }
                None => break,
            }
        }
    }

    /// Return the cached slice, or decode it with `load` and cache it.
    pub fn get_or_load<E, F>(&self, key: SliceKey, load: F) -> Result<Arc<Slice>, E>
    where
        F: FnOnce() -> Result<Slice, E>,
    {
        if let Some(slice) = self.get(&key) {
            return Ok(slice);
        }
        let slice = Arc::new(load()?);
        self.put(key, Arc::clone(&slice));
        Ok(slice)
    }

    /// Remove a slice from the cache.
    pub fn remove(&self, key: &SliceKey) -> Option<Arc<Slice>> {
        let mut inner = self.lock();
        let removed = inner.entries.pop(key);
        if let Some(ref slice) = removed {
            inner.current_size = inner.current_size.saturating_sub(slice_bytes(slice));
        }
        removed
    }

    /// Drop every cached slice of `tile`.
    pub fn evict_tile(&self, tile: usize) {
        let mut inner = self.lock();
        let keys: Vec<SliceKey> = inner
            .entries
            .iter()
            .filter(|(key, _)| key.tile == tile)
            .map(|(key, _)| *key)
            .collect();
        for key in keys {
            if let Some(slice) = inner.entries.pop(&key) {
                inner.current_size = inner.current_size.saturating_sub(slice_bytes(&slice));
            }
        }
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.current_size = 0;
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Current total size of cached slices in bytes.
    pub fn size(&self) -> usize {
        self.lock().current_size
    }

    /// Maximum capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

impl Default for SliceCache {
    fn default() -> Self {
        Self::new()
    }
}

fn slice_bytes(slice: &Slice) -> usize {
    slice.len() * std::mem::size_of::<f32>()
}

// =============================================================================
// Tests
// =============================================================================
