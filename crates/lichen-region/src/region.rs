use std::collections::BTreeSet;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;

use lichen_world::loggate::monotonic_nanos;
use lichen_world::pos::ColumnKey;
use lichen_world::{BiomeId, RegionKey};

/// Structural occupancy estimates, in bytes per entry.
pub(crate) const REGION_BASE_BYTES: u64 = 1024;
const RESULT_BYTES: u64 = 48;
const SURFACE_BYTES: u64 = 48;
const COLUMN_BYTES: u64 = 48;
const MISMATCH_BYTES: u64 = 40;
const SPATIAL_BYTES: u64 = 56;
const ANCHOR_BYTES: u64 = 24;

/// A memoized smoothing answer for one column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BiomeResult {
    pub biome: BiomeId,
    pub was_micro: bool,
}

/// Micro-component column memo: queries whose surface biome matches get the
/// replacement without re-entering the pipeline.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ColumnMemo {
    pub surface: BiomeId,
    pub replacement: BiomeId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct SpatialKey {
    pub gx: i32,
    pub gz: i32,
    pub biome: BiomeId,
}

/// A fill outcome reusable by nearby queries of the same surface biome.
#[derive(Clone, Copy, Debug)]
pub struct SpatialResult {
    pub is_large: bool,
    pub replacement: Option<BiomeId>,
    /// Chebyshev coverage radius in blocks around the grid point.
    pub radius: i32,
    pub stored_at_nanos: u64,
}

/// One 512x512-block tile of cache state. All layers are interior-mutable;
/// the aggregate byte estimate drives LRU eviction.
pub(crate) struct Region {
    pub key: RegionKey,
    pub results: RwLock<HashMap<(ColumnKey, i32), BiomeResult>>,
    pub surface: RwLock<HashMap<ColumnKey, BiomeResult>>,
    pub columns: RwLock<HashMap<ColumnKey, ColumnMemo>>,
    pub mismatch: RwLock<HashMap<(ColumnKey, BiomeId), bool>>,
    pub anchors: RwLock<HashMap<BiomeId, BTreeSet<u64>>>,
    pub spatial: RwLock<HashMap<SpatialKey, SpatialResult>>,
    bytes: AtomicU64,
    last_access: AtomicU64,
}

impl Region {
    pub(crate) fn new(key: RegionKey) -> Self {
        Self {
            key,
            results: RwLock::new(HashMap::new()),
            surface: RwLock::new(HashMap::new()),
            columns: RwLock::new(HashMap::new()),
            mismatch: RwLock::new(HashMap::new()),
            anchors: RwLock::new(HashMap::new()),
            spatial: RwLock::new(HashMap::new()),
            bytes: AtomicU64::new(REGION_BASE_BYTES),
            last_access: AtomicU64::new(monotonic_nanos()),
        }
    }

    #[inline]
    pub(crate) fn touch(&self) {
        self.last_access.store(monotonic_nanos(), Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Account for `delta` bytes of structural growth (or shrinkage), and
    /// report it so the cache-wide total can follow.
    fn grow(&self, delta: u64) -> u64 {
        self.bytes.fetch_add(delta, Ordering::Relaxed);
        delta
    }

    fn shrink(&self, delta: u64) -> u64 {
        self.bytes.fetch_sub(delta, Ordering::Relaxed);
        delta
    }

    pub(crate) fn put_result(&self, col: ColumnKey, y: i32, result: BiomeResult) -> u64 {
        let mut map = self.results.write().unwrap_or_else(|e| e.into_inner());
        if map.insert((col, y), result).is_none() {
            self.grow(RESULT_BYTES)
        } else {
            0
        }
    }

    pub(crate) fn remove_result(&self, col: ColumnKey, y: i32) -> u64 {
        let mut map = self.results.write().unwrap_or_else(|e| e.into_inner());
        if map.remove(&(col, y)).is_some() {
            self.shrink(RESULT_BYTES)
        } else {
            0
        }
    }

    pub(crate) fn put_surface(&self, col: ColumnKey, result: BiomeResult) -> u64 {
        let mut map = self.surface.write().unwrap_or_else(|e| e.into_inner());
        if map.insert(col, result).is_none() {
            self.grow(SURFACE_BYTES)
        } else {
            0
        }
    }

    pub(crate) fn remove_surface(&self, col: ColumnKey) -> u64 {
        let mut map = self.surface.write().unwrap_or_else(|e| e.into_inner());
        if map.remove(&col).is_some() {
            self.shrink(SURFACE_BYTES)
        } else {
            0
        }
    }

    pub(crate) fn put_column(&self, col: ColumnKey, memo: ColumnMemo) -> u64 {
        let mut map = self.columns.write().unwrap_or_else(|e| e.into_inner());
        if map.insert(col, memo).is_none() {
            self.grow(COLUMN_BYTES)
        } else {
            0
        }
    }

    pub(crate) fn remove_column(&self, col: ColumnKey) -> u64 {
        let mut map = self.columns.write().unwrap_or_else(|e| e.into_inner());
        if map.remove(&col).is_some() {
            self.shrink(COLUMN_BYTES)
        } else {
            0
        }
    }

    pub(crate) fn put_mismatch(&self, col: ColumnKey, biome: BiomeId, value: bool) -> u64 {
        let mut map = self.mismatch.write().unwrap_or_else(|e| e.into_inner());
        if map.insert((col, biome), value).is_none() {
            self.grow(MISMATCH_BYTES)
        } else {
            0
        }
    }

    pub(crate) fn put_anchor(&self, biome: BiomeId, packed: u64) -> u64 {
        let mut map = self.anchors.write().unwrap_or_else(|e| e.into_inner());
        if map.entry(biome).or_default().insert(packed) {
            self.grow(ANCHOR_BYTES)
        } else {
            0
        }
    }

    pub(crate) fn put_spatial(&self, key: SpatialKey, result: SpatialResult) -> u64 {
        let mut map = self.spatial.write().unwrap_or_else(|e| e.into_inner());
        if map.insert(key, result).is_none() {
            self.grow(SPATIAL_BYTES)
        } else {
            0
        }
    }

    /// Drop one whole layer; returns the bytes released.
    pub(crate) fn drain_spatial(&self) -> u64 {
        let mut map = self.spatial.write().unwrap_or_else(|e| e.into_inner());
        let n = map.len() as u64;
        map.clear();
        self.shrink(n * SPATIAL_BYTES)
    }

    pub(crate) fn drain_surface(&self) -> u64 {
        let mut released = {
            let mut map = self.surface.write().unwrap_or_else(|e| e.into_inner());
            let n = map.len() as u64;
            map.clear();
            self.shrink(n * SURFACE_BYTES)
        };
        released += {
            let mut map = self.results.write().unwrap_or_else(|e| e.into_inner());
            let n = map.len() as u64;
            map.clear();
            self.shrink(n * RESULT_BYTES)
        };
        released += {
            let mut map = self.columns.write().unwrap_or_else(|e| e.into_inner());
            let n = map.len() as u64;
            map.clear();
            self.shrink(n * COLUMN_BYTES)
        };
        released
    }

    pub(crate) fn drain_anchors(&self) -> u64 {
        let mut map = self.anchors.write().unwrap_or_else(|e| e.into_inner());
        let n: u64 = map.values().map(|set| set.len() as u64).sum();
        map.clear();
        self.shrink(n * ANCHOR_BYTES)
    }

    pub(crate) fn drain_mismatch(&self) -> u64 {
        let mut map = self.mismatch.write().unwrap_or_else(|e| e.into_inner());
        let n = map.len() as u64;
        map.clear();
        self.shrink(n * MISMATCH_BYTES)
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.bytes() <= REGION_BASE_BYTES
    }
}
