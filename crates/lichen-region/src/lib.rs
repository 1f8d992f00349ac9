//! Layered per-region cache and collaborative flood-fill dispatcher.
//!
//! Space is partitioned into 512x512-block regions, each holding several
//! memo layers (per-column results, surface answers, micro-column memos,
//! mismatch memos, large-area anchors, spatial fill reuse). Region creation
//! and per-column computation are serialized through striped locks; the
//! dispatcher coalesces concurrent fills per `(x, z, biome)` fingerprint.
#![forbid(unsafe_code)]

mod region;
mod task;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use hashbrown::HashMap;
use hashbrown::hash_map::Entry;

use lichen_world::loggate::monotonic_nanos;
use lichen_world::pos::{self, ColumnKey};
use lichen_world::{BiomeCatalog, BiomeId, CellPos, RegionKey, Striped, pack_center, unpack_center};

use region::{ColumnMemo, Region, SpatialKey};

pub use region::{BiomeResult, SpatialResult};
pub use task::{FillResult, FillTask, WaitOutcome};

/// Chebyshev coverage radius of one large-area anchor, in blocks.
pub const ANCHOR_RADIUS: i32 = 32;

/// Spatial-reuse entries expire after this long.
pub const SPATIAL_TTL: Duration = Duration::from_secs(30);

const SPATIAL_GRIDS: [i32; 3] = [32, 64, 128];

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct FillKey {
    x: i32,
    z: i32,
    biome: BiomeId,
}

/// Dispatcher handle: the inserting caller becomes the producer and must
/// run the fill to completion; everyone else awaits the shared task.
pub struct FillHandle {
    pub task: Arc<FillTask>,
    pub producer: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RegionCacheStats {
    pub regions: usize,
    pub memory_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub fills_started: u64,
    pub evictions: u64,
}

impl RegionCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct RegionCache {
    regions: RwLock<HashMap<RegionKey, Arc<Region>>>,
    region_locks: Striped<Mutex<()>>,
    position_locks: Striped<Mutex<()>>,
    fills: Mutex<HashMap<FillKey, Arc<FillTask>>>,
    catalog: Arc<dyn BiomeCatalog>,
    max_memory: u64,
    memory: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    fills_started: AtomicU64,
    evictions: AtomicU64,
}

impl RegionCache {
    pub fn new(catalog: Arc<dyn BiomeCatalog>, max_memory_bytes: u64) -> Self {
        Self {
            regions: RwLock::new(HashMap::new()),
            region_locks: Striped::new(256, || Mutex::new(())),
            position_locks: Striped::new(4096, || Mutex::new(())),
            fills: Mutex::new(HashMap::new()),
            catalog,
            max_memory: max_memory_bytes,
            memory: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            fills_started: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Memoized lookup for one position, or a serialized computation.
    ///
    /// The position stripe guarantees the computer runs at most once per
    /// `(bx, bz)` column at a time, which is what makes the memo layers it
    /// populates deterministic.
    pub fn get_or_compute(
        &self,
        bx: i32,
        by: i32,
        bz: i32,
        vanilla: BiomeId,
        compute: impl FnOnce() -> BiomeResult,
    ) -> BiomeResult {
        let region = self.region_for(bx, bz);
        let col = pos::column_key(bx, bz);

        if let Some(hit) = self.probe(&region, col, by, vanilla) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return hit;
        }

        let stripe = self.position_locks.get(&(bx, bz));
        let _guard = stripe.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(hit) = self.probe(&region, col, by, vanilla) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return hit;
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let result = compute();
        self.grow(region.put_result(col, by, result));
        result
    }

    /// Memo layers consulted before computing: the per-position result and
    /// the micro-column memo. Entries failing the validity predicate are
    /// removed and treated as misses.
    fn probe(&self, region: &Region, col: ColumnKey, by: i32, vanilla: BiomeId) -> Option<BiomeResult> {
        let cached = region
            .results
            .read()
            .ok()
            .and_then(|map| map.get(&(col, by)).copied());
        if let Some(result) = cached {
            if self.catalog.is_valid(result.biome) {
                return Some(result);
            }
            self.shrink(region.remove_result(col, by));
        }

        let memo = region
            .columns
            .read()
            .ok()
            .and_then(|map| map.get(&col).copied());
        if let Some(memo) = memo {
            if memo.surface == vanilla {
                if self.catalog.is_valid(memo.replacement) {
                    return Some(BiomeResult {
                        biome: memo.replacement,
                        was_micro: true,
                    });
                }
                self.shrink(region.remove_column(col));
            }
        }
        None
    }

    /// Register interest in a fill. The first caller per fingerprint becomes
    /// the producer; completed tasks stay registered as a result cache.
    pub fn try_start_fill(&self, bx: i32, bz: i32, biome: BiomeId) -> FillHandle {
        let key = FillKey { x: bx, z: bz, biome };
        let mut fills = self.fills.lock().unwrap_or_else(|e| e.into_inner());
        match fills.entry(key) {
            Entry::Occupied(entry) => FillHandle {
                task: Arc::clone(entry.get()),
                producer: false,
            },
            Entry::Vacant(entry) => {
                let task = Arc::new(FillTask::new());
                entry.insert(Arc::clone(&task));
                self.fills_started.fetch_add(1, Ordering::Relaxed);
                FillHandle {
                    task,
                    producer: true,
                }
            }
        }
    }

    pub fn existing_fill(&self, bx: i32, bz: i32, biome: BiomeId) -> Option<Arc<FillTask>> {
        let key = FillKey { x: bx, z: bz, biome };
        self.fills
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
    }

    /// Publish a fill outcome: memoize micro columns, then complete the task.
    pub fn complete_fill(
        &self,
        bx: i32,
        bz: i32,
        biome: BiomeId,
        positions: Vec<CellPos>,
        is_large: bool,
        replacement: BiomeId,
    ) {
        let key = FillKey { x: bx, z: bz, biome };
        let task = self
            .fills
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned();
        let Some(task) = task else { return };

        if !is_large {
            for cell in &positions {
                for dx in 0..4 {
                    for dz in 0..4 {
                        let cx = cell.block_x() + dx;
                        let cz = cell.block_z() + dz;
                        let region = self.region_for(cx, cz);
                        self.grow(region.put_column(
                            pos::column_key(cx, cz),
                            ColumnMemo {
                                surface: biome,
                                replacement,
                            },
                        ));
                    }
                }
            }
        }

        task.complete(FillResult {
            positions,
            is_large,
            replacement,
        });
    }

    pub fn mark_large_area(&self, bx: i32, bz: i32, biome: BiomeId) {
        let region = self.region_for(bx, bz);
        self.grow(region.put_anchor(biome, pack_center(bx, bz)));
    }

    /// Whether a known large-component anchor covers this position.
    pub fn is_known_large_area(&self, bx: i32, bz: i32, biome: BiomeId) -> bool {
        let Some(region) = self.peek_region(bx, bz) else {
            return false;
        };
        let anchors = match region.anchors.read() {
            Ok(map) => map,
            Err(_) => return false,
        };
        let Some(centers) = anchors.get(&biome) else {
            return false;
        };
        centers.iter().any(|packed| {
            let (cx, cz) = unpack_center(*packed);
            (bx - cx).abs() <= ANCHOR_RADIUS && (bz - cz).abs() <= ANCHOR_RADIUS
        })
    }

    /// Store a fill outcome for nearby reuse, on the smallest grid whose
    /// half-spacing exceeds the coverage radius.
    pub fn put_spatial(
        &self,
        bx: i32,
        bz: i32,
        biome: BiomeId,
        is_large: bool,
        replacement: Option<BiomeId>,
        radius: i32,
    ) {
        let grid = SPATIAL_GRIDS
            .iter()
            .copied()
            .find(|g| radius < g / 2)
            .unwrap_or(128);
        let gx = bx.div_euclid(grid) * grid;
        let gz = bz.div_euclid(grid) * grid;
        let region = self.region_for(gx, gz);
        self.grow(region.put_spatial(
            SpatialKey { gx, gz, biome },
            SpatialResult {
                is_large,
                replacement,
                radius,
                stored_at_nanos: monotonic_nanos(),
            },
        ));
    }

    /// Probe the three spatial grids for a fresh entry covering the query.
    pub fn get_spatial(&self, bx: i32, bz: i32, biome: BiomeId) -> Option<SpatialResult> {
        let now = monotonic_nanos();
        for grid in SPATIAL_GRIDS {
            let gx = bx.div_euclid(grid) * grid;
            let gz = bz.div_euclid(grid) * grid;
            let Some(region) = self.peek_region(gx, gz) else {
                continue;
            };
            let entry = region
                .spatial
                .read()
                .ok()
                .and_then(|map| map.get(&SpatialKey { gx, gz, biome }).copied());
            if let Some(entry) = entry {
                let covered = (bx - gx).abs().max((bz - gz).abs()) <= entry.radius;
                let fresh = now.saturating_sub(entry.stored_at_nanos) < SPATIAL_TTL.as_nanos() as u64;
                if covered && fresh {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry);
                }
            }
        }
        None
    }

    pub fn get_surface(&self, bx: i32, bz: i32) -> Option<BiomeResult> {
        let region = self.peek_region(bx, bz)?;
        let col = pos::column_key(bx, bz);
        let cached = region
            .surface
            .read()
            .ok()
            .and_then(|map| map.get(&col).copied());
        match cached {
            Some(result) if self.catalog.is_valid(result.biome) => Some(result),
            Some(_) => {
                self.shrink(region.remove_surface(col));
                None
            }
            None => None,
        }
    }

    pub fn put_surface(&self, bx: i32, bz: i32, result: BiomeResult) {
        let region = self.region_for(bx, bz);
        self.grow(region.put_surface(pos::column_key(bx, bz), result));
    }

    pub fn get_mismatch(&self, bx: i32, bz: i32, biome: BiomeId) -> Option<bool> {
        let region = self.peek_region(bx, bz)?;
        region
            .mismatch
            .read()
            .ok()
            .and_then(|map| map.get(&(pos::column_key(bx, bz), biome)).copied())
    }

    pub fn put_mismatch(&self, bx: i32, bz: i32, biome: BiomeId, value: bool) {
        let region = self.region_for(bx, bz);
        self.grow(region.put_mismatch(pos::column_key(bx, bz), biome, value));
    }

    /// Count an external memo hit (layers consulted by the computer).
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> RegionCacheStats {
        RegionCacheStats {
            regions: self.regions.read().map(|m| m.len()).unwrap_or(0),
            memory_bytes: self.memory.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fills_started: self.fills_started.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Drop everything. Incomplete fills are cancelled so waiters return
    /// and later queries re-dispatch.
    pub fn clear_all(&self) {
        {
            let fills = self.fills.lock().unwrap_or_else(|e| e.into_inner());
            for task in fills.values() {
                task.cancel();
            }
        }
        self.fills.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.regions.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.memory.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        log::info!("region cache cleared");
    }

    fn region_for(&self, bx: i32, bz: i32) -> Arc<Region> {
        let key = RegionKey::from_block(bx, bz);
        if let Some(existing) = self.peek_key(key) {
            existing.touch();
            return existing;
        }

        let stripe = self.region_locks.get(&key);
        let _guard = stripe.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = self.peek_key(key) {
            return existing;
        }

        let region = Arc::new(Region::new(key));
        {
            let mut regions = self.regions.write().unwrap_or_else(|e| e.into_inner());
            regions.insert(key, Arc::clone(&region));
        }
        self.grow(region::REGION_BASE_BYTES);
        region
    }

    fn peek_region(&self, bx: i32, bz: i32) -> Option<Arc<Region>> {
        self.peek_key(RegionKey::from_block(bx, bz))
    }

    fn peek_key(&self, key: RegionKey) -> Option<Arc<Region>> {
        self.regions
            .read()
            .ok()
            .and_then(|map| map.get(&key).cloned())
    }

    fn grow(&self, bytes: u64) {
        if bytes > 0 {
            self.memory.fetch_add(bytes, Ordering::Relaxed);
            if self.memory.load(Ordering::Relaxed) > self.max_memory {
                self.evict();
            }
        }
    }

    fn shrink(&self, bytes: u64) {
        if bytes > 0 {
            self.memory.fetch_sub(bytes, Ordering::Relaxed);
        }
    }

    /// Drain the least-recently-used region layer by layer — spatial, then
    /// surface-derived memos, then anchors, then mismatch memos — removing
    /// it once empty. The last region is never evicted.
    fn evict(&self) {
        loop {
            if self.memory.load(Ordering::Relaxed) <= self.max_memory {
                return;
            }
            let victim = {
                let regions = self.regions.read().unwrap_or_else(|e| e.into_inner());
                if regions.len() <= 1 {
                    return;
                }
                regions
                    .values()
                    .min_by_key(|r| r.last_access())
                    .map(Arc::clone)
            };
            let Some(victim) = victim else { return };

            let drains: [fn(&Region) -> u64; 4] = [
                Region::drain_spatial,
                Region::drain_surface,
                Region::drain_anchors,
                Region::drain_mismatch,
            ];
            let mut released = 0;
            for drain in drains {
                let freed = drain(&victim);
                released += freed;
                self.shrink(freed);
                if self.memory.load(Ordering::Relaxed) <= self.max_memory {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }

            let mut removed = false;
            if victim.is_drained() {
                let mut regions = self.regions.write().unwrap_or_else(|e| e.into_inner());
                if regions.remove(&victim.key).is_some() {
                    removed = true;
                }
                drop(regions);
                if removed {
                    self.shrink(victim.bytes());
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
            }
            if released == 0 && !removed {
                // Accounting drift; bail rather than spin on an empty victim.
                return;
            }
        }
    }
}
