//! Sparse chunk-aligned heightmap cache with bilinear interpolation.
//!
//! Heights come from the host's surface generator, are sampled on a coarse
//! grid (`grid_spacing` blocks apart), published lock-free per cell, and
//! interpolated for in-between columns. A per-thread burst batch absorbs the
//! locality of flood fills.
#![forbid(unsafe_code)]

mod batch;
mod grid;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use hashbrown::HashMap;

use lichen_world::loggate::LogGate;
use lichen_world::{Striped, SurfaceHeight};

use grid::ChunkHeightGrid;

pub const CHUNK_SIZE: i32 = 16;

/// Upper bound on live grid samples across all chunks.
pub const DEFAULT_MAX_GRID_POINTS: u64 = 100_000;

const FAULT_LOG_INTERVAL: Duration = Duration::from_secs(5);

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub x: i32,
    pub z: i32,
}

impl ChunkKey {
    #[inline]
    pub const fn from_block(bx: i32, bz: i32) -> Self {
        Self {
            x: bx.div_euclid(CHUNK_SIZE),
            z: bz.div_euclid(CHUNK_SIZE),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct HeightmapStats {
    pub chunks: usize,
    pub grid_points: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct HeightmapCache {
    provider: Arc<dyn SurfaceHeight>,
    grid_spacing: i32,
    max_points: u64,
    grids: RwLock<HashMap<ChunkKey, Arc<ChunkHeightGrid>>>,
    chunk_locks: Striped<RwLock<()>>,
    total_points: AtomicU64,
    instance: u64,
    epoch: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    fault_gate: LogGate,
}

impl HeightmapCache {
    pub fn new(provider: Arc<dyn SurfaceHeight>, grid_spacing: i32, max_points: u64) -> Self {
        debug_assert!(grid_spacing > 0 && 16 % grid_spacing == 0);
        Self {
            provider,
            grid_spacing,
            max_points,
            grids: RwLock::new(HashMap::new()),
            chunk_locks: Striped::new(128, || RwLock::new(())),
            total_points: AtomicU64::new(0),
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            epoch: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            fault_gate: LogGate::new(),
        }
    }

    /// Interpolated surface height for a block column.
    pub fn height(&self, bx: i32, bz: i32) -> i32 {
        let stamp = self.batch_stamp();
        if let Some(cached) = batch::lookup(stamp, bx, bz) {
            return cached.round() as i32;
        }

        let s = self.grid_spacing;
        let gx0 = bx.div_euclid(s);
        let gz0 = bz.div_euclid(s);

        let h00 = self.grid_height(gx0, gz0);
        let h10 = self.grid_height(gx0 + 1, gz0);
        let h01 = self.grid_height(gx0, gz0 + 1);
        let h11 = self.grid_height(gx0 + 1, gz0 + 1);

        let fx = (bx - gx0 * s) as f32 / s as f32;
        let fz = (bz - gz0 * s) as f32 / s as f32;

        let h0 = h00 * (1.0 - fx) + h10 * fx;
        let h1 = h01 * (1.0 - fx) + h11 * fx;
        let result = h0 * (1.0 - fz) + h1 * fz;

        batch::store(stamp, bx, bz, result);
        result.round() as i32
    }

    /// Height at a grid corner, published once per cell.
    fn grid_height(&self, gx: i32, gz: i32) -> f32 {
        let s = self.grid_spacing;
        let chunk = ChunkKey::from_block(gx * s, gz * s);
        let grid = self.grid_for(chunk);
        grid.touch();

        let n = CHUNK_SIZE / s;
        let lx = gx.rem_euclid(n);
        let lz = gz.rem_euclid(n);
        if !grid.in_range(lx, lz) {
            // Corner owned by a neighbor chunk; compute directly, uncached.
            return self.compute_height(gx * s, gz * s);
        }

        if let Some(h) = grid.get(lx, lz) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return h;
        }

        // Serialize the first computation per chunk stripe so concurrent
        // callers adopt one published value instead of each invoking the
        // host generator.
        let stripe = self.chunk_locks.get(&chunk);
        let _guard = stripe.write().unwrap_or_else(|e| e.into_inner());
        if let Some(h) = grid.get(lx, lz) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return h;
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let h = self.compute_height(gx * s, gz * s);
        grid.publish(lx, lz, h);
        h
    }

    fn compute_height(&self, x: i32, z: i32) -> f32 {
        match self.provider.surface_height(x, z) {
            Ok(h) => h as f32,
            Err(err) => {
                if self.fault_gate.allow(FAULT_LOG_INTERVAL) {
                    log::warn!("surface height fault, using estimator: {}", err);
                }
                fallback_height(x, z)
            }
        }
    }

    fn grid_for(&self, key: ChunkKey) -> Arc<ChunkHeightGrid> {
        if let Some(existing) = self.lookup_grid(&key) {
            return existing;
        }

        let stripe = self.chunk_locks.get(&key);
        let _guard = stripe.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = self.lookup_grid(&key) {
            return existing;
        }

        let grid = Arc::new(ChunkHeightGrid::new(key, self.grid_spacing));
        let points = grid.point_count();
        {
            let mut grids = self.grids.write().unwrap_or_else(|e| e.into_inner());
            grids.insert(key, Arc::clone(&grid));
        }
        self.total_points.fetch_add(points, Ordering::Relaxed);
        self.enforce_bounds();
        grid
    }

    fn lookup_grid(&self, key: &ChunkKey) -> Option<Arc<ChunkHeightGrid>> {
        self.grids
            .read()
            .ok()
            .and_then(|map| map.get(key).cloned())
    }

    /// Evict least-recently-touched grids until under the sample bound.
    /// Never drops the last grid.
    fn enforce_bounds(&self) {
        while self.total_points.load(Ordering::Relaxed) > self.max_points {
            let victim = {
                let grids = self.grids.read().unwrap_or_else(|e| e.into_inner());
                if grids.len() <= 1 {
                    return;
                }
                grids
                    .values()
                    .min_by_key(|g| g.last_access())
                    .map(|g| g.key())
            };
            let Some(victim) = victim else { return };
            let removed = {
                let mut grids = self.grids.write().unwrap_or_else(|e| e.into_inner());
                grids.remove(&victim)
            };
            if let Some(removed) = removed {
                self.total_points
                    .fetch_sub(removed.point_count(), Ordering::Relaxed);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn clear_all(&self) {
        let mut grids = self.grids.write().unwrap_or_else(|e| e.into_inner());
        grids.clear();
        drop(grids);
        self.total_points.store(0, Ordering::Relaxed);
        self.epoch.fetch_add(1, Ordering::Relaxed);
        log::info!("heightmap cache cleared");
    }

    pub fn stats(&self) -> HeightmapStats {
        HeightmapStats {
            chunks: self.grids.read().map(|m| m.len()).unwrap_or(0),
            grid_points: self.total_points.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    #[inline]
    fn batch_stamp(&self) -> u64 {
        (self.instance << 32) | (self.epoch.load(Ordering::Relaxed) & 0xFFFF_FFFF)
    }
}

/// Deterministic stand-in when the host height generator is unavailable.
pub fn fallback_height(x: i32, z: i32) -> f32 {
    (64.0 + (x as f64 * 0.01).sin() * 10.0 + (z as f64 * 0.01).cos() * 10.0) as f32
}
