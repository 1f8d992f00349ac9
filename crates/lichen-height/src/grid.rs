use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use lichen_world::loggate::monotonic_nanos;

use crate::ChunkKey;

/// One chunk's height samples: `(n+1) x (n+1)` cells for spacing `16/n`,
/// each published at most once through an atomic ready flag.
pub(crate) struct ChunkHeightGrid {
    key: ChunkKey,
    cells_per_axis: usize,
    cells: Box<[HeightCell]>,
    last_access: AtomicU64,
}

struct HeightCell {
    ready: AtomicBool,
    bits: AtomicU32,
}

impl ChunkHeightGrid {
    pub(crate) fn new(key: ChunkKey, grid_spacing: i32) -> Self {
        let cells_per_axis = (16 / grid_spacing) as usize + 1;
        let cells = (0..cells_per_axis * cells_per_axis)
            .map(|_| HeightCell {
                ready: AtomicBool::new(false),
                bits: AtomicU32::new(0),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            key,
            cells_per_axis,
            cells,
            last_access: AtomicU64::new(monotonic_nanos()),
        }
    }

    #[inline]
    pub(crate) fn key(&self) -> ChunkKey {
        self.key
    }

    #[inline]
    pub(crate) fn point_count(&self) -> u64 {
        (self.cells_per_axis * self.cells_per_axis) as u64
    }

    #[inline]
    pub(crate) fn in_range(&self, lx: i32, lz: i32) -> bool {
        lx >= 0 && lz >= 0 && (lx as usize) < self.cells_per_axis && (lz as usize) < self.cells_per_axis
    }

    pub(crate) fn get(&self, lx: i32, lz: i32) -> Option<f32> {
        let cell = &self.cells[self.index(lx, lz)];
        if cell.ready.load(Ordering::Acquire) {
            Some(f32::from_bits(cell.bits.load(Ordering::Relaxed)))
        } else {
            None
        }
    }

    /// Publish a computed height. Concurrent publishers always carry the
    /// same deterministic value, so the bit store is idempotent; the flag
    /// flips exactly once.
    pub(crate) fn publish(&self, lx: i32, lz: i32, height: f32) {
        let cell = &self.cells[self.index(lx, lz)];
        cell.bits.store(height.to_bits(), Ordering::Relaxed);
        cell.ready.store(true, Ordering::Release);
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
    fn index(&self, lx: i32, lz: i32) -> usize {
        debug_assert!(self.in_range(lx, lz));
        lx as usize * self.cells_per_axis + lz as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_then_get_round_trips() {
        let grid = ChunkHeightGrid::new(ChunkKey { x: 0, z: 0 }, 16);
        assert_eq!(grid.get(0, 0), None);
        grid.publish(0, 0, 71.25);
        assert_eq!(grid.get(0, 0), Some(71.25));
    }

    #[test]
    fn cell_count_follows_spacing() {
        assert_eq!(ChunkHeightGrid::new(ChunkKey { x: 0, z: 0 }, 16).point_count(), 4);
        assert_eq!(ChunkHeightGrid::new(ChunkKey { x: 0, z: 0 }, 4).point_count(), 25);
    }
}
