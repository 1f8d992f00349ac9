use std::cell::RefCell;
use std::time::{Duration, Instant};

use hashbrown::HashMap;

const BATCH_CAPACITY: usize = 8;
const BATCH_FRESHNESS: Duration = Duration::from_millis(100);

/// Per-thread burst cache for interpolated heights. Bounded and short-lived:
/// it only has to absorb the locality burst of one flood fill.
pub(crate) struct HeightBatch {
    stamp: u64,
    entries: HashMap<u64, f32>,
    last_flush: Instant,
}

thread_local! {
    static BATCH: RefCell<HeightBatch> = RefCell::new(HeightBatch {
        stamp: 0,
        entries: HashMap::with_capacity(BATCH_CAPACITY),
        last_flush: Instant::now(),
    });
}

#[inline]
fn key(bx: i32, bz: i32) -> u64 {
    ((bx as u64) << 32) | (bz as u32 as u64)
}

/// Look up a recent interpolated height for this thread. `stamp` identifies
/// the cache instance and its clear generation; a mismatch drops the batch.
pub(crate) fn lookup(stamp: u64, bx: i32, bz: i32) -> Option<f32> {
    BATCH.with(|cell| {
        let mut batch = cell.borrow_mut();
        if batch.stamp != stamp || batch.last_flush.elapsed() > BATCH_FRESHNESS {
            batch.entries.clear();
            batch.stamp = stamp;
            batch.last_flush = Instant::now();
            return None;
        }
        batch.entries.get(&key(bx, bz)).copied()
    })
}

pub(crate) fn store(stamp: u64, bx: i32, bz: i32, height: f32) {
    BATCH.with(|cell| {
        let mut batch = cell.borrow_mut();
        if batch.stamp != stamp || batch.entries.len() >= BATCH_CAPACITY {
            batch.entries.clear();
            batch.stamp = stamp;
            batch.last_flush = Instant::now();
        }
        batch.entries.insert(key(bx, bz), height);
    })
}
