use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds since the first call in this process. Monotonic, shared by
/// the caches' last-access stamps.
pub fn monotonic_nanos() -> u64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

const NEVER: u64 = u64::MAX;

/// Rate limiter for warn/info paths that can fire per query.
///
/// `allow` returns true at most once per interval across all threads.
pub struct LogGate {
    last: AtomicU64,
}

impl LogGate {
    pub const fn new() -> Self {
        Self {
            last: AtomicU64::new(NEVER),
        }
    }

    pub fn allow(&self, interval: Duration) -> bool {
        let now = monotonic_nanos();
        let last = self.last.load(Ordering::Relaxed);
        if last != NEVER && now.saturating_sub(last) < interval.as_nanos() as u64 {
            return false;
        }
        self.last
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }
}

impl Default for LogGate {
    fn default() -> Self {
        Self::new()
    }
}
