use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use lichen_world::{BiomeId, CellPos};

/// Outcome of one flood fill. Immutable once published.
#[derive(Clone, Debug)]
pub struct FillResult {
    /// Component cells in BFS insertion order; empty for large components.
    pub positions: Vec<CellPos>,
    pub is_large: bool,
    /// Replacement for micro components; the target biome itself for large.
    pub replacement: BiomeId,
}

pub enum WaitOutcome {
    Completed(Arc<FillResult>),
    TimedOut,
    Cancelled,
}

/// Shared completion handle for one `(x, z, biome)` fill. One producer
/// completes it; any number of waiters block on it with a deadline.
pub struct FillTask {
    state: Mutex<TaskState>,
    done: Condvar,
}

struct TaskState {
    result: Option<Arc<FillResult>>,
    cancelled: bool,
}

impl FillTask {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(TaskState {
                result: None,
                cancelled: false,
            }),
            done: Condvar::new(),
        }
    }

    /// Publish the result and wake all waiters. A second completion or a
    /// completion after cancellation is ignored.
    pub fn complete(&self, result: FillResult) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.result.is_none() && !state.cancelled {
            state.result = Some(Arc::new(result));
            self.done.notify_all();
        }
    }

    /// Non-blocking peek at the published result.
    pub fn result(&self) -> Option<Arc<FillResult>> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .result
            .clone()
    }

    pub fn wait(&self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(result) = state.result.clone() {
                return WaitOutcome::Completed(result);
            }
            if state.cancelled {
                return WaitOutcome::Cancelled;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            let (next, timed_out) = self
                .done
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            state = next;
            if timed_out.timed_out() && state.result.is_none() && !state.cancelled {
                return WaitOutcome::TimedOut;
            }
        }
    }

    pub(crate) fn cancel(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.result.is_none() {
            state.cancelled = true;
            self.done.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn result() -> FillResult {
        FillResult {
            positions: vec![CellPos::new(0, 0)],
            is_large: false,
            replacement: BiomeId::new(2),
        }
    }

    #[test]
    fn complete_wakes_waiter() {
        let task = Arc::new(FillTask::new());
        let waiter = {
            let task = Arc::clone(&task);
            thread::spawn(move || task.wait(Duration::from_secs(5)))
        };
        task.complete(result());
        match waiter.join().unwrap() {
            WaitOutcome::Completed(r) => assert_eq!(r.replacement, BiomeId::new(2)),
            _ => panic!("expected completion"),
        }
    }

    #[test]
    fn wait_times_out_without_producer() {
        let task = FillTask::new();
        assert!(matches!(
            task.wait(Duration::from_millis(10)),
            WaitOutcome::TimedOut
        ));
    }

    #[test]
    fn cancel_releases_waiters_and_blocks_completion() {
        let task = FillTask::new();
        task.cancel();
        assert!(matches!(
            task.wait(Duration::from_millis(10)),
            WaitOutcome::Cancelled
        ));
        task.complete(result());
        assert!(task.result().is_none());
    }

    #[test]
    fn first_completion_wins() {
        let task = FillTask::new();
        task.complete(result());
        let mut second = result();
        second.replacement = BiomeId::new(9);
        task.complete(second);
        assert_eq!(task.result().unwrap().replacement, BiomeId::new(2));
    }
}
