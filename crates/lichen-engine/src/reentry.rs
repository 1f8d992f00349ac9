use std::cell::Cell;

thread_local! {
    static IN_ENGINE: Cell<bool> = const { Cell::new(false) };
}

/// Whether this thread is already inside the engine. The host hook can be
/// re-entered by the samplers the engine itself drives; nested calls must
/// bypass smoothing and hand back the host's native answer.
#[inline]
pub(crate) fn active() -> bool {
    IN_ENGINE.with(|flag| flag.get())
}

/// Scoped marker for engine entry. Cleared on drop, including unwind.
pub(crate) struct ReentryGuard;

pub(crate) fn enter() -> ReentryGuard {
    IN_ENGINE.with(|flag| flag.set(true));
    ReentryGuard
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        IN_ENGINE.with(|flag| flag.set(false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_scopes_the_flag() {
        assert!(!active());
        {
            let _guard = enter();
            assert!(active());
        }
        assert!(!active());
    }
}
