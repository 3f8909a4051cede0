//! Scripted failures for the recording sinks.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Decides whether the next call should fail.
///
/// `fail_next(n)` makes the next `n` calls fail; `fail_always()` makes
/// every call fail until `recover()`.
#[derive(Debug, Default)]
pub struct FailureInjector {
    remaining: AtomicU32,
    always: AtomicBool,
    failures: AtomicU32,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        self.remaining.store(n, Ordering::SeqCst);
    }

    pub fn fail_always(&self) {
        self.always.store(true, Ordering::SeqCst);
    }

    pub fn recover(&self) {
        self.always.store(false, Ordering::SeqCst);
        self.remaining.store(0, Ordering::SeqCst);
    }

    /// Consume one scheduled failure, if any.
    pub fn should_fail(&self) -> bool {
        let fail = self.always.load(Ordering::SeqCst)
            || self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if fail {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
        fail
    }

    /// How many calls were failed so far.
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }
}
