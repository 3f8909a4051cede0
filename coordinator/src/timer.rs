//! Per-session auto-close timers.
//!
//! Each session in the voting phase gets one polling task that asks the
//! coordinator to re-evaluate auto-close every tick. The task ends when the
//! session completes by any path or the coordinator shuts down. A tick that
//! races a manual close is harmless: the session's compare-and-set lets only
//! one closure commit.

use polity_types::SessionId;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

/// What a timer tick found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Still voting, nothing due.
    Pending,
    /// This tick closed the session.
    Closed,
    /// The session is no longer in voting; the timer should stop.
    Finished,
}

#[derive(Default)]
pub(crate) struct TimerRegistry {
    handles: Mutex<HashMap<SessionId, JoinHandle<()>>>,
}

impl TimerRegistry {
    fn handles(&self) -> MutexGuard<'_, HashMap<SessionId, JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track the timer for `session`, replacing (and stopping) any older one.
    pub fn insert(&self, session: SessionId, handle: JoinHandle<()>) {
        if let Some(old) = self.handles().insert(session, handle) {
            old.abort();
        }
    }

    /// Stop the timer for `session`. Called from inside the timer task
    /// itself when its tick closed the session; the abort then only takes
    /// effect at the task's next await.
    pub fn cancel(&self, session: &SessionId) -> bool {
        match self.handles().remove(session) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, handle) in self.handles().drain() {
            handle.abort();
        }
    }

    pub fn contains(&self, session: &SessionId) -> bool {
        self.handles().contains_key(session)
    }

    pub fn len(&self) -> usize {
        self.handles().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    /// A long sleep whose receiver resolves with `Err` once the task is
    /// dropped.
    fn sleeper() -> (JoinHandle<()>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _tx = tx;
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        });
        (handle, rx)
    }

    #[tokio::test]
    async fn cancel_aborts_the_task() {
        let registry = TimerRegistry::default();
        let id = SessionId::new("vs_1");
        let (handle, dropped) = sleeper();
        registry.insert(id.clone(), handle);
        assert!(registry.contains(&id));

        assert!(registry.cancel(&id));
        assert!(!registry.cancel(&id));
        assert!(dropped.await.is_err());
    }

    #[tokio::test]
    async fn replacing_a_timer_stops_the_old_one() {
        let registry = TimerRegistry::default();
        let id = SessionId::new("vs_1");
        let (first, first_dropped) = sleeper();
        registry.insert(id.clone(), first);
        let (second, _second_dropped) = sleeper();
        registry.insert(id.clone(), second);
        assert!(first_dropped.await.is_err());
        assert_eq!(registry.len(), 1);
        registry.cancel_all();
        assert_eq!(registry.len(), 0);
    }
}
