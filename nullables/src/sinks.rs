//! Recording collaborators that capture every downstream call in memory.

use crate::failure::FailureInjector;
use polity_types::{AmendmentId, SessionId};
use polity_voting::{
    AmendmentWorkflow, DownstreamError, Notification, Notifier, SessionResult, TimelineEntry,
    TimelineSink,
};
use std::sync::{Mutex, MutexGuard, PoisonError};

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records delivered notifications. Failed deliveries are not recorded.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    pub failures: FailureInjector,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        guard(&self.sent).clone()
    }

    /// Delivered notifications of one kind, e.g. `"voting_phase_started"`.
    pub fn sent_of_kind(&self, kind: &str) -> Vec<Notification> {
        guard(&self.sent)
            .iter()
            .filter(|n| n.kind() == kind)
            .cloned()
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), DownstreamError> {
        if self.failures.should_fail() {
            return Err(DownstreamError::new("notifier", "injected failure"));
        }
        guard(&self.sent).push(notification.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingTimeline {
    entries: Mutex<Vec<TimelineEntry>>,
    pub failures: FailureInjector,
}

impl RecordingTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<TimelineEntry> {
        guard(&self.entries).clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        guard(&self.entries)
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }
}

impl TimelineSink for RecordingTimeline {
    fn record(&self, entry: &TimelineEntry) -> Result<(), DownstreamError> {
        if self.failures.should_fail() {
            return Err(DownstreamError::new("timeline", "injected failure"));
        }
        guard(&self.entries).push(entry.clone());
        Ok(())
    }
}

/// A forwarded amendment result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForwardedResult {
    pub amendment: AmendmentId,
    pub session: SessionId,
    pub result: SessionResult,
}

#[derive(Debug, Default)]
pub struct RecordingAmendmentWorkflow {
    forwarded: Mutex<Vec<ForwardedResult>>,
    pub failures: FailureInjector,
}

impl RecordingAmendmentWorkflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forwarded(&self) -> Vec<ForwardedResult> {
        guard(&self.forwarded).clone()
    }
}

impl AmendmentWorkflow for RecordingAmendmentWorkflow {
    fn forward_result(
        &self,
        amendment: &AmendmentId,
        session: &SessionId,
        result: SessionResult,
    ) -> Result<(), DownstreamError> {
        if self.failures.should_fail() {
            return Err(DownstreamError::new("amendment workflow", "injected failure"));
        }
        guard(&self.forwarded).push(ForwardedResult {
            amendment: amendment.clone(),
            session: session.clone(),
            result,
        });
        Ok(())
    }
}
