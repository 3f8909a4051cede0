//! Log-backed collaborators for a standalone daemon.
//!
//! Without an application to deliver to, notifications, timeline entries and
//! amendment results are written to the structured log under the
//! `polity::outbox` target, one JSON payload per record.

use polity_types::{AmendmentId, SessionId};
use polity_voting::{
    AmendmentWorkflow, DownstreamError, Notification, Notifier, SessionResult, TimelineEntry,
    TimelineSink,
};

const TARGET: &str = "polity::outbox";

fn to_json<T: serde::Serialize>(value: &T, sink: &'static str) -> Result<String, DownstreamError> {
    serde_json::to_string(value).map_err(|e| DownstreamError::new(sink, e.to_string()))
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), DownstreamError> {
        let payload = to_json(notification, "notifier")?;
        tracing::info!(target: TARGET, kind = notification.kind(), %payload, "notification");
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LogTimeline;

impl TimelineSink for LogTimeline {
    fn record(&self, entry: &TimelineEntry) -> Result<(), DownstreamError> {
        let payload = to_json(entry, "timeline")?;
        tracing::info!(target: TARGET, event_type = %entry.event_type, %payload, "timeline entry");
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LogAmendmentWorkflow;

impl AmendmentWorkflow for LogAmendmentWorkflow {
    fn forward_result(
        &self,
        amendment: &AmendmentId,
        session: &SessionId,
        result: SessionResult,
    ) -> Result<(), DownstreamError> {
        tracing::info!(
            target: TARGET,
            amendment = %amendment,
            session = %session,
            %result,
            "amendment result forwarded"
        );
        Ok(())
    }
}
