//! Downstream fan-out of committed session events.
//!
//! A single background task reads the [`EventBus`](crate::EventBus) outbox
//! and turns events into participant notifications, timeline entries and
//! amendment hand-offs. Every call is retried with exponential backoff and
//! abandoned (logged, counted) after the last attempt. Nothing here can
//! touch voting state: by the time an event is seen it is already committed.

use crate::events::SessionEvent;
use crate::metrics::VotingMetrics;
use crate::tracing_spans::fanout_span;
use polity_types::{AmendmentId, SessionId, TargetId, UserId};
use polity_voting::{
    AmendmentWorkflow, DownstreamError, ElectionCandidate, Notification, Notifier, SessionResult,
    SessionTally, TimelineEntry, TimelineSink, Visibility, VotingSession,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::Instrument;

/// The collaborators events are delivered to.
#[derive(Clone)]
pub struct Downstream {
    pub notifier: Arc<dyn Notifier>,
    pub timeline: Arc<dyn TimelineSink>,
    pub workflow: Arc<dyn AmendmentWorkflow>,
}

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the first retry; doubled after each further failure.
    pub backoff: Duration,
}

/// One downstream call derived from an event.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Delivery {
    Notify(Notification),
    Timeline(TimelineEntry),
    /// Hand the final ballot result to the amendment workflow, then tell
    /// participants it was forwarded.
    Forward {
        amendment: AmendmentId,
        session: SessionId,
        result: SessionResult,
    },
}

/// Every downstream call `event` should cause, in delivery order.
pub(crate) fn plan(event: &SessionEvent) -> Vec<Delivery> {
    match event {
        SessionEvent::SessionStarted { session, actor } => {
            let mut out = vec![Delivery::Notify(Notification::VotingSessionStarted {
                event_id: session.event_id.clone(),
                session_id: session.id.clone(),
                title: session.title.clone(),
                voting_type: session.voting_type,
            })];
            push_timeline(&mut out, session, "voting_session_started", Some(actor));
            out
        }
        SessionEvent::VotingStarted { session, actor } => {
            let mut out = vec![Delivery::Notify(Notification::VotingPhaseStarted {
                event_id: session.event_id.clone(),
                session_id: session.id.clone(),
                title: session.title.clone(),
                deadline: session.deadline(),
            })];
            push_timeline(&mut out, session, "voting_phase_started", Some(actor));
            out
        }
        SessionEvent::SessionClosed {
            session,
            reason,
            actor,
        } => {
            let (Some(result), Some(tally)) = (session.result, session.tally.clone()) else {
                tracing::warn!(session = %session.id, "closed session without a frozen tally");
                return Vec::new();
            };
            let mut out = vec![Delivery::Notify(Notification::VotingSessionCompleted {
                event_id: session.event_id.clone(),
                session_id: session.id.clone(),
                title: session.title.clone(),
                result,
                reason: *reason,
                tally: tally.clone(),
            })];
            match (&session.target, &tally) {
                (TargetId::Election(election_id), SessionTally::Election(p)) => {
                    out.push(Delivery::Notify(Notification::ElectionResult {
                        election_id: election_id.clone(),
                        title: session.title.clone(),
                        result,
                        winner: p.winner.clone(),
                        leaders: p.leaders.clone(),
                    }));
                }
                (target, SessionTally::Ballot(t)) => {
                    out.push(Delivery::Notify(Notification::VotingCompleted {
                        target: target.clone(),
                        title: session.title.clone(),
                        result,
                        accept: t.accept,
                        reject: t.reject,
                        abstain: t.abstain,
                    }));
                    if let TargetId::Amendment(amendment) = target {
                        out.push(Delivery::Forward {
                            amendment: amendment.clone(),
                            session: session.id.clone(),
                            result,
                        });
                    }
                }
                (target, _) => {
                    tracing::warn!(session = %session.id, %target, "tally kind does not match target");
                }
            }
            push_timeline(&mut out, session, "voting_session_completed", actor.as_ref());
            out
        }
        SessionEvent::ChangeRequestActivated {
            change_request,
            actor,
        } => vec![Delivery::Timeline(TimelineEntry {
            event_type: "change_request_activated".into(),
            entity_type: "change_request".into(),
            entity_id: change_request.id.to_string(),
            actor_id: Some(actor.clone()),
            title: change_request.title.clone(),
            status: "open".into(),
        })],
        SessionEvent::CandidacyChanged { candidate } => {
            vec![Delivery::Timeline(candidacy_entry(candidate))]
        }
        SessionEvent::VoteCast { .. }
        | SessionEvent::VoteChanged { .. }
        | SessionEvent::IndicationCast { .. }
        | SessionEvent::ChangeRequestsReordered { .. } => Vec::new(),
    }
}

fn push_timeline(
    out: &mut Vec<Delivery>,
    session: &VotingSession,
    event_type: &str,
    actor: Option<&UserId>,
) {
    if session.visibility == Visibility::Public {
        out.push(Delivery::Timeline(TimelineEntry::for_session(
            event_type,
            &session.id,
            actor,
            &session.title,
            session.phase,
        )));
    }
}

fn candidacy_entry(candidate: &ElectionCandidate) -> TimelineEntry {
    let status = status_label(candidate);
    TimelineEntry {
        event_type: format!("candidacy_{status}"),
        entity_type: "election_candidate".into(),
        entity_id: candidate.id.to_string(),
        actor_id: Some(candidate.user_id.clone()),
        title: candidate.election_id.to_string(),
        status: status.into(),
    }
}

fn status_label(candidate: &ElectionCandidate) -> &'static str {
    use polity_voting::CandidateStatus::*;
    match candidate.status {
        Nominated => "nominated",
        Accepted => "accepted",
        Withdrawn => "withdrawn",
    }
}

/// Call `f` until it succeeds or `policy.max_attempts` is reached.
pub(crate) async fn with_retry<F>(
    what: &'static str,
    policy: RetryPolicy,
    metrics: &VotingMetrics,
    mut f: F,
) -> Result<(), DownstreamError>
where
    F: FnMut() -> Result<(), DownstreamError>,
{
    let mut delay = policy.backoff;
    let mut attempt = 1;
    loop {
        match f() {
            Ok(()) => return Ok(()),
            Err(e) if attempt < policy.max_attempts => {
                tracing::warn!(what, attempt, error = %e, "downstream call failed, retrying");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(what, attempts = attempt, error = %e, "downstream call abandoned");
                metrics.notification_failures.inc();
                return Err(e);
            }
        }
    }
}

/// Deliver everything one event calls for. Failures are independent: a
/// failed timeline write does not hold back the notification after it.
pub(crate) async fn dispatch(
    event: &SessionEvent,
    downstream: &Downstream,
    policy: RetryPolicy,
    metrics: &VotingMetrics,
) {
    for delivery in plan(event) {
        match delivery {
            Delivery::Notify(n) => {
                let _ = with_retry(n.kind(), policy, metrics, || downstream.notifier.notify(&n))
                    .await;
            }
            Delivery::Timeline(entry) => {
                let _ = with_retry("timeline", policy, metrics, || {
                    downstream.timeline.record(&entry)
                })
                .await;
            }
            Delivery::Forward {
                amendment,
                session,
                result,
            } => {
                let forwarded = with_retry("amendment_workflow", policy, metrics, || {
                    downstream.workflow.forward_result(&amendment, &session, result)
                })
                .await;
                if forwarded.is_ok() {
                    let n = Notification::AmendmentForwarded {
                        amendment_id: amendment,
                        session_id: session,
                        result,
                    };
                    let _ = with_retry(n.kind(), policy, metrics, || {
                        downstream.notifier.notify(&n)
                    })
                    .await;
                }
            }
        }
    }
}

/// Spawn the fan-out task. On shutdown it drains events already queued
/// and exits.
pub(crate) fn spawn_fanout(
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    downstream: Downstream,
    policy: RetryPolicy,
    metrics: Arc<VotingMetrics>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    while let Ok(event) = events.try_recv() {
                        dispatch(&event, &downstream, policy, &metrics)
                            .instrument(fanout_span(event.name()))
                            .await;
                    }
                    tracing::info!("fan-out task shutting down");
                    break;
                }
                received = events.recv() => match received {
                    Some(event) => {
                        dispatch(&event, &downstream, policy, &metrics)
                            .instrument(fanout_span(event.name()))
                            .await;
                    }
                    None => break,
                },
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use polity_types::{AgendaItemId, EventId, Timestamp};
    use polity_voting::{tally, CloseReason, MajorityType, SessionOptions, VoteValue};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn session(target: TargetId, visibility: Visibility) -> VotingSession {
        let mut options = SessionOptions::new("Budget", MajorityType::Simple);
        options.visibility = visibility;
        VotingSession::open(
            SessionId::new("vs_1"),
            EventId::new("evt_1"),
            AgendaItemId::new("agi_1"),
            target,
            UserId::new("chair"),
            options,
            Timestamp::new(10),
        )
    }

    fn closed(target: TargetId) -> SessionEvent {
        let mut s = session(target, Visibility::Public);
        s.start_voting(Timestamp::new(11), 300).unwrap();
        let t = tally([VoteValue::Accept], MajorityType::Simple, 1);
        s.complete(Timestamp::new(12), SessionTally::Ballot(t), CloseReason::AllVoted)
            .unwrap();
        SessionEvent::SessionClosed {
            session: s,
            reason: CloseReason::AllVoted,
            actor: None,
        }
    }

    #[test]
    fn private_sessions_skip_the_timeline() {
        let event = SessionEvent::SessionStarted {
            session: session(TargetId::Amendment(AmendmentId::new("amd_1")), Visibility::Private),
            actor: UserId::new("chair"),
        };
        let deliveries = plan(&event);
        assert_eq!(deliveries.len(), 1);
        assert!(matches!(deliveries[0], Delivery::Notify(_)));
    }

    #[test]
    fn closed_amendment_is_forwarded() {
        let deliveries = plan(&closed(TargetId::Amendment(AmendmentId::new("amd_1"))));
        assert!(deliveries.iter().any(|d| matches!(
            d,
            Delivery::Forward { result: SessionResult::Passed, .. }
        )));
        assert!(matches!(deliveries.last(), Some(Delivery::Timeline(_))));
    }

    #[test]
    fn closed_change_request_is_not_forwarded() {
        let target = TargetId::ChangeRequest {
            amendment: AmendmentId::new("amd_1"),
            change_request: polity_types::ChangeRequestId::new("cr_1"),
        };
        let deliveries = plan(&closed(target));
        assert!(!deliveries
            .iter()
            .any(|d| matches!(d, Delivery::Forward { .. })));
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let metrics = VotingMetrics::new();
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        };
        let result = with_retry("test", policy, &metrics, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DownstreamError::new("test", "down"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.notification_failures.get(), 1);
    }

    #[tokio::test]
    async fn retry_stops_on_first_success() {
        let metrics = VotingMetrics::new();
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff: Duration::from_millis(1),
        };
        with_retry("test", policy, &metrics, || {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(DownstreamError::new("test", "flaky"))
            } else {
                Ok(())
            }
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.notification_failures.get(), 0);
    }
}
