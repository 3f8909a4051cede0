//! Events published after every committed command.

use polity_types::{AmendmentId, ChangeRequestId, SessionId, UserId};
use polity_voting::{ChangeRequest, CloseReason, ElectionCandidate, Vote, VotingSession};
use tokio::sync::{broadcast, mpsc};

/// Session-level events that observers can subscribe to via the [`EventBus`].
///
/// Published only after the change is persisted; a subscriber never sees an
/// event for state that was rolled back.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// A session entered introduction.
    SessionStarted {
        session: VotingSession,
        actor: UserId,
    },
    /// Introduction → voting.
    VotingStarted {
        session: VotingSession,
        actor: UserId,
    },
    VoteCast {
        vote: Vote,
    },
    /// A voter replaced their binding vote.
    VoteChanged {
        vote: Vote,
    },
    IndicationCast {
        vote: Vote,
    },
    /// Voting → completed. `session` carries the frozen tally.
    SessionClosed {
        session: VotingSession,
        reason: CloseReason,
        /// `None` for automatic closure.
        actor: Option<UserId>,
    },
    ChangeRequestActivated {
        change_request: ChangeRequest,
        actor: UserId,
    },
    ChangeRequestsReordered {
        amendment: AmendmentId,
        order: Vec<ChangeRequestId>,
        actor: UserId,
    },
    /// A candidacy was filed, accepted or withdrawn.
    CandidacyChanged {
        candidate: ElectionCandidate,
    },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session_started",
            Self::VotingStarted { .. } => "voting_started",
            Self::VoteCast { .. } => "vote_cast",
            Self::VoteChanged { .. } => "vote_changed",
            Self::IndicationCast { .. } => "indication_cast",
            Self::SessionClosed { .. } => "session_closed",
            Self::ChangeRequestActivated { .. } => "change_request_activated",
            Self::ChangeRequestsReordered { .. } => "change_requests_reordered",
            Self::CandidacyChanged { .. } => "candidacy_changed",
        }
    }

    /// The session this event belongs to, if any.
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::SessionStarted { session, .. }
            | Self::VotingStarted { session, .. }
            | Self::SessionClosed { session, .. } => Some(&session.id),
            Self::VoteCast { vote } | Self::VoteChanged { vote } | Self::IndicationCast { vote } => {
                Some(&vote.session_id)
            }
            _ => None,
        }
    }
}

/// Where committed events go.
///
/// Every event lands in the outbox, an unbounded queue read by the fan-out
/// task alone, so downstream hand-offs are never skipped however far the
/// fan-out falls behind. Observers get a copy on a bounded `broadcast`
/// channel; a slow observer loses its oldest events.
///
/// Publishing never blocks and never fails the command that published.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
    outbox: mpsc::UnboundedSender<SessionEvent>,
}

impl EventBus {
    /// A bus whose observers buffer up to `capacity` events, and the
    /// receiving end of its outbox.
    pub fn new(capacity: usize) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, _) = broadcast::channel(capacity.max(1));
        let (outbox, rx) = mpsc::unbounded_channel();
        (Self { tx, outbox }, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: SessionEvent) {
        let name = event.name();
        if self.outbox.send(event.clone()).is_err() {
            tracing::warn!(event = name, "outbox closed, event not delivered downstream");
        }
        if self.tx.send(event).is_err() {
            tracing::trace!(event = name, "no subscribers for session event");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polity_types::{CandidateId, ElectionId, Timestamp};
    use polity_voting::CandidateStatus;

    fn candidacy() -> SessionEvent {
        SessionEvent::CandidacyChanged {
            candidate: ElectionCandidate {
                id: CandidateId::new("cand_1"),
                election_id: ElectionId::new("elc_1"),
                user_id: UserId::new("ann"),
                status: CandidateStatus::Nominated,
                created_at: Timestamp::new(1),
                withdrawn_at: None,
            },
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let (bus, _outbox) = EventBus::new(8);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        bus.publish(candidacy());
        assert_eq!(rx1.recv().await.unwrap().name(), "candidacy_changed");
        assert_eq!(rx2.recv().await.unwrap().name(), "candidacy_changed");
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let (bus, mut outbox) = EventBus::new(8);
        bus.publish(candidacy());
        assert!(candidacy().session_id().is_none());
        assert!(outbox.try_recv().is_ok());
    }

    #[tokio::test]
    async fn outbox_keeps_what_a_lagging_observer_loses() {
        let (bus, mut outbox) = EventBus::new(2);
        let mut observer = bus.subscribe();
        for _ in 0..10 {
            bus.publish(candidacy());
        }
        assert!(matches!(
            observer.recv().await,
            Err(broadcast::error::RecvError::Lagged(8))
        ));
        let mut queued = 0;
        while outbox.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, 10);
    }
}
