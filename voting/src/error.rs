use crate::session::Phase;
use polity_types::{AgendaItemId, EventId, SessionId, UserId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VotingError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("cannot {action} while the session is in the {phase} phase")]
    InvalidPhaseTransition { action: &'static str, phase: Phase },

    #[error("{0} has already cast a binding vote; use change vote instead")]
    DuplicateVote(UserId),

    #[error("session {active} on agenda item {agenda_item} is still active")]
    SessionConflict {
        agenda_item: AgendaItemId,
        active: SessionId,
    },

    #[error("change request queue ordering violated: {0}")]
    QueueOrderingViolation(String),

    #[error("event {0} has no eligible voters")]
    NoEligibleVoters(EventId),

    #[error("invalid ballot: {0}")]
    InvalidBallot(String),

    #[error("{0} is already a candidate in this election")]
    AlreadyCandidate(UserId),

    #[error("{0} not found")]
    NotFound(String),
}

impl VotingError {
    pub(crate) fn phase(action: &'static str, phase: Phase) -> Self {
        Self::InvalidPhaseTransition { action, phase }
    }
}
