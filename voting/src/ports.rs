//! Contracts for the collaborators outside the voting engine.
//!
//! Time, participant notifications, the public timeline and the amendment
//! workflow are all reached through these traits so the coordinator can be
//! driven by deterministic implementations in tests.

use crate::session::{CloseReason, Phase, VotingType};
use crate::tally::{SessionResult, SessionTally};
use polity_types::{
    AmendmentId, CandidateId, ElectionId, EventId, SessionId, TargetId, Timestamp, UserId,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A collaborator call that did not go through.
#[derive(Debug, Error)]
#[error("{target} unavailable: {reason}")]
pub struct DownstreamError {
    pub target: &'static str,
    pub reason: String,
}

impl DownstreamError {
    pub fn new(target: &'static str, reason: impl Into<String>) -> Self {
        Self {
            target,
            reason: reason.into(),
        }
    }
}

/// Messages sent to event participants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// A session entered introduction.
    VotingSessionStarted {
        event_id: EventId,
        session_id: SessionId,
        title: String,
        voting_type: VotingType,
    },
    /// Binding voting opened.
    VotingPhaseStarted {
        event_id: EventId,
        session_id: SessionId,
        title: String,
        deadline: Option<Timestamp>,
    },
    /// A session closed, with its frozen tally.
    VotingSessionCompleted {
        event_id: EventId,
        session_id: SessionId,
        title: String,
        result: SessionResult,
        reason: CloseReason,
        tally: SessionTally,
    },
    /// Outcome of an amendment or change-request ballot, for the target's
    /// followers.
    VotingCompleted {
        target: TargetId,
        title: String,
        result: SessionResult,
        accept: u32,
        reject: u32,
        abstain: u32,
    },
    ElectionResult {
        election_id: ElectionId,
        title: String,
        result: SessionResult,
        winner: Option<CandidateId>,
        leaders: Vec<CandidateId>,
    },
    /// The amendment workflow accepted a final ballot result.
    AmendmentForwarded {
        amendment_id: AmendmentId,
        session_id: SessionId,
        result: SessionResult,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::VotingSessionStarted { .. } => "voting_session_started",
            Self::VotingPhaseStarted { .. } => "voting_phase_started",
            Self::VotingSessionCompleted { .. } => "voting_session_completed",
            Self::VotingCompleted { .. } => "voting_completed",
            Self::ElectionResult { .. } => "election_result",
            Self::AmendmentForwarded { .. } => "amendment_forwarded",
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), DownstreamError>;
}

/// One audit/timeline record per meaningful transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub actor_id: Option<UserId>,
    pub title: String,
    pub status: String,
}

impl TimelineEntry {
    /// Entry for a session transition; `status` is the phase reached.
    pub fn for_session(
        event_type: &str,
        session_id: &SessionId,
        actor: Option<&UserId>,
        title: &str,
        phase: Phase,
    ) -> Self {
        Self {
            event_type: event_type.to_string(),
            entity_type: "voting_session".into(),
            entity_id: session_id.to_string(),
            actor_id: actor.cloned(),
            title: title.to_string(),
            status: phase.to_string(),
        }
    }
}

pub trait TimelineSink: Send + Sync {
    fn record(&self, entry: &TimelineEntry) -> Result<(), DownstreamError>;
}

/// Receives the result of an amendment's final ballot.
pub trait AmendmentWorkflow: Send + Sync {
    fn forward_result(
        &self,
        amendment: &AmendmentId,
        session: &SessionId,
        result: SessionResult,
    ) -> Result<(), DownstreamError>;
}
