//! Abstract storage for the voting engine.
//!
//! The coordinator depends only on these traits. [`MemoryStore`] is the
//! thread-safe in-process backend used by the daemon and by tests; a
//! document-database backend implements the same traits.
//!
//! Two operations carry the engine's consistency guarantees and must be
//! atomic in every backend:
//! - [`SessionStore::insert_session`] checks "no active session on this
//!   agenda item or on this target" and inserts in one step.
//! - [`SessionStore::compare_and_swap`] only writes when the stored version
//!   matches, so concurrent transitions cannot both commit.

pub mod error;
pub mod memory;

pub use error::StoreError;
pub use memory::MemoryStore;

use polity_types::{AgendaItemId, AmendmentId, ElectionId, EventId, SessionId, TargetId};
use polity_voting::{ChangeRequest, ElectionCandidate, EventRoster, Vote, VotingSession};

pub trait SessionStore: Send + Sync {
    /// Insert a new session unless its agenda item already hosts an active
    /// one or another active session decides the same target. Either case
    /// returns [`StoreError::ActiveSessionExists`] naming the blocking
    /// session.
    fn insert_session(&self, session: &VotingSession) -> Result<(), StoreError>;

    fn get_session(&self, id: &SessionId) -> Result<VotingSession, StoreError>;

    /// The session in introduction or voting on this agenda item, if any.
    fn active_session_for(
        &self,
        event: &EventId,
        agenda_item: &AgendaItemId,
    ) -> Result<Option<VotingSession>, StoreError>;

    /// The session in introduction or voting that decides `target`, if any.
    fn active_session_on(&self, target: &TargetId) -> Result<Option<VotingSession>, StoreError>;

    /// Overwrite `session` only if the stored copy is at `expected_version`.
    fn compare_and_swap(
        &self,
        session: &VotingSession,
        expected_version: u64,
    ) -> Result<(), StoreError>;

    /// Every session of the event, oldest first. Completed sessions are kept
    /// as the audit trail.
    fn sessions_for_event(&self, event: &EventId) -> Result<Vec<VotingSession>, StoreError>;

    /// Sessions in introduction or voting across all events.
    fn active_sessions(&self) -> Result<Vec<VotingSession>, StoreError>;
}

pub trait VoteStore: Send + Sync {
    /// Insert or replace a vote record by its id.
    fn put_vote(&self, vote: &Vote) -> Result<(), StoreError>;

    /// All vote records of a session, binding and indication.
    fn votes_for_session(&self, session: &SessionId) -> Result<Vec<Vote>, StoreError>;
}

pub trait RosterStore: Send + Sync {
    /// The event's participants and roles. An unknown event has an empty
    /// roster.
    fn roster(&self, event: &EventId) -> Result<EventRoster, StoreError>;

    fn put_roster(&self, roster: &EventRoster) -> Result<(), StoreError>;
}

pub trait ChangeRequestStore: Send + Sync {
    fn change_requests(&self, amendment: &AmendmentId) -> Result<Vec<ChangeRequest>, StoreError>;

    /// Insert or replace each request by id.
    fn put_change_requests(&self, requests: &[ChangeRequest]) -> Result<(), StoreError>;
}

pub trait CandidateStore: Send + Sync {
    fn candidates(&self, election: &ElectionId) -> Result<Vec<ElectionCandidate>, StoreError>;

    /// Insert or replace a candidacy by id.
    fn put_candidate(&self, candidate: &ElectionCandidate) -> Result<(), StoreError>;
}

/// Everything the coordinator needs from a backend.
pub trait VotingStore:
    SessionStore + VoteStore + RosterStore + ChangeRequestStore + CandidateStore
{
}

impl<T> VotingStore for T where
    T: SessionStore + VoteStore + RosterStore + ChangeRequestStore + CandidateStore
{
}
