//! In-memory store with every table behind one lock.
//!
//! Active-session uniqueness (per agenda item and per target) and the
//! version compare-and-set each run under that one mutex.

use crate::{
    CandidateStore, ChangeRequestStore, RosterStore, SessionStore, StoreError, VoteStore,
};
use polity_types::{
    AgendaItemId, AmendmentId, ChangeRequestId, ElectionId, EventId, SessionId, TargetId,
    VoteId,
};
use polity_voting::{ChangeRequest, ElectionCandidate, EventRoster, Vote, VotingSession};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Tables {
    sessions: HashMap<SessionId, VotingSession>,
    /// Insertion order, for stable listings.
    session_order: Vec<SessionId>,
    votes: HashMap<SessionId, BTreeMap<VoteId, Vote>>,
    rosters: HashMap<EventId, EventRoster>,
    change_requests: HashMap<AmendmentId, BTreeMap<ChangeRequestId, ChangeRequest>>,
    candidates: HashMap<ElectionId, Vec<ElectionCandidate>>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }
}

impl SessionStore for MemoryStore {
    fn insert_session(&self, session: &VotingSession) -> Result<(), StoreError> {
        let mut t = self.tables()?;
        if t.sessions.contains_key(&session.id) {
            return Err(StoreError::Duplicate(session.id.to_string()));
        }
        if let Some(active) = t.sessions.values().find(|s| {
            s.is_active()
                && ((s.event_id == session.event_id
                    && s.agenda_item_id == session.agenda_item_id)
                    || s.target == session.target)
        }) {
            return Err(StoreError::ActiveSessionExists {
                agenda_item: active.agenda_item_id.clone(),
                active: active.id.clone(),
            });
        }
        t.session_order.push(session.id.clone());
        t.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn get_session(&self, id: &SessionId) -> Result<VotingSession, StoreError> {
        self.tables()?
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }

    fn active_session_for(
        &self,
        event: &EventId,
        agenda_item: &AgendaItemId,
    ) -> Result<Option<VotingSession>, StoreError> {
        Ok(self
            .tables()?
            .sessions
            .values()
            .find(|s| s.is_active() && &s.event_id == event && &s.agenda_item_id == agenda_item)
            .cloned())
    }

    fn active_session_on(&self, target: &TargetId) -> Result<Option<VotingSession>, StoreError> {
        Ok(self
            .tables()?
            .sessions
            .values()
            .find(|s| s.is_active() && &s.target == target)
            .cloned())
    }

    fn compare_and_swap(
        &self,
        session: &VotingSession,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        let mut t = self.tables()?;
        let stored = t
            .sessions
            .get_mut(&session.id)
            .ok_or_else(|| StoreError::NotFound(format!("session {}", session.id)))?;
        if stored.version != expected_version {
            return Err(StoreError::VersionMismatch {
                session: session.id.clone(),
                expected: expected_version,
                found: stored.version,
            });
        }
        *stored = session.clone();
        Ok(())
    }

    fn sessions_for_event(&self, event: &EventId) -> Result<Vec<VotingSession>, StoreError> {
        let t = self.tables()?;
        Ok(t.session_order
            .iter()
            .filter_map(|id| t.sessions.get(id))
            .filter(|s| &s.event_id == event)
            .cloned()
            .collect())
    }

    fn active_sessions(&self) -> Result<Vec<VotingSession>, StoreError> {
        let t = self.tables()?;
        Ok(t.session_order
            .iter()
            .filter_map(|id| t.sessions.get(id))
            .filter(|s| s.is_active())
            .cloned()
            .collect())
    }
}

impl VoteStore for MemoryStore {
    fn put_vote(&self, vote: &Vote) -> Result<(), StoreError> {
        self.tables()?
            .votes
            .entry(vote.session_id.clone())
            .or_default()
            .insert(vote.id.clone(), vote.clone());
        Ok(())
    }

    fn votes_for_session(&self, session: &SessionId) -> Result<Vec<Vote>, StoreError> {
        Ok(self
            .tables()?
            .votes
            .get(session)
            .map(|votes| votes.values().cloned().collect())
            .unwrap_or_default())
    }
}

impl RosterStore for MemoryStore {
    fn roster(&self, event: &EventId) -> Result<EventRoster, StoreError> {
        Ok(self
            .tables()?
            .rosters
            .get(event)
            .cloned()
            .unwrap_or_else(|| EventRoster::new(event.clone())))
    }

    fn put_roster(&self, roster: &EventRoster) -> Result<(), StoreError> {
        self.tables()?
            .rosters
            .insert(roster.event_id.clone(), roster.clone());
        Ok(())
    }
}

impl ChangeRequestStore for MemoryStore {
    fn change_requests(&self, amendment: &AmendmentId) -> Result<Vec<ChangeRequest>, StoreError> {
        Ok(self
            .tables()?
            .change_requests
            .get(amendment)
            .map(|crs| crs.values().cloned().collect())
            .unwrap_or_default())
    }

    fn put_change_requests(&self, requests: &[ChangeRequest]) -> Result<(), StoreError> {
        let mut t = self.tables()?;
        for cr in requests {
            t.change_requests
                .entry(cr.amendment_id.clone())
                .or_default()
                .insert(cr.id.clone(), cr.clone());
        }
        Ok(())
    }
}

impl CandidateStore for MemoryStore {
    fn candidates(&self, election: &ElectionId) -> Result<Vec<ElectionCandidate>, StoreError> {
        Ok(self
            .tables()?
            .candidates
            .get(election)
            .cloned()
            .unwrap_or_default())
    }

    fn put_candidate(&self, candidate: &ElectionCandidate) -> Result<(), StoreError> {
        let mut t = self.tables()?;
        let list = t.candidates.entry(candidate.election_id.clone()).or_default();
        match list.iter_mut().find(|c| c.id == candidate.id) {
            Some(existing) => *existing = candidate.clone(),
            None => list.push(candidate.clone()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polity_types::{CandidateId, Timestamp, UserId};
    use polity_voting::{Ballot, CandidateStatus, MajorityType, SessionOptions, VoteValue};

    /// Each agenda item decides its own amendment.
    fn session(id: &str, agenda: &str) -> VotingSession {
        let target = TargetId::Amendment(AmendmentId::new(format!("amd_{agenda}")));
        session_on(id, agenda, target)
    }

    fn session_on(id: &str, agenda: &str, target: TargetId) -> VotingSession {
        VotingSession::open(
            SessionId::new(id),
            EventId::new("evt_1"),
            AgendaItemId::new(agenda),
            target,
            UserId::new("chair"),
            SessionOptions::new("Motion", MajorityType::Simple),
            Timestamp::new(10),
        )
    }

    #[test]
    fn second_active_session_on_agenda_item_is_rejected() {
        let store = MemoryStore::new();
        store.insert_session(&session("vs_1", "agi_1")).unwrap();
        let err = store.insert_session(&session("vs_2", "agi_1")).unwrap_err();
        match err {
            StoreError::ActiveSessionExists { active, .. } => assert_eq!(active.as_str(), "vs_1"),
            other => panic!("unexpected error: {other}"),
        }
        // A different agenda item is independent.
        store.insert_session(&session("vs_3", "agi_2")).unwrap();
    }

    #[test]
    fn second_active_session_on_target_is_rejected() {
        let store = MemoryStore::new();
        let target = TargetId::ChangeRequest {
            amendment: AmendmentId::new("amd_1"),
            change_request: ChangeRequestId::new("cr_1"),
        };
        store
            .insert_session(&session_on("vs_1", "agi_1", target.clone()))
            .unwrap();
        let err = store
            .insert_session(&session_on("vs_2", "agi_2", target.clone()))
            .unwrap_err();
        match err {
            StoreError::ActiveSessionExists {
                agenda_item,
                active,
            } => {
                assert_eq!(agenda_item.as_str(), "agi_1");
                assert_eq!(active.as_str(), "vs_1");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            store.active_session_on(&target).unwrap().map(|s| s.id),
            Some(SessionId::new("vs_1"))
        );
    }

    #[test]
    fn completed_session_frees_the_agenda_item() {
        let store = MemoryStore::new();
        let mut s = session("vs_1", "agi_1");
        store.insert_session(&s).unwrap();
        s.start_voting(Timestamp::new(11), 300).unwrap();
        store.compare_and_swap(&s, 1).unwrap();
        let tally = polity_voting::SessionTally::Ballot(polity_voting::tally(
            Vec::new(),
            MajorityType::Simple,
            1,
        ));
        s.complete(Timestamp::new(12), tally, polity_voting::CloseReason::Manual)
            .unwrap();
        store.compare_and_swap(&s, 2).unwrap();

        assert!(store
            .active_session_for(&EventId::new("evt_1"), &AgendaItemId::new("agi_1"))
            .unwrap()
            .is_none());
        store.insert_session(&session("vs_2", "agi_1")).unwrap();
        // The completed session stays on record.
        assert_eq!(store.sessions_for_event(&EventId::new("evt_1")).unwrap().len(), 2);
        assert_eq!(store.active_sessions().unwrap().len(), 1);
    }

    #[test]
    fn stale_version_is_rejected() {
        let store = MemoryStore::new();
        let mut s = session("vs_1", "agi_1");
        store.insert_session(&s).unwrap();
        s.start_voting(Timestamp::new(11), 300).unwrap();
        assert!(matches!(
            store.compare_and_swap(&s, 7),
            Err(StoreError::VersionMismatch { expected: 7, found: 1, .. })
        ));
        store.compare_and_swap(&s, 1).unwrap();
        assert!(store.compare_and_swap(&s, 1).is_err());
        assert_eq!(store.get_session(&s.id).unwrap().version, 2);
    }

    #[test]
    fn votes_upsert_by_id() {
        let store = MemoryStore::new();
        let mut vote = Vote {
            id: VoteId::new("vote_1"),
            session_id: SessionId::new("vs_1"),
            voter: UserId::new("ann"),
            ballot: Ballot::Choice(VoteValue::Accept),
            is_indication: false,
            cast_at: Timestamp::new(5),
            updated_at: None,
        };
        store.put_vote(&vote).unwrap();
        vote.ballot = Ballot::Choice(VoteValue::Reject);
        store.put_vote(&vote).unwrap();
        let votes = store.votes_for_session(&SessionId::new("vs_1")).unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].ballot, Ballot::Choice(VoteValue::Reject));
        assert!(store.votes_for_session(&SessionId::new("vs_x")).unwrap().is_empty());
    }

    #[test]
    fn unknown_event_has_empty_roster() {
        let store = MemoryStore::new();
        let roster = store.roster(&EventId::new("evt_9")).unwrap();
        assert_eq!(roster.participant_count(), 0);
    }

    #[test]
    fn candidates_upsert_in_place() {
        let store = MemoryStore::new();
        let mut c = ElectionCandidate {
            id: CandidateId::new("cand_1"),
            election_id: ElectionId::new("elc_1"),
            user_id: UserId::new("ann"),
            status: CandidateStatus::Nominated,
            created_at: Timestamp::new(1),
            withdrawn_at: None,
        };
        store.put_candidate(&c).unwrap();
        c.status = CandidateStatus::Accepted;
        store.put_candidate(&c).unwrap();
        let all = store.candidates(&ElectionId::new("elc_1")).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, CandidateStatus::Accepted);
    }
}
