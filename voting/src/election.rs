//! Elections: candidacy management and plurality counting.
//!
//! An election session is an ordinary [`VotingSession`](crate::VotingSession)
//! whose ballots name a candidate instead of accept/reject/abstain. This
//! module owns the candidate list of one election and turns a vote book
//! into per-candidate counts.

use crate::error::VotingError;
use crate::tally::{plurality, Plurality};
use crate::votes::VoteBook;
use polity_types::{CandidateId, ElectionId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Nominated,
    Accepted,
    Withdrawn,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionCandidate {
    pub id: CandidateId,
    pub election_id: ElectionId,
    pub user_id: UserId,
    pub status: CandidateStatus,
    pub created_at: Timestamp,
    #[serde(default)]
    pub withdrawn_at: Option<Timestamp>,
}

impl ElectionCandidate {
    pub fn is_standing(&self) -> bool {
        self.status != CandidateStatus::Withdrawn
    }
}

pub type ElectionTally = Plurality<CandidateId>;

/// Every candidacy ever filed in one election, withdrawn ones included.
#[derive(Clone, Debug)]
pub struct CandidateRoster {
    election_id: ElectionId,
    candidates: Vec<ElectionCandidate>,
}

impl CandidateRoster {
    pub fn new(
        election_id: ElectionId,
        candidates: impl IntoIterator<Item = ElectionCandidate>,
    ) -> Self {
        let candidates = candidates
            .into_iter()
            .filter(|c| c.election_id == election_id)
            .collect();
        Self {
            election_id,
            candidates,
        }
    }

    pub fn election_id(&self) -> &ElectionId {
        &self.election_id
    }

    /// All candidacies, including withdrawn ones kept for audit.
    pub fn all(&self) -> &[ElectionCandidate] {
        &self.candidates
    }

    pub fn get(&self, id: &CandidateId) -> Option<&ElectionCandidate> {
        self.candidates.iter().find(|c| &c.id == id)
    }

    /// The user's current (non-withdrawn) candidacy.
    pub fn standing_candidacy_of(&self, user: &UserId) -> Option<&ElectionCandidate> {
        self.candidates
            .iter()
            .find(|c| &c.user_id == user && c.is_standing())
    }

    /// Candidates shown on the ballot.
    pub fn ballot(&self) -> impl Iterator<Item = &ElectionCandidate> {
        self.candidates.iter().filter(|c| c.is_standing())
    }

    /// File a candidacy. `may_stand` is the caller's `passive_voting` right.
    pub fn become_candidate(
        &mut self,
        id: CandidateId,
        user: UserId,
        may_stand: bool,
        now: Timestamp,
    ) -> Result<&ElectionCandidate, VotingError> {
        if !may_stand {
            return Err(VotingError::PermissionDenied(format!(
                "{user} lacks the passive voting right"
            )));
        }
        if self.standing_candidacy_of(&user).is_some() {
            return Err(VotingError::AlreadyCandidate(user));
        }
        self.candidates.push(ElectionCandidate {
            id,
            election_id: self.election_id.clone(),
            user_id: user,
            status: CandidateStatus::Nominated,
            created_at: now,
            withdrawn_at: None,
        });
        let idx = self.candidates.len() - 1;
        Ok(&self.candidates[idx])
    }

    /// Nominated → Accepted. Only the candidate may accept.
    pub fn accept(
        &mut self,
        id: &CandidateId,
        by: &UserId,
    ) -> Result<&ElectionCandidate, VotingError> {
        let candidate = self.own_candidacy_mut(id, by)?;
        match candidate.status {
            CandidateStatus::Nominated => {
                candidate.status = CandidateStatus::Accepted;
                Ok(&*candidate)
            }
            CandidateStatus::Accepted => Ok(&*candidate),
            CandidateStatus::Withdrawn => Err(VotingError::InvalidBallot(format!(
                "candidacy {id} was withdrawn"
            ))),
        }
    }

    /// Withdraw a candidacy. Only the candidate may withdraw; votes already
    /// cast for them are retained but no longer counted.
    pub fn withdraw(
        &mut self,
        id: &CandidateId,
        by: &UserId,
        now: Timestamp,
    ) -> Result<&ElectionCandidate, VotingError> {
        let candidate = self.own_candidacy_mut(id, by)?;
        if candidate.status == CandidateStatus::Withdrawn {
            return Err(VotingError::InvalidBallot(format!(
                "candidacy {id} was already withdrawn"
            )));
        }
        candidate.status = CandidateStatus::Withdrawn;
        candidate.withdrawn_at = Some(now);
        Ok(&*candidate)
    }

    /// Fails unless `id` is a standing candidate.
    pub fn ensure_votable(&self, id: &CandidateId) -> Result<(), VotingError> {
        match self.get(id) {
            Some(c) if c.is_standing() => Ok(()),
            Some(_) => Err(VotingError::InvalidBallot(format!(
                "candidate {id} has withdrawn"
            ))),
            None => Err(VotingError::InvalidBallot(format!(
                "{id} is not a candidate in election {}",
                self.election_id
            ))),
        }
    }

    /// Plurality over binding votes for standing candidates.
    pub fn tally(&self, votes: &VoteBook) -> ElectionTally {
        plurality(self.count(votes.binding().filter_map(|v| v.ballot.candidate())))
    }

    /// Indication counts per standing candidate; advisory only.
    pub fn indication_counts(&self, votes: &VoteBook) -> BTreeMap<CandidateId, u32> {
        self.count(votes.indications().filter_map(|v| v.ballot.candidate()))
    }

    fn count<'a>(
        &self,
        choices: impl Iterator<Item = &'a CandidateId>,
    ) -> BTreeMap<CandidateId, u32> {
        let mut counts: BTreeMap<CandidateId, u32> =
            self.ballot().map(|c| (c.id.clone(), 0)).collect();
        for choice in choices {
            if let Some(n) = counts.get_mut(choice) {
                *n += 1;
            }
        }
        counts
    }

    fn own_candidacy_mut(
        &mut self,
        id: &CandidateId,
        by: &UserId,
    ) -> Result<&mut ElectionCandidate, VotingError> {
        let candidate = self
            .candidates
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| VotingError::NotFound(format!("candidate {id}")))?;
        if &candidate.user_id != by {
            return Err(VotingError::PermissionDenied(format!(
                "only the candidate may change candidacy {id}"
            )));
        }
        Ok(candidate)
    }
}
