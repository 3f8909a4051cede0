//! Cast votes and the per-session vote book.

use crate::error::VotingError;
use polity_types::{CandidateId, SessionId, Timestamp, UserId, VoteId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Value of an accept/reject/abstain ballot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteValue {
    Accept,
    Reject,
    Abstain,
}

/// What a voter marked: a value, or a candidate in an election.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ballot {
    Choice(VoteValue),
    Candidate(CandidateId),
}

impl Ballot {
    pub fn choice(&self) -> Option<VoteValue> {
        match self {
            Self::Choice(v) => Some(*v),
            Self::Candidate(_) => None,
        }
    }

    pub fn candidate(&self) -> Option<&CandidateId> {
        match self {
            Self::Candidate(c) => Some(c),
            Self::Choice(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub id: VoteId,
    pub session_id: SessionId,
    pub voter: UserId,
    pub ballot: Ballot,
    /// Cast before the binding phase; advisory only.
    pub is_indication: bool,
    pub cast_at: Timestamp,
    /// Set when the voter replaced this vote.
    pub updated_at: Option<Timestamp>,
}

/// All votes of one session, keyed by voter.
///
/// Holds at most one binding and one indication vote per voter. Binding
/// votes are never duplicated: a second cast is rejected and the caller has
/// to go through [`VoteBook::replace_binding`].
#[derive(Clone, Debug, Default)]
pub struct VoteBook {
    binding: BTreeMap<UserId, Vote>,
    indications: BTreeMap<UserId, Vote>,
}

impl VoteBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a book from stored records. Later records for the same
    /// (voter, kind) win, matching replace semantics.
    pub fn from_votes(votes: impl IntoIterator<Item = Vote>) -> Self {
        let mut book = Self::new();
        for vote in votes {
            let slot = if vote.is_indication {
                &mut book.indications
            } else {
                &mut book.binding
            };
            slot.insert(vote.voter.clone(), vote);
        }
        book
    }

    /// Check that `voter` may cast a first binding vote.
    pub fn ensure_can_cast(&self, voter: &UserId) -> Result<(), VotingError> {
        if self.binding.contains_key(voter) {
            return Err(VotingError::DuplicateVote(voter.clone()));
        }
        Ok(())
    }

    pub fn record_binding(&mut self, vote: Vote) -> Result<(), VotingError> {
        debug_assert!(!vote.is_indication);
        self.ensure_can_cast(&vote.voter)?;
        self.binding.insert(vote.voter.clone(), vote);
        Ok(())
    }

    /// Build the replacement for `voter`'s binding vote without applying it.
    pub fn prepare_replacement(
        &self,
        voter: &UserId,
        ballot: Ballot,
        now: Timestamp,
    ) -> Result<Vote, VotingError> {
        let existing = self
            .binding
            .get(voter)
            .ok_or_else(|| VotingError::NotFound(format!("binding vote of {voter}")))?;
        Ok(Vote {
            ballot,
            updated_at: Some(now),
            ..existing.clone()
        })
    }

    /// Replace `voter`'s binding vote, keeping its id and original cast time.
    pub fn replace_binding(
        &mut self,
        voter: &UserId,
        ballot: Ballot,
        now: Timestamp,
    ) -> Result<Vote, VotingError> {
        let replacement = self.prepare_replacement(voter, ballot, now)?;
        self.binding.insert(voter.clone(), replacement.clone());
        Ok(replacement)
    }

    /// Record an indication, superseding the voter's previous one.
    ///
    /// Returns the superseded vote, if any.
    pub fn record_indication(&mut self, vote: Vote) -> Option<Vote> {
        debug_assert!(vote.is_indication);
        self.indications.insert(vote.voter.clone(), vote)
    }

    pub fn indication_of(&self, voter: &UserId) -> Option<&Vote> {
        self.indications.get(voter)
    }

    pub fn binding_of(&self, voter: &UserId) -> Option<&Vote> {
        self.binding.get(voter)
    }

    pub fn binding(&self) -> impl Iterator<Item = &Vote> {
        self.binding.values()
    }

    pub fn indications(&self) -> impl Iterator<Item = &Vote> {
        self.indications.values()
    }

    pub fn binding_count(&self) -> usize {
        self.binding.len()
    }

    /// Binding votes cast by members of `eligible`.
    pub fn binding_count_among(&self, eligible: &BTreeSet<UserId>) -> usize {
        self.binding.keys().filter(|v| eligible.contains(*v)).count()
    }

    /// Values of all binding accept/reject/abstain votes.
    pub fn binding_choices(&self) -> impl Iterator<Item = VoteValue> + '_ {
        self.binding.values().filter_map(|v| v.ballot.choice())
    }

    pub fn indication_choices(&self) -> impl Iterator<Item = VoteValue> + '_ {
        self.indications.values().filter_map(|v| v.ballot.choice())
    }
}
