//! Ballot tallying: pure functions from cast votes to an outcome.
//!
//! Rules, in order of precedence:
//! 1. Zero eligible voters and no accept/reject votes: [`ZeroEligiblePolicy`].
//! 2. `accept == reject` is always a tie, whatever the majority type.
//! 3. Otherwise the majority rule decides:
//!    - simple:     `accept > reject`
//!    - absolute:   `accept > base / 2`
//!    - two-thirds: `accept >= base * 2 / 3`
//!
//! `base` is the eligible voter count by default. Thresholds are evaluated
//! in integer arithmetic (`2·accept > base`, `3·accept ≥ 2·base`), which is
//! exact: 6 of 9 is two-thirds, 6 of 10 is not.

use crate::votes::VoteValue;
use polity_types::CandidateId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MajorityType {
    Simple,
    Absolute,
    TwoThirds,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionResult {
    Passed,
    Rejected,
    Tie,
}

impl fmt::Display for SessionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Passed => "passed",
            Self::Rejected => "rejected",
            Self::Tie => "tie",
        })
    }
}

/// Outcome when nobody is eligible and nobody voted accept or reject.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroEligiblePolicy {
    /// No mandate.
    #[default]
    Rejected,
    Tie,
}

/// Denominator for absolute and two-thirds majorities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MajorityBase {
    /// Everyone eligible, whether they voted or not. Abstentions and
    /// absentees both make passing harder.
    #[default]
    EligibleVoters,
    /// Binding votes actually cast, abstentions included.
    VotesCast,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyPolicy {
    #[serde(default)]
    pub zero_eligible: ZeroEligiblePolicy,
    #[serde(default)]
    pub majority_base: MajorityBase,
}

/// Counts and outcome of an accept/reject/abstain ballot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub accept: u32,
    pub reject: u32,
    pub abstain: u32,
    pub eligible: u32,
    pub result: SessionResult,
}

impl Tally {
    pub fn cast(&self) -> u32 {
        self.accept + self.reject + self.abstain
    }
}

/// Tally with the default policy.
pub fn tally(
    votes: impl IntoIterator<Item = VoteValue>,
    majority: MajorityType,
    eligible_count: u32,
) -> Tally {
    tally_with_policy(votes, majority, eligible_count, &TallyPolicy::default())
}

pub fn tally_with_policy(
    votes: impl IntoIterator<Item = VoteValue>,
    majority: MajorityType,
    eligible_count: u32,
    policy: &TallyPolicy,
) -> Tally {
    let (mut accept, mut reject, mut abstain) = (0u32, 0u32, 0u32);
    for value in votes {
        match value {
            VoteValue::Accept => accept += 1,
            VoteValue::Reject => reject += 1,
            VoteValue::Abstain => abstain += 1,
        }
    }
    let result = decide(accept, reject, abstain, majority, eligible_count, policy);
    Tally {
        accept,
        reject,
        abstain,
        eligible: eligible_count,
        result,
    }
}

/// Apply the majority rule to raw counts.
pub fn decide(
    accept: u32,
    reject: u32,
    abstain: u32,
    majority: MajorityType,
    eligible_count: u32,
    policy: &TallyPolicy,
) -> SessionResult {
    if eligible_count == 0 && accept == 0 && reject == 0 {
        return match policy.zero_eligible {
            ZeroEligiblePolicy::Rejected => SessionResult::Rejected,
            ZeroEligiblePolicy::Tie => SessionResult::Tie,
        };
    }
    if accept == reject {
        return SessionResult::Tie;
    }

    let accept = u64::from(accept);
    let base = match policy.majority_base {
        MajorityBase::EligibleVoters => u64::from(eligible_count),
        MajorityBase::VotesCast => accept + u64::from(reject) + u64::from(abstain),
    };

    let passed = match majority {
        MajorityType::Simple => accept > u64::from(reject),
        // An empty base carries no mandate.
        MajorityType::Absolute => base > 0 && 2 * accept > base,
        MajorityType::TwoThirds => base > 0 && 3 * accept >= 2 * base,
    };

    if passed {
        SessionResult::Passed
    } else {
        SessionResult::Rejected
    }
}

/// Outcome of a plurality count (elections).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plurality<K: Ord> {
    pub counts: BTreeMap<K, u32>,
    /// Every option sharing the highest non-zero count.
    pub leaders: Vec<K>,
    pub winner: Option<K>,
    pub result: SessionResult,
}

/// Find the plurality leader.
///
/// A single leader passes; several leaders tie. With no options, or no
/// votes for any option, nobody has a mandate and the result is rejected.
pub fn plurality<K: Ord + Clone>(counts: BTreeMap<K, u32>) -> Plurality<K> {
    let top = counts.values().copied().max().unwrap_or(0);
    let leaders: Vec<K> = if top == 0 {
        Vec::new()
    } else {
        counts
            .iter()
            .filter(|(_, c)| **c == top)
            .map(|(k, _)| k.clone())
            .collect()
    };

    let (winner, result) = match leaders.len() {
        0 => (None, SessionResult::Rejected),
        1 => (leaders.first().cloned(), SessionResult::Passed),
        _ => (None, SessionResult::Tie),
    };

    Plurality {
        counts,
        leaders,
        winner,
        result,
    }
}

/// The frozen tally stored on a completed session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionTally {
    Ballot(Tally),
    Election(Plurality<CandidateId>),
}

impl SessionTally {
    pub fn result(&self) -> SessionResult {
        match self {
            Self::Ballot(t) => t.result,
            Self::Election(p) => p.result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn votes(accept: u32, reject: u32, abstain: u32) -> Vec<VoteValue> {
        let mut v = Vec::new();
        v.extend(std::iter::repeat(VoteValue::Accept).take(accept as usize));
        v.extend(std::iter::repeat(VoteValue::Reject).take(reject as usize));
        v.extend(std::iter::repeat(VoteValue::Abstain).take(abstain as usize));
        v
    }

    #[test]
    fn equal_accept_and_reject_tie_under_every_majority() {
        for majority in [
            MajorityType::Simple,
            MajorityType::Absolute,
            MajorityType::TwoThirds,
        ] {
            let t = tally(votes(5, 5, 0), majority, 10);
            assert_eq!(t.result, SessionResult::Tie, "{majority:?}");
        }
    }

    #[test]
    fn absolute_needs_more_than_half_of_eligible() {
        let t = tally(votes(5, 0, 5), MajorityType::Absolute, 10);
        assert_eq!(t.result, SessionResult::Rejected);
        assert_eq!(t.abstain, 5);
        let t = tally(votes(6, 0, 4), MajorityType::Absolute, 10);
        assert_eq!(t.result, SessionResult::Passed);
    }

    #[test]
    fn absolute_fails_on_low_turnout_without_rejects() {
        let t = tally(votes(3, 0, 0), MajorityType::Absolute, 10);
        assert_eq!(t.result, SessionResult::Rejected);
    }

    #[test]
    fn two_thirds_is_inclusive_and_exact() {
        assert_eq!(
            tally(votes(6, 0, 0), MajorityType::TwoThirds, 9).result,
            SessionResult::Passed
        );
        assert_eq!(
            tally(votes(6, 1, 0), MajorityType::TwoThirds, 10).result,
            SessionResult::Rejected
        );
        assert_eq!(
            tally(votes(7, 1, 0), MajorityType::TwoThirds, 10).result,
            SessionResult::Passed
        );
    }

    #[test]
    fn simple_majority_ignores_abstentions() {
        let t = tally(votes(2, 1, 7), MajorityType::Simple, 10);
        assert_eq!(t.result, SessionResult::Passed);
        let t = tally(votes(1, 2, 7), MajorityType::Simple, 10);
        assert_eq!(t.result, SessionResult::Rejected);
    }

    #[test]
    fn zero_eligible_follows_policy() {
        let rejected = tally(Vec::new(), MajorityType::Absolute, 0);
        assert_eq!(rejected.result, SessionResult::Rejected);
        // Checked ahead of the tie rule: 0 == 0 alone would be a tie.
        let rejected = tally(Vec::new(), MajorityType::Simple, 0);
        assert_eq!(rejected.result, SessionResult::Rejected);
        let tie = tally(Vec::new(), MajorityType::Simple, 3);
        assert_eq!(tie.result, SessionResult::Tie);

        let policy = TallyPolicy {
            zero_eligible: ZeroEligiblePolicy::Tie,
            ..TallyPolicy::default()
        };
        let tie = tally_with_policy(Vec::new(), MajorityType::Absolute, 0, &policy);
        assert_eq!(tie.result, SessionResult::Tie);
    }

    #[test]
    fn zero_eligible_with_votes_has_no_mandate() {
        let t = tally(votes(2, 1, 0), MajorityType::TwoThirds, 0);
        assert_eq!(t.result, SessionResult::Rejected);
        let t = tally(votes(2, 1, 0), MajorityType::Absolute, 0);
        assert_eq!(t.result, SessionResult::Rejected);
    }

    #[test]
    fn votes_cast_base_ignores_absentees() {
        let policy = TallyPolicy {
            majority_base: MajorityBase::VotesCast,
            ..TallyPolicy::default()
        };
        // 3 of 4 cast is an absolute majority even though 10 are eligible.
        let t = tally_with_policy(votes(3, 0, 1), MajorityType::Absolute, 10, &policy);
        assert_eq!(t.result, SessionResult::Passed);
    }

    #[test]
    fn tally_is_deterministic() {
        let input = votes(4, 3, 2);
        let a = tally(input.clone(), MajorityType::Simple, 12);
        let b = tally(input, MajorityType::Simple, 12);
        assert_eq!(a, b);
    }

    #[test]
    fn plurality_single_leader_wins() {
        let counts: BTreeMap<&str, u32> = [("a", 3), ("b", 5), ("c", 1)].into_iter().collect();
        let p = plurality(counts);
        assert_eq!(p.winner, Some("b"));
        assert_eq!(p.result, SessionResult::Passed);
    }

    #[test]
    fn plurality_shared_top_is_tie() {
        let counts: BTreeMap<&str, u32> = [("a", 4), ("b", 4), ("c", 1)].into_iter().collect();
        let p = plurality(counts);
        assert_eq!(p.winner, None);
        assert_eq!(p.leaders, vec!["a", "b"]);
        assert_eq!(p.result, SessionResult::Tie);
    }

    #[test]
    fn plurality_without_votes_is_rejected() {
        let counts: BTreeMap<&str, u32> = [("a", 0), ("b", 0)].into_iter().collect();
        let p = plurality(counts);
        assert!(p.leaders.is_empty());
        assert_eq!(p.result, SessionResult::Rejected);
        assert_eq!(plurality(BTreeMap::<&str, u32>::new()).result, SessionResult::Rejected);
    }
}
