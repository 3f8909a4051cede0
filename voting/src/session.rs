//! Voting session state machine.
//!
//! ```text
//! Introduction ──start_voting──▶ Voting ──complete──▶ Completed
//! ```
//!
//! No transition skips a phase and none is reversible. Every successful
//! transition bumps `version`, which the store uses as its compare-and-set
//! key, so a stale writer (e.g. a timer racing a manual close) loses.

use crate::error::VotingError;
use crate::tally::{MajorityType, SessionResult, SessionTally};
use polity_types::{AgendaItemId, EventId, SessionId, TargetId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Voting time limit applied when the manager does not set one.
pub const DEFAULT_TIME_LIMIT_SECS: u64 = 300;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Introduction,
    Voting,
    Completed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Introduction => "introduction",
            Self::Voting => "voting",
            Self::Completed => "completed",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingType {
    Amendment,
    Election,
    ChangeRequest,
}

impl VotingType {
    pub fn of(target: &TargetId) -> Self {
        match target {
            TargetId::Amendment(_) => Self::Amendment,
            TargetId::Election(_) => Self::Election,
            TargetId::ChangeRequest { .. } => Self::ChangeRequest,
        }
    }
}

/// Whether transitions of this session appear on the public timeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Manual,
    AllVoted,
    Timeout,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Manual => "manual",
            Self::AllVoted => "all_voted",
            Self::Timeout => "timeout",
        })
    }
}

/// Settings fixed when a session is opened.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    pub title: String,
    pub majority_type: MajorityType,
    #[serde(default)]
    pub auto_close_on_all_voted: bool,
    #[serde(default)]
    pub auto_close_on_timeout: bool,
    /// Voting time limit; the coordinator's default applies when absent.
    #[serde(default)]
    pub time_limit_secs: Option<u64>,
    #[serde(default)]
    pub visibility: Visibility,
    /// Retries carrying the same key return the original session.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl SessionOptions {
    pub fn new(title: impl Into<String>, majority_type: MajorityType) -> Self {
        Self {
            title: title.into(),
            majority_type,
            auto_close_on_all_voted: false,
            auto_close_on_timeout: false,
            time_limit_secs: None,
            visibility: Visibility::Public,
            idempotency_key: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingSession {
    pub id: SessionId,
    pub event_id: EventId,
    pub agenda_item_id: AgendaItemId,
    pub voting_type: VotingType,
    pub target: TargetId,
    pub title: String,
    pub visibility: Visibility,
    pub phase: Phase,
    pub majority_type: MajorityType,
    pub auto_close_on_all_voted: bool,
    pub auto_close_on_timeout: bool,
    pub time_limit_secs: Option<u64>,
    pub created_by: UserId,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
    pub result: Option<SessionResult>,
    pub tally: Option<SessionTally>,
    pub close_reason: Option<CloseReason>,
    pub idempotency_key: Option<String>,
    pub version: u64,
}

impl VotingSession {
    /// Open a session in the Introduction phase.
    pub fn open(
        id: SessionId,
        event_id: EventId,
        agenda_item_id: AgendaItemId,
        target: TargetId,
        created_by: UserId,
        options: SessionOptions,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            event_id,
            agenda_item_id,
            voting_type: VotingType::of(&target),
            target,
            title: options.title,
            visibility: options.visibility,
            phase: Phase::Introduction,
            majority_type: options.majority_type,
            auto_close_on_all_voted: options.auto_close_on_all_voted,
            auto_close_on_timeout: options.auto_close_on_timeout,
            time_limit_secs: options.time_limit_secs,
            created_by,
            created_at: now,
            started_at: None,
            ended_at: None,
            result: None,
            tally: None,
            close_reason: None,
            idempotency_key: options.idempotency_key,
            version: 1,
        }
    }

    /// Introduction or Voting.
    pub fn is_active(&self) -> bool {
        self.phase != Phase::Completed
    }

    /// `started_at + time_limit`, once voting has started. `started_at` is
    /// truncated to the second, so the deadline can fall up to one second
    /// less than `time_limit` after the real start.
    pub fn deadline(&self) -> Option<Timestamp> {
        let started = self.started_at?;
        Some(started.plus_secs(self.time_limit_secs?))
    }

    /// Seconds left before the deadline, if one applies.
    pub fn remaining_secs(&self, now: Timestamp) -> Option<u64> {
        self.deadline()
            .map(|d| d.as_secs().saturating_sub(now.as_secs()))
    }

    /// Introduction → Voting.
    pub fn start_voting(
        &mut self,
        now: Timestamp,
        default_time_limit_secs: u64,
    ) -> Result<(), VotingError> {
        if self.phase != Phase::Introduction {
            return Err(VotingError::phase("start voting", self.phase));
        }
        self.phase = Phase::Voting;
        self.started_at = Some(now);
        self.time_limit_secs = Some(self.time_limit_secs.unwrap_or(default_time_limit_secs));
        self.version += 1;
        Ok(())
    }

    pub fn ensure_accepting_votes(&self) -> Result<(), VotingError> {
        if self.phase != Phase::Voting {
            return Err(VotingError::phase("cast a binding vote", self.phase));
        }
        Ok(())
    }

    pub fn ensure_accepting_indications(&self) -> Result<(), VotingError> {
        if self.phase != Phase::Introduction {
            return Err(VotingError::phase("cast an indication vote", self.phase));
        }
        Ok(())
    }

    /// Which auto-close condition, if any, currently holds.
    ///
    /// All-voted is checked before timeout so a session that filled up in
    /// its last second records the more informative reason.
    pub fn auto_close_due(
        &self,
        now: Timestamp,
        voted_count: usize,
        total_eligible: usize,
    ) -> Option<CloseReason> {
        if self.phase != Phase::Voting {
            return None;
        }
        if self.auto_close_on_all_voted && total_eligible > 0 && voted_count >= total_eligible {
            return Some(CloseReason::AllVoted);
        }
        if self.auto_close_on_timeout {
            if let Some(deadline) = self.deadline() {
                if now >= deadline {
                    return Some(CloseReason::Timeout);
                }
            }
        }
        None
    }

    /// Voting → Completed. The result is frozen from here on.
    pub fn complete(
        &mut self,
        now: Timestamp,
        tally: SessionTally,
        reason: CloseReason,
    ) -> Result<SessionResult, VotingError> {
        if self.phase != Phase::Voting {
            return Err(VotingError::phase("close voting", self.phase));
        }
        // started_at < ended_at even when closed within the same second.
        let floor = self.started_at.map(|s| s.plus_secs(1)).unwrap_or(now);
        let result = tally.result();
        self.phase = Phase::Completed;
        self.ended_at = Some(now.max(floor));
        self.result = Some(result);
        self.tally = Some(tally);
        self.close_reason = Some(reason);
        self.version += 1;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tally::{tally, Tally};
    use crate::votes::VoteValue;
    use polity_types::AmendmentId;

    fn session(options: SessionOptions) -> VotingSession {
        VotingSession::open(
            SessionId::new("vs_1"),
            EventId::new("evt_1"),
            AgendaItemId::new("agi_1"),
            TargetId::Amendment(AmendmentId::new("amd_1")),
            UserId::new("chair"),
            options,
            Timestamp::new(1_000),
        )
    }

    fn ballot(accept: u32) -> SessionTally {
        let t: Tally = tally(
            std::iter::repeat(VoteValue::Accept).take(accept as usize),
            MajorityType::Simple,
            5,
        );
        SessionTally::Ballot(t)
    }

    #[test]
    fn opens_in_introduction() {
        let s = session(SessionOptions::new("Budget", MajorityType::Simple));
        assert_eq!(s.phase, Phase::Introduction);
        assert_eq!(s.voting_type, VotingType::Amendment);
        assert!(s.is_active());
        assert_eq!(s.version, 1);
    }

    #[test]
    fn start_voting_applies_default_time_limit() {
        let mut s = session(SessionOptions::new("Budget", MajorityType::Simple));
        s.start_voting(Timestamp::new(1_010), DEFAULT_TIME_LIMIT_SECS)
            .unwrap();
        assert_eq!(s.phase, Phase::Voting);
        assert_eq!(s.time_limit_secs, Some(300));
        assert_eq!(s.deadline(), Some(Timestamp::new(1_310)));
        assert_eq!(s.remaining_secs(Timestamp::new(1_300)), Some(10));
        assert_eq!(s.version, 2);
    }

    #[test]
    fn explicit_time_limit_wins() {
        let mut options = SessionOptions::new("Budget", MajorityType::Simple);
        options.time_limit_secs = Some(60);
        let mut s = session(options);
        s.start_voting(Timestamp::new(1_010), 300).unwrap();
        assert_eq!(s.time_limit_secs, Some(60));
    }

    #[test]
    fn cannot_start_voting_twice() {
        let mut s = session(SessionOptions::new("Budget", MajorityType::Simple));
        s.start_voting(Timestamp::new(1_010), 300).unwrap();
        let err = s.start_voting(Timestamp::new(1_020), 300).unwrap_err();
        assert!(matches!(
            err,
            VotingError::InvalidPhaseTransition {
                phase: Phase::Voting,
                ..
            }
        ));
        assert_eq!(s.started_at, Some(Timestamp::new(1_010)));
    }

    #[test]
    fn cannot_close_during_introduction() {
        let mut s = session(SessionOptions::new("Budget", MajorityType::Simple));
        let err = s
            .complete(Timestamp::new(1_020), ballot(1), CloseReason::Manual)
            .unwrap_err();
        assert!(matches!(err, VotingError::InvalidPhaseTransition { .. }));
        assert!(s.result.is_none());
    }

    #[test]
    fn completion_is_exactly_once() {
        let mut s = session(SessionOptions::new("Budget", MajorityType::Simple));
        s.start_voting(Timestamp::new(1_010), 300).unwrap();
        let result = s
            .complete(Timestamp::new(1_050), ballot(3), CloseReason::Manual)
            .unwrap();
        assert_eq!(result, SessionResult::Passed);
        let again = s.complete(Timestamp::new(1_060), ballot(0), CloseReason::Timeout);
        assert!(again.is_err());
        assert_eq!(s.result, Some(SessionResult::Passed));
        assert_eq!(s.close_reason, Some(CloseReason::Manual));
        assert_eq!(s.ended_at, Some(Timestamp::new(1_050)));
    }

    #[test]
    fn ended_at_is_strictly_after_started_at() {
        let mut s = session(SessionOptions::new("Budget", MajorityType::Simple));
        s.start_voting(Timestamp::new(1_010), 300).unwrap();
        s.complete(Timestamp::new(1_010), ballot(1), CloseReason::AllVoted)
            .unwrap();
        assert!(s.started_at.unwrap() < s.ended_at.unwrap());
    }

    #[test]
    fn auto_close_conditions() {
        let mut options = SessionOptions::new("Budget", MajorityType::Simple);
        options.auto_close_on_all_voted = true;
        options.auto_close_on_timeout = true;
        options.time_limit_secs = Some(30);
        let mut s = session(options);
        assert_eq!(s.auto_close_due(Timestamp::new(5_000), 5, 5), None);

        s.start_voting(Timestamp::new(1_000), 300).unwrap();
        assert_eq!(s.auto_close_due(Timestamp::new(1_001), 4, 5), None);
        assert_eq!(
            s.auto_close_due(Timestamp::new(1_001), 5, 5),
            Some(CloseReason::AllVoted)
        );
        assert_eq!(
            s.auto_close_due(Timestamp::new(1_030), 1, 5),
            Some(CloseReason::Timeout)
        );
        // Nobody eligible never counts as "everyone voted".
        assert_eq!(s.auto_close_due(Timestamp::new(1_001), 0, 0), None);
    }

    #[test]
    fn deadline_counts_from_the_second_voting_started_in() {
        let mut options = SessionOptions::new("Budget", MajorityType::Simple);
        options.auto_close_on_timeout = true;
        options.time_limit_secs = Some(1);
        let mut s = session(options);
        s.start_voting(Timestamp::new(1_000), 300).unwrap();

        assert_eq!(s.deadline(), Some(Timestamp::new(1_001)));
        assert_eq!(s.remaining_secs(Timestamp::new(1_000)), Some(1));
        assert_eq!(s.auto_close_due(Timestamp::new(1_000), 0, 5), None);
        assert_eq!(
            s.auto_close_due(Timestamp::new(1_001), 0, 5),
            Some(CloseReason::Timeout)
        );
    }

    #[test]
    fn disabled_auto_close_never_fires() {
        let mut s = session(SessionOptions::new("Budget", MajorityType::Simple));
        s.start_voting(Timestamp::new(1_000), 1).unwrap();
        assert_eq!(s.auto_close_due(Timestamp::new(9_999), 5, 5), None);
    }

    #[test]
    fn indications_only_during_introduction() {
        let mut s = session(SessionOptions::new("Budget", MajorityType::Simple));
        assert!(s.ensure_accepting_indications().is_ok());
        assert!(s.ensure_accepting_votes().is_err());
        s.start_voting(Timestamp::new(1_000), 300).unwrap();
        assert!(s.ensure_accepting_indications().is_err());
        assert!(s.ensure_accepting_votes().is_ok());
    }
}
