//! Structured voting for organizational events.
//!
//! Sessions move through three phases: Introduction → Voting → Completed.
//! Indication votes may be cast during Introduction and are advisory only;
//! binding votes are admitted during Voting and tallied at closure.
//!
//! Amendment ballots are preceded by an ordered queue of change-request
//! sub-ballots. Elections replace accept/reject/abstain with a candidate
//! choice and are decided by plurality.
//!
//! Everything in this crate is pure state and validation, plus the traits
//! through which the coordinator reaches time, notifications, the timeline
//! and the amendment workflow. Locking and timers live in the coordinator.

pub mod change_request;
pub mod election;
pub mod eligibility;
pub mod error;
pub mod ports;
pub mod session;
pub mod tally;
pub mod votes;

pub use change_request::{voting_order_cmp, ChangeRequest, ChangeRequestQueue};
pub use election::{CandidateRoster, CandidateStatus, ElectionCandidate, ElectionTally};
pub use eligibility::{Action, ActionRight, EventRoster, Resource, Role};
pub use error::VotingError;
pub use ports::{
    AmendmentWorkflow, Clock, DownstreamError, Notification, Notifier, SystemClock, TimelineEntry,
    TimelineSink,
};
pub use session::{
    CloseReason, Phase, SessionOptions, Visibility, VotingSession, VotingType,
    DEFAULT_TIME_LIMIT_SECS,
};
pub use tally::{
    decide, plurality, tally, tally_with_policy, MajorityBase, MajorityType, Plurality,
    SessionResult, SessionTally, Tally, TallyPolicy, ZeroEligiblePolicy,
};
pub use votes::{Ballot, Vote, VoteBook, VoteValue};
