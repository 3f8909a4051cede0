//! Fundamental types for the Polity voting engine.
//!
//! This crate defines the identifiers and timestamps shared by every other
//! crate in the workspace. It deliberately carries no behaviour beyond
//! construction, formatting and ordering.

pub mod id;
pub mod time;

pub use id::{
    AgendaItemId, AmendmentId, CandidateId, ChangeRequestId, ElectionId, EventId, RoleId,
    SessionId, TargetId, UserId, VoteId,
};
pub use time::Timestamp;
