//! HTTP/JSON server for the Polity session coordinator.
//!
//! Provides endpoints for:
//! - Session lifecycle (introduction, voting, close)
//! - Binding votes, vote changes and indications
//! - Live tallies and eligible voters
//! - Election candidacies and ballots
//! - The change-request queue of an amendment
//! - Roster and change-request sync from the surrounding application
//! - Prometheus metrics
//!
//! Commands identify their caller through the [`ACTOR_HEADER`] header.

pub mod actor;
pub mod error;
pub mod handlers;
pub mod server;

pub use actor::{Actor, ACTOR_HEADER};
pub use error::RpcError;
pub use server::{router, RpcServer, RpcState};
