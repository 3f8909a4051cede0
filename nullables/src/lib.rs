//! Nullable infrastructure for deterministic testing.
//!
//! Every collaborator the coordinator talks to (clock, notifier, timeline,
//! amendment workflow) is abstracted behind a trait. This crate provides
//! test-friendly implementations that:
//! - Return deterministic values
//! - Record every call for later assertions
//! - Can be told to fail, to exercise retry and no-rollback paths
//!
//! Usage: hand these to the coordinator in place of the real sinks.

pub mod clock;
pub mod failure;
pub mod sinks;

pub use clock::NullClock;
pub use failure::FailureInjector;
pub use sinks::{ForwardedResult, RecordingAmendmentWorkflow, RecordingNotifier, RecordingTimeline};
