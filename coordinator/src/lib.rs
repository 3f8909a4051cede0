//! Orchestration layer of the Polity voting engine.
//!
//! [`SessionCoordinator`] is the external-facing entry point: it validates
//! callers against the event roster, serializes commands per session, drives
//! auto-close timers, and publishes a [`SessionEvent`] for every committed
//! change. A background fan-out task turns those events into notifications,
//! timeline entries and amendment hand-offs.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod fanout;
pub mod locks;
pub mod metrics;
pub mod timer;
pub mod tracing_spans;

pub use config::CoordinatorConfig;
pub use coordinator::{
    CastOutcome, Collaborators, Indications, LiveTally, SessionCoordinator, StartIntroduction,
};
pub use error::CoordinatorError;
pub use events::{EventBus, SessionEvent};
pub use fanout::{Downstream, RetryPolicy};
pub use metrics::VotingMetrics;
pub use timer::TickOutcome;
