//! Pre-built [`tracing::Span`] constructors for coordinator commands.
//!
//! Consistent span names and field sets make it easy to filter and
//! correlate everything that happened to one session.

use tracing::{info_span, Span};

/// Span covering one mutating command on a session.
pub fn session_command_span(command: &'static str, session: &str) -> Span {
    info_span!("session_command", command, session = %session)
}

/// Span covering the opening of a session on an agenda item.
pub fn start_introduction_span(event: &str, agenda_item: &str) -> Span {
    info_span!("start_introduction", event = %event, agenda_item = %agenda_item)
}

/// Span covering a change to an amendment's change-request queue.
pub fn queue_command_span(command: &'static str, amendment: &str) -> Span {
    info_span!("queue_command", command, amendment = %amendment)
}

/// Span covering a candidacy change in an election.
pub fn candidacy_span(command: &'static str, election: &str) -> Span {
    info_span!("candidacy", command, election = %election)
}

/// Span covering one timer evaluation of a session.
pub fn timer_tick_span(session: &str) -> Span {
    info_span!("timer_tick", session = %session)
}

/// Span covering the fan-out of one session event.
pub fn fanout_span(event: &'static str) -> Span {
    info_span!("fanout", event)
}
