use polity_types::{AgendaItemId, SessionId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("session {active} on agenda item {agenda_item} is still active")]
    ActiveSessionExists {
        agenda_item: AgendaItemId,
        active: SessionId,
    },

    #[error("session {session} was modified concurrently (expected version {expected}, found {found})")]
    VersionMismatch {
        session: SessionId,
        expected: u64,
        found: u64,
    },

    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}
