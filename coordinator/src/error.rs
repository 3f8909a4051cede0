use polity_store::StoreError;
use polity_voting::{Phase, VotingError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Voting(#[from] VotingError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("config error: {0}")]
    Config(String),

    #[error("coordinator is shutting down")]
    ShuttingDown,
}

impl CoordinatorError {
    /// Map store-level races onto the engine errors callers act on.
    ///
    /// A lost compare-and-set means another writer moved the session first;
    /// to the caller that is an invalid transition from the phase it saw.
    pub(crate) fn from_store(err: StoreError, phase: Phase) -> Self {
        match err {
            StoreError::ActiveSessionExists {
                agenda_item,
                active,
            } => VotingError::SessionConflict {
                agenda_item,
                active,
            }
            .into(),
            StoreError::VersionMismatch { .. } => VotingError::InvalidPhaseTransition {
                action: "commit a concurrent update",
                phase,
            }
            .into(),
            StoreError::NotFound(what) => VotingError::NotFound(what).into(),
            other => other.into(),
        }
    }

    /// The engine error behind this failure, if there is one.
    pub fn voting(&self) -> Option<&VotingError> {
        match self {
            Self::Voting(e) => Some(e),
            _ => None,
        }
    }
}
