//! RPC error types and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use polity_coordinator::CoordinatorError;
use polity_voting::VotingError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error("missing or malformed {} header", crate::actor::ACTOR_HEADER)]
    MissingActor,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("server error: {0}")]
    Server(String),
}

impl From<VotingError> for RpcError {
    fn from(e: VotingError) -> Self {
        Self::Coordinator(e.into())
    }
}

/// Body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl RpcError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Coordinator(CoordinatorError::Voting(e)) => match e {
                VotingError::PermissionDenied(_) => StatusCode::FORBIDDEN,
                VotingError::SessionConflict { .. }
                | VotingError::DuplicateVote(_)
                | VotingError::InvalidPhaseTransition { .. }
                | VotingError::QueueOrderingViolation(_)
                | VotingError::AlreadyCandidate(_) => StatusCode::CONFLICT,
                VotingError::InvalidBallot(_) | VotingError::NoEligibleVoters(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                VotingError::NotFound(_) => StatusCode::NOT_FOUND,
            },
            Self::Coordinator(CoordinatorError::ShuttingDown) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Coordinator(_) | Self::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MissingActor => StatusCode::UNAUTHORIZED,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Coordinator(CoordinatorError::Voting(e)) => match e {
                VotingError::PermissionDenied(_) => "permission_denied",
                VotingError::InvalidPhaseTransition { .. } => "invalid_phase_transition",
                VotingError::DuplicateVote(_) => "duplicate_vote",
                VotingError::SessionConflict { .. } => "session_conflict",
                VotingError::QueueOrderingViolation(_) => "queue_ordering_violation",
                VotingError::NoEligibleVoters(_) => "no_eligible_voters",
                VotingError::InvalidBallot(_) => "invalid_ballot",
                VotingError::AlreadyCandidate(_) => "already_candidate",
                VotingError::NotFound(_) => "not_found",
            },
            Self::Coordinator(CoordinatorError::ShuttingDown) => "shutting_down",
            Self::Coordinator(_) | Self::Server(_) => "internal",
            Self::MissingActor => "missing_actor",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
