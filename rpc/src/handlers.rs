//! RPC request handlers.

use crate::actor::Actor;
use crate::error::RpcError;
use crate::server::RpcState;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use polity_coordinator::{CastOutcome, LiveTally, StartIntroduction};
use polity_types::{
    AmendmentId, CandidateId, ChangeRequestId, ElectionId, EventId, SessionId, UserId,
};
use polity_voting::{Ballot, ChangeRequest, ElectionCandidate, EventRoster, Vote, VotingSession};
use serde::{Deserialize, Serialize};

type RpcResult<T> = Result<Json<T>, RpcError>;

// ── Sessions ─────────────────────────────────────────────────────────────

pub async fn start_introduction(
    State(state): State<RpcState>,
    Actor(actor): Actor,
    Json(request): Json<StartIntroduction>,
) -> Result<(StatusCode, Json<VotingSession>), RpcError> {
    let session = state
        .coordinator
        .start_introduction(request, &actor)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn get_session(
    State(state): State<RpcState>,
    Path(id): Path<SessionId>,
) -> RpcResult<VotingSession> {
    Ok(Json(state.coordinator.session(&id)?))
}

pub async fn start_voting(
    State(state): State<RpcState>,
    Path(id): Path<SessionId>,
    Actor(actor): Actor,
) -> RpcResult<VotingSession> {
    Ok(Json(state.coordinator.start_voting(&id, &actor).await?))
}

pub async fn close_voting(
    State(state): State<RpcState>,
    Path(id): Path<SessionId>,
    Actor(actor): Actor,
) -> RpcResult<VotingSession> {
    Ok(Json(state.coordinator.close_voting(&id, &actor).await?))
}

pub async fn live_tally(
    State(state): State<RpcState>,
    Path(id): Path<SessionId>,
) -> RpcResult<LiveTally> {
    Ok(Json(state.coordinator.live_tally(&id).await?))
}

// ── Votes ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct BallotRequest {
    pub ballot: Ballot,
}

pub async fn cast_vote(
    State(state): State<RpcState>,
    Path(id): Path<SessionId>,
    Actor(voter): Actor,
    Json(request): Json<BallotRequest>,
) -> Result<(StatusCode, Json<CastOutcome>), RpcError> {
    let outcome = state
        .coordinator
        .cast_vote(&id, &voter, request.ballot)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn change_vote(
    State(state): State<RpcState>,
    Path(id): Path<SessionId>,
    Actor(voter): Actor,
    Json(request): Json<BallotRequest>,
) -> RpcResult<Vote> {
    Ok(Json(
        state
            .coordinator
            .change_vote(&id, &voter, request.ballot)
            .await?,
    ))
}

pub async fn cast_indication(
    State(state): State<RpcState>,
    Path(id): Path<SessionId>,
    Actor(voter): Actor,
    Json(request): Json<BallotRequest>,
) -> RpcResult<Vote> {
    Ok(Json(
        state
            .coordinator
            .cast_indication(&id, &voter, request.ballot)
            .await?,
    ))
}

// ── Events ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct VotersResponse {
    pub event_id: EventId,
    pub voters: Vec<UserId>,
}

pub async fn eligible_voters(
    State(state): State<RpcState>,
    Path(event): Path<EventId>,
) -> RpcResult<VotersResponse> {
    let voters = state.coordinator.eligible_voters(&event)?;
    Ok(Json(VotersResponse {
        event_id: event,
        voters: voters.into_iter().collect(),
    }))
}

pub async fn event_sessions(
    State(state): State<RpcState>,
    Path(event): Path<EventId>,
) -> RpcResult<Vec<VotingSession>> {
    Ok(Json(state.coordinator.sessions_for_event(&event)?))
}

/// Roster sync from the application that owns participants and roles.
pub async fn sync_roster(
    State(state): State<RpcState>,
    Path(event): Path<EventId>,
    Json(roster): Json<EventRoster>,
) -> Result<StatusCode, RpcError> {
    if roster.event_id != event {
        return Err(RpcError::InvalidRequest(format!(
            "roster is for event {}, not {event}",
            roster.event_id
        )));
    }
    state.coordinator.sync_roster(&roster)?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Elections ────────────────────────────────────────────────────────────

/// Commands on an election name the event whose roster grants the rights.
#[derive(Debug, Deserialize)]
pub struct EventScoped {
    pub event_id: EventId,
}

pub async fn become_candidate(
    State(state): State<RpcState>,
    Path(election): Path<ElectionId>,
    Actor(user): Actor,
    Json(request): Json<EventScoped>,
) -> Result<(StatusCode, Json<ElectionCandidate>), RpcError> {
    let candidate = state
        .coordinator
        .become_candidate(&request.event_id, &election, &user)
        .await?;
    Ok((StatusCode::CREATED, Json(candidate)))
}

pub async fn accept_candidacy(
    State(state): State<RpcState>,
    Path((election, candidate)): Path<(ElectionId, CandidateId)>,
    Actor(user): Actor,
    Json(request): Json<EventScoped>,
) -> RpcResult<ElectionCandidate> {
    Ok(Json(
        state
            .coordinator
            .accept_candidacy(&request.event_id, &election, &candidate, &user)
            .await?,
    ))
}

pub async fn withdraw_candidacy(
    State(state): State<RpcState>,
    Path((election, candidate)): Path<(ElectionId, CandidateId)>,
    Actor(user): Actor,
    Json(request): Json<EventScoped>,
) -> RpcResult<ElectionCandidate> {
    Ok(Json(
        state
            .coordinator
            .withdraw_candidacy(&request.event_id, &election, &candidate, &user)
            .await?,
    ))
}

pub async fn ballot(
    State(state): State<RpcState>,
    Path(election): Path<ElectionId>,
) -> RpcResult<Vec<ElectionCandidate>> {
    Ok(Json(state.coordinator.ballot(&election)?))
}

// ── Change requests ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub amendment_id: AmendmentId,
    pub next: Option<ChangeRequestId>,
    pub change_requests: Vec<ChangeRequest>,
}

pub async fn change_requests(
    State(state): State<RpcState>,
    Path(amendment): Path<AmendmentId>,
) -> RpcResult<QueueResponse> {
    let change_requests = state.coordinator.change_requests(&amendment)?;
    let next = change_requests
        .iter()
        .find(|cr| cr.is_pending())
        .map(|cr| cr.id.clone());
    Ok(Json(QueueResponse {
        amendment_id: amendment,
        next,
        change_requests,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RegisterChangeRequest {
    pub id: ChangeRequestId,
    pub title: String,
    pub character_count: u32,
    #[serde(default)]
    pub voting_order: Option<u32>,
}

/// Change-request sync from the amendment workflow.
pub async fn register_change_request(
    State(state): State<RpcState>,
    Path(amendment): Path<AmendmentId>,
    Json(request): Json<RegisterChangeRequest>,
) -> RpcResult<ChangeRequest> {
    let mut cr = ChangeRequest::new(
        request.id,
        amendment,
        request.title,
        request.character_count,
    );
    cr.voting_order = request.voting_order;
    Ok(Json(state.coordinator.register_change_request(cr).await?))
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub event_id: EventId,
    pub order: Vec<ChangeRequestId>,
}

pub async fn reorder_change_requests(
    State(state): State<RpcState>,
    Path(amendment): Path<AmendmentId>,
    Actor(actor): Actor,
    Json(request): Json<ReorderRequest>,
) -> RpcResult<Vec<ChangeRequest>> {
    Ok(Json(
        state
            .coordinator
            .reorder_change_requests(&request.event_id, &amendment, &request.order, &actor)
            .await?,
    ))
}

pub async fn activate_change_request(
    State(state): State<RpcState>,
    Path((amendment, change_request)): Path<(AmendmentId, ChangeRequestId)>,
    Actor(actor): Actor,
    Json(request): Json<EventScoped>,
) -> RpcResult<ChangeRequest> {
    Ok(Json(
        state
            .coordinator
            .activate_change_request(&request.event_id, &amendment, &change_request, &actor)
            .await?,
    ))
}

// ── Telemetry ────────────────────────────────────────────────────────────

pub async fn metrics(State(state): State<RpcState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.coordinator.metrics().encode_text(),
    )
}

pub async fn health() -> &'static str {
    "ok"
}
