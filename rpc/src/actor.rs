//! Caller identity.
//!
//! Authentication happens in front of this server; the gateway forwards the
//! authenticated user id in [`ACTOR_HEADER`]. Rights are then checked by the
//! coordinator against the event roster.

use crate::error::RpcError;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use polity_types::UserId;

pub const ACTOR_HEADER: &str = "x-polity-user";

/// The user issuing a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor(pub UserId);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = RpcError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ACTOR_HEADER)
            .ok_or(RpcError::MissingActor)?
            .to_str()
            .map_err(|_| RpcError::MissingActor)?
            .trim();
        if raw.is_empty() {
            return Err(RpcError::MissingActor);
        }
        Ok(Self(UserId::new(raw)))
    }
}
