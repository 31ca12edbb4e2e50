//! Caller identification.
//!
//! The fronting host authenticates users and forwards the actor id in the
//! `X-Actor-Id` header. This service trusts that header and only maps it
//! to capabilities (see [`crate::app_state::AccessPolicy`]).

use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::HeaderMap;
use axum::http::request::Parts;

use crate::error::ServiceError;

/// Header carrying the authenticated actor id.
pub const ACTOR_HEADER: &str = "X-Actor-Id";

/// Authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    /// Host user id of the caller.
    pub actor_id: i64,
}

fn parse_actor(headers: &HeaderMap) -> Result<Option<Principal>, ServiceError> {
    let Some(value) = headers.get(ACTOR_HEADER) else {
        return Ok(None);
    };
    let actor_id = value
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| ServiceError::Unauthorized(format!("invalid {ACTOR_HEADER} header")))?;
    Ok(Some(Principal { actor_id }))
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parse_actor(&parts.headers)?
            .ok_or_else(|| ServiceError::Unauthorized(format!("missing {ACTOR_HEADER} header")))
    }
}

impl<S> OptionalFromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        parse_actor(&parts.headers)
    }
}
