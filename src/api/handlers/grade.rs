//! Grade-apply and capability handlers.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;

use crate::api::auth::Principal;
use crate::api::dto::{CapabilitiesResponse, CapabilityFlags};
use crate::app_state::AppState;
use crate::domain::{ApplyGradeRequest, ApplyGradeResult};
use crate::error::{ErrorResponse, ServiceError};

/// `POST /grades`: apply a grade idempotently.
///
/// # Errors
///
/// Returns [`ServiceError`] on missing capability, unknown item or user,
/// or a rejected grade.
#[utoipa::path(
    post,
    path = "/api/v1/grades",
    tag = "Grades",
    summary = "Apply a grade",
    description = "Writes a grade for a user on a grade item. Repeating a request with the same non-empty `client_request_id` returns `already_applied` without writing again.",
    request_body = ApplyGradeRequest,
    params(("X-Actor-Id" = i64, Header, description = "Calling actor")),
    responses(
        (status = 200, description = "Grade applied or already applied", body = ApplyGradeResult),
        (status = 400, description = "Invalid grade or timestamp", body = ErrorResponse),
        (status = 401, description = "Missing actor", body = ErrorResponse),
        (status = 403, description = "Missing manage capability", body = ErrorResponse),
        (status = 404, description = "Grade item or user not found", body = ErrorResponse),
    )
)]
pub async fn update_grade(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<ApplyGradeRequest>,
) -> Result<Json<ApplyGradeResult>, ServiceError> {
    state.access.require_manage(&principal)?;
    let result = state
        .grade_service
        .apply_grade(&req, principal.actor_id)
        .await?;
    Ok(Json(result))
}

/// `GET /capabilities`: report what the caller may do.
///
/// # Errors
///
/// Returns [`ServiceError::Unauthorized`] for a malformed actor header.
#[utoipa::path(
    get,
    path = "/api/v1/capabilities",
    tag = "Grades",
    summary = "Caller capabilities",
    description = "Reports whether outbound delivery is enabled and which capabilities the caller holds. Anonymous callers get none.",
    responses(
        (status = 200, description = "Capability report", body = CapabilitiesResponse),
        (status = 401, description = "Malformed actor header", body = ErrorResponse),
    )
)]
pub async fn get_capabilities(
    State(state): State<AppState>,
    principal: Option<Principal>,
) -> Result<impl IntoResponse, ServiceError> {
    let manage = principal.is_some_and(|p| state.access.can_manage(p.actor_id));
    Ok(Json(CapabilitiesResponse {
        enabled: state.webhooks_enabled,
        capabilities: CapabilityFlags { manage },
        server_time: Utc::now(),
    }))
}

/// Grade routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/grades", post(update_grade))
        .route("/capabilities", get(get_capabilities))
}
