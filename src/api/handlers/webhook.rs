//! Outbound event intake and delivery administration.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::auth::Principal;
use crate::api::dto::{
    DeliveryDto, DeliveryListQuery, DeliveryListResponse, EnqueueEventRequest,
    EnqueueEventResponse, PaginationParams,
};
use crate::app_state::AppState;
use crate::error::{ErrorResponse, ServiceError};

/// `POST /events`: queue an event for delivery.
///
/// # Errors
///
/// Returns [`ServiceError`] on missing capability, an empty event tag, or a
/// storage failure.
#[utoipa::path(
    post,
    path = "/api/v1/events",
    tag = "Webhooks",
    summary = "Enqueue an outbound event",
    description = "Stores the event with zero attempts. The delivery tick forwards it to the configured platform.",
    request_body = EnqueueEventRequest,
    params(("X-Actor-Id" = i64, Header, description = "Calling actor")),
    responses(
        (status = 201, description = "Event queued", body = EnqueueEventResponse),
        (status = 400, description = "Empty event tag", body = ErrorResponse),
        (status = 403, description = "Missing manage capability", body = ErrorResponse),
    )
)]
pub async fn enqueue_event(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<EnqueueEventRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    state.access.require_manage(&principal)?;
    let event = req.event.trim();
    if event.is_empty() {
        return Err(ServiceError::InvalidRequest("event must not be empty".into()));
    }
    let delivery_id = state.deliveries.enqueue(event, &req.payload).await?;
    tracing::info!(delivery_id, event, actor_id = principal.actor_id, "event queued");
    Ok((StatusCode::CREATED, Json(EnqueueEventResponse { delivery_id })))
}

/// `GET /webhooks`: list deliveries, newest first.
///
/// # Errors
///
/// Returns [`ServiceError`] on missing capability or a storage failure.
#[utoipa::path(
    get,
    path = "/api/v1/webhooks",
    tag = "Webhooks",
    summary = "List deliveries",
    description = "Paginated delivery list, optionally restricted to pending or dead-lettered rows.",
    params(DeliveryListQuery, ("X-Actor-Id" = i64, Header, description = "Calling actor")),
    responses(
        (status = 200, description = "Delivery page", body = DeliveryListResponse),
        (status = 403, description = "Missing manage capability", body = ErrorResponse),
    )
)]
pub async fn list_deliveries(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<DeliveryListQuery>,
) -> Result<Json<DeliveryListResponse>, ServiceError> {
    state.access.require_manage(&principal)?;
    let defaults = PaginationParams::default();
    let params = PaginationParams {
        page: query.page.unwrap_or(defaults.page),
        per_page: query.per_page.unwrap_or(defaults.per_page),
    }
    .clamped();

    let page = state
        .deliveries
        .list(
            query.filter,
            state.max_attempts,
            params.offset(),
            u64::from(params.per_page),
        )
        .await?;

    Ok(Json(DeliveryListResponse {
        data: page
            .items
            .into_iter()
            .map(|d| DeliveryDto::from_delivery(d, state.max_attempts))
            .collect(),
        pagination: params.meta(page.total),
    }))
}

/// `GET /webhooks/{id}`: one delivery.
///
/// # Errors
///
/// Returns [`ServiceError::DeliveryNotFound`] for an unknown id.
#[utoipa::path(
    get,
    path = "/api/v1/webhooks/{id}",
    tag = "Webhooks",
    summary = "Get a delivery",
    params(
        ("id" = i64, Path, description = "Delivery id"),
        ("X-Actor-Id" = i64, Header, description = "Calling actor"),
    ),
    responses(
        (status = 200, description = "Delivery", body = DeliveryDto),
        (status = 404, description = "Unknown delivery", body = ErrorResponse),
    )
)]
pub async fn get_delivery(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<Json<DeliveryDto>, ServiceError> {
    state.access.require_manage(&principal)?;
    let delivery = state
        .deliveries
        .get(id)
        .await?
        .ok_or(ServiceError::DeliveryNotFound(id))?;
    Ok(Json(DeliveryDto::from_delivery(delivery, state.max_attempts)))
}

/// `POST /webhooks/{id}/requeue`: reset attempts so the delivery is retried.
///
/// # Errors
///
/// Returns [`ServiceError::DeliveryNotFound`] for an unknown id.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/{id}/requeue",
    tag = "Webhooks",
    summary = "Requeue a delivery",
    description = "Sets attempts back to zero and drops any claim. Used to revive dead-lettered deliveries.",
    params(
        ("id" = i64, Path, description = "Delivery id"),
        ("X-Actor-Id" = i64, Header, description = "Calling actor"),
    ),
    responses(
        (status = 200, description = "Delivery after requeue", body = DeliveryDto),
        (status = 404, description = "Unknown delivery", body = ErrorResponse),
    )
)]
pub async fn requeue_delivery(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<Json<DeliveryDto>, ServiceError> {
    state.access.require_manage(&principal)?;
    state.deliveries.requeue(id).await?;
    tracing::info!(delivery_id = id, actor_id = principal.actor_id, "delivery requeued");
    let delivery = state
        .deliveries
        .get(id)
        .await?
        .ok_or(ServiceError::DeliveryNotFound(id))?;
    Ok(Json(DeliveryDto::from_delivery(delivery, state.max_attempts)))
}

/// Event and delivery routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/events", post(enqueue_event))
        .route("/webhooks", get(list_deliveries))
        .route("/webhooks/{id}", get(get_delivery))
        .route("/webhooks/{id}/requeue", post(requeue_delivery))
}
