//! Outbound event and delivery DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::common_dto::PaginationMeta;
use crate::domain::{DeliveryFilter, WebhookDelivery};

/// Request body of `POST /api/v1/events`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnqueueEventRequest {
    /// Event tag, e.g. `"grade.updated"`.
    pub event: String,
    /// JSON document forwarded verbatim.
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
}

/// Response body of `POST /api/v1/events`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct EnqueueEventResponse {
    /// Id of the queued delivery.
    pub delivery_id: i64,
}

/// Query string of `GET /api/v1/webhooks`.
#[derive(Debug, Clone, Copy, Default, Deserialize, IntoParams)]
pub struct DeliveryListQuery {
    /// `all` (default), `pending` or `dead_lettered`.
    #[serde(default)]
    #[param(value_type = Option<String>)]
    pub filter: DeliveryFilter,
    /// Page number (1-indexed).
    pub page: Option<u32>,
    /// Items per page (max 100).
    pub per_page: Option<u32>,
}

/// Delivery state as shown to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Still eligible for another attempt.
    Pending,
    /// Attempt ceiling reached.
    DeadLettered,
}

/// One delivery row.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeliveryDto {
    /// Delivery id.
    pub id: i64,
    /// Event tag.
    pub event: String,
    /// Forwarded document.
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    /// Attempts made so far.
    pub attempts: i32,
    /// Status of the last attempt (0 = none or transport failure).
    pub last_http_status: i32,
    /// Body or error text of the last attempt.
    pub last_response_body: String,
    /// Derived state under the configured ceiling.
    pub state: DeliveryState,
    /// Enqueue time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl DeliveryDto {
    /// Converts a stored delivery, classifying it against `max_attempts`.
    #[must_use]
    pub fn from_delivery(delivery: WebhookDelivery, max_attempts: i32) -> Self {
        let state = if delivery.is_dead_lettered(max_attempts) {
            DeliveryState::DeadLettered
        } else {
            DeliveryState::Pending
        };
        Self {
            id: delivery.id,
            event: delivery.event,
            payload: delivery.payload,
            attempts: delivery.attempts,
            last_http_status: delivery.last_http_status,
            last_response_body: delivery.last_response_body,
            state,
            created_at: delivery.created_at,
            updated_at: delivery.updated_at,
        }
    }
}

/// Response body of `GET /api/v1/webhooks`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeliveryListResponse {
    /// Deliveries on this page, newest first.
    pub data: Vec<DeliveryDto>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}
