//! Grade and capability DTOs.
//!
//! The grade request and result bodies are the domain types
//! [`ApplyGradeRequest`](crate::domain::ApplyGradeRequest) and
//! [`ApplyGradeResult`](crate::domain::ApplyGradeResult) serialized as is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Capability flags for the calling actor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct CapabilityFlags {
    /// May apply grades, enqueue events and requeue deliveries.
    pub manage: bool,
}

/// Response body of `GET /api/v1/capabilities`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CapabilitiesResponse {
    /// Whether outbound delivery is switched on.
    pub enabled: bool,
    /// Caller capabilities.
    pub capabilities: CapabilityFlags,
    /// Current server time.
    pub server_time: DateTime<Utc>,
}
