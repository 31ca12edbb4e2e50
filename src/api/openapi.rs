//! `OpenAPI` document for the REST surface.

use utoipa::OpenApi;

use crate::api::dto::{
    CapabilitiesResponse, CapabilityFlags, DeliveryDto, DeliveryListResponse, DeliveryState,
    EnqueueEventRequest, EnqueueEventResponse, PaginationMeta,
};
use crate::api::handlers::system::{HealthResponse, PingResponse};
use crate::api::handlers::{grade, system, webhook};
use crate::domain::{ApplyGradeRequest, ApplyGradeResult, ApplyStatus, DeliveryFilter};
use crate::error::{ErrorBody, ErrorResponse};

/// Generated `OpenAPI` document.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "gradebridge",
        description = "Signed webhook forwarding and idempotent grade apply"
    ),
    paths(
        grade::update_grade,
        grade::get_capabilities,
        webhook::enqueue_event,
        webhook::list_deliveries,
        webhook::get_delivery,
        webhook::requeue_delivery,
        system::health_handler,
        system::ping_handler,
    ),
    components(schemas(
        ApplyGradeRequest,
        ApplyGradeResult,
        ApplyStatus,
        CapabilitiesResponse,
        CapabilityFlags,
        EnqueueEventRequest,
        EnqueueEventResponse,
        DeliveryDto,
        DeliveryState,
        DeliveryFilter,
        DeliveryListResponse,
        PaginationMeta,
        HealthResponse,
        PingResponse,
        ErrorResponse,
        ErrorBody,
    )),
    tags(
        (name = "Grades", description = "Idempotent grade apply and capabilities"),
        (name = "Webhooks", description = "Outbound event queue administration"),
        (name = "System", description = "Health and connectivity"),
    )
)]
pub struct ApiDoc;

/// Swagger UI at `/docs`, serving the document at `/api-doc/openapi.json`.
#[cfg(feature = "swagger-ui")]
pub fn swagger_router() -> axum::Router<crate::app_state::AppState> {
    axum::Router::new().merge(
        utoipa_swagger_ui::SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()),
    )
}
