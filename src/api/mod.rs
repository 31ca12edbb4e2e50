//! REST API layer: caller identification, route handlers, DTOs, and router
//! composition.
//!
//! Resource endpoints are mounted under `/api/v1`; system endpoints at the
//! root.

pub mod auth;
pub mod dto;
pub mod handlers;
pub mod openapi;

use axum::Router;

use crate::app_state::AppState;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(openapi::swagger_router());

    router
}
