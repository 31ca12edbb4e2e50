//! gradebridge server entry point.
//!
//! Starts the Axum HTTP server and the background delivery and cleanup
//! ticks.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use gradebridge::api;
use gradebridge::app_state::{AccessPolicy, AppState};
use gradebridge::config::ServiceConfig;
use gradebridge::persistence::{
    DeliveryStore, Gradebook, MemoryStore, OperationLedger, PostgresStore,
};
use gradebridge::scheduler::{self, SchedulerConfig};
use gradebridge::service::GradeService;
use gradebridge::webhook::{DeliveryProcessor, Forwarder};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = ServiceConfig::from_env()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("invalid configuration")?;
    init_tracing(config.log_json);
    tracing::info!(addr = %config.listen_addr, webhook = ?config.webhook, "starting gradebridge");

    // Build persistence layer
    let (deliveries, ledger, gradebook): (
        Arc<dyn DeliveryStore>,
        Arc<dyn OperationLedger>,
        Arc<dyn Gradebook>,
    ) = if config.uses_memory_store() {
        tracing::warn!("using in-memory store; data is lost on exit");
        let store = MemoryStore::new();
        (
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store),
        )
    } else {
        let store = PostgresStore::connect(&config)
            .await
            .context("database connection failed")?;
        (
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store),
        )
    };

    // Build service layer
    let forwarder = Forwarder::new(
        Duration::from_secs(config.webhook_connect_timeout_secs),
        Duration::from_secs(config.webhook_request_timeout_secs),
    )
    .context("failed to build webhook client")?;
    let claim_lease = chrono::Duration::try_seconds(config.webhook_claim_lease_secs)
        .context("WEBHOOK_CLAIM_LEASE_SECS out of range")?;
    let processor = DeliveryProcessor::new(
        Arc::clone(&deliveries),
        forwarder,
        config.webhook.clone(),
        claim_lease,
    );
    let grade_service = Arc::new(GradeService::new(Arc::clone(&ledger), gradebook));

    // Background ticks
    let handles = scheduler::spawn(
        processor,
        ledger,
        SchedulerConfig {
            batch_size: config.webhook_batch_size,
            max_attempts: config.webhook_max_attempts,
            delivery_interval: Duration::from_secs(config.webhook_tick_secs.max(1)),
            cleanup_interval: Duration::from_secs(config.cleanup_tick_secs.max(1)),
            retention_days: config.operation_retention_days,
        },
    );

    // Build application state
    let app_state = AppState {
        grade_service,
        deliveries,
        access: AccessPolicy::new(config.manage_actors.clone()),
        webhooks_enabled: config.webhook.enabled,
        max_attempts: config.webhook_max_attempts,
    };

    // Build router
    let app = Router::new()
        .merge(api::build_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    handles.abort();
    tracing::info!("gradebridge stopped");
    Ok(())
}
