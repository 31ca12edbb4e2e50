//! Periodic background work: the delivery tick and the ledger cleanup tick.
//!
//! Each tick is a short bounded unit of work. Stopping the tasks (dropping
//! or aborting the handles) is the only cancellation point.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::persistence::{OperationLedger, StoreError};
use crate::webhook::{BatchReport, DeliveryProcessor};

/// Scheduling parameters for the background tasks.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum deliveries per tick.
    pub batch_size: u32,
    /// Attempt ceiling per delivery.
    pub max_attempts: i32,
    /// Interval between delivery ticks.
    pub delivery_interval: Duration,
    /// Interval between cleanup ticks.
    pub cleanup_interval: Duration,
    /// Ledger retention in days; 0 disables cleanup.
    pub retention_days: u64,
}

/// Handles of the spawned background tasks.
#[derive(Debug)]
pub struct SchedulerHandles {
    /// Delivery tick task.
    pub delivery: JoinHandle<()>,
    /// Cleanup tick task, absent when retention is disabled.
    pub cleanup: Option<JoinHandle<()>>,
}

impl SchedulerHandles {
    /// Aborts every task.
    pub fn abort(&self) {
        self.delivery.abort();
        if let Some(cleanup) = &self.cleanup {
            cleanup.abort();
        }
    }
}

/// Runs one delivery tick and logs its result.
///
/// # Errors
///
/// Returns the [`StoreError`] that interrupted the batch.
pub async fn run_delivery_tick(
    processor: &DeliveryProcessor,
    batch_size: u32,
    max_attempts: i32,
) -> Result<BatchReport, StoreError> {
    let report = processor.process_batch(batch_size, max_attempts).await?;
    if report.attempted > 0 {
        tracing::info!(attempted = report.attempted, "delivery tick finished");
    } else {
        tracing::debug!(stopped_on = ?report.stopped_on, "delivery tick found no work");
    }
    Ok(report)
}

/// Deletes ledger records older than `retention_days`.
///
/// # Errors
///
/// Returns a [`StoreError`] when the purge fails.
pub async fn run_cleanup_tick(
    ledger: &dyn OperationLedger,
    retention_days: u64,
) -> Result<u64, StoreError> {
    let cutoff = i64::try_from(retention_days)
        .ok()
        .and_then(chrono::Duration::try_days)
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let purged = ledger.purge_older_than(cutoff).await?;
    if purged > 0 {
        tracing::info!(purged, retention_days, "purged old operation records");
    }
    Ok(purged)
}

/// Spawns the background tasks on the current tokio runtime.
#[must_use]
pub fn spawn(
    processor: DeliveryProcessor,
    ledger: Arc<dyn OperationLedger>,
    config: SchedulerConfig,
) -> SchedulerHandles {
    let delivery = {
        let config = config.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.delivery_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) =
                    run_delivery_tick(&processor, config.batch_size, config.max_attempts).await
                {
                    tracing::error!(error = %e, "delivery tick failed");
                }
            }
        })
    };

    let cleanup = (config.retention_days > 0).then(|| {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.cleanup_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = run_cleanup_tick(ledger.as_ref(), config.retention_days).await {
                    tracing::error!(error = %e, "cleanup tick failed");
                }
            }
        })
    });

    tracing::info!(
        batch_size = config.batch_size,
        max_attempts = config.max_attempts,
        delivery_interval_secs = config.delivery_interval.as_secs(),
        "scheduler started"
    );

    SchedulerHandles { delivery, cleanup }
}
