//! Delivery processor: one claim, sign, forward, record cycle at a time.

use std::sync::Arc;

use chrono::Duration;

use super::forwarder::Forwarder;
use crate::config::WebhookSettings;
use crate::persistence::{DeliveryStore, StoreError};

/// Result of one processing cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Delivery disabled or base URL / secret missing. No row was touched.
    NotConfigured,
    /// No eligible delivery.
    Idle,
    /// An HTTP response was received and recorded, whatever its status.
    Delivered {
        /// Delivery id.
        delivery_id: i64,
        /// Response status.
        http_status: u16,
    },
    /// No HTTP response; the failure was recorded as an attempt.
    TransportFailed {
        /// Delivery id.
        delivery_id: i64,
        /// Transport error text, as stored.
        error: String,
    },
    /// Another processor recorded this attempt first.
    Superseded {
        /// Delivery id.
        delivery_id: i64,
    },
}

impl ProcessOutcome {
    /// `true` when an HTTP exchange completed and was recorded. The batch
    /// driver keeps going only on `true`.
    #[must_use]
    pub const fn attempted(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Summary of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Cycles that returned [`ProcessOutcome::attempted`].
    pub attempted: u32,
    /// Outcome of the cycle that ended the batch, if it ended early.
    pub stopped_on: Option<ProcessOutcome>,
}

/// Pulls eligible deliveries from the store and forwards them.
#[derive(Debug, Clone)]
pub struct DeliveryProcessor {
    store: Arc<dyn DeliveryStore>,
    forwarder: Forwarder,
    settings: WebhookSettings,
    claim_lease: Duration,
}

impl DeliveryProcessor {
    /// Creates a processor with explicit settings.
    #[must_use]
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        forwarder: Forwarder,
        settings: WebhookSettings,
        claim_lease: Duration,
    ) -> Self {
        Self {
            store,
            forwarder,
            settings,
            claim_lease,
        }
    }

    /// Runs one cycle against deliveries with `attempts < max_attempts`.
    ///
    /// Configuration is checked before anything is claimed, so missing
    /// credentials never burn an attempt.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the queue cannot be read or updated.
    pub async fn process_one(&self, max_attempts: i32) -> Result<ProcessOutcome, StoreError> {
        let Some((endpoint, secret)) = self.settings.delivery_target() else {
            tracing::debug!("webhook delivery not configured; skipping");
            return Ok(ProcessOutcome::NotConfigured);
        };

        let Some(delivery) = self
            .store
            .fetch_next_eligible(max_attempts, self.claim_lease)
            .await?
        else {
            return Ok(ProcessOutcome::Idle);
        };

        let delivery_id = delivery.id;
        let attempt = delivery.attempts.saturating_add(1);

        match self
            .forwarder
            .deliver(&endpoint, secret, &delivery.payload)
            .await
        {
            Ok(outcome) => {
                let recorded = self
                    .store
                    .record_outcome(
                        delivery_id,
                        delivery.attempts,
                        i32::from(outcome.http_status),
                        &outcome.body,
                    )
                    .await?;
                if !recorded {
                    tracing::warn!(delivery_id, "delivery attempt already recorded elsewhere");
                    return Ok(ProcessOutcome::Superseded { delivery_id });
                }
                if outcome.is_success() {
                    tracing::info!(
                        delivery_id,
                        event = %delivery.event,
                        http_status = outcome.http_status,
                        attempt,
                        "webhook delivered"
                    );
                } else {
                    tracing::warn!(
                        delivery_id,
                        event = %delivery.event,
                        http_status = outcome.http_status,
                        attempt,
                        dead_lettered = attempt >= max_attempts,
                        "webhook rejected by endpoint"
                    );
                }
                Ok(ProcessOutcome::Delivered {
                    delivery_id,
                    http_status: outcome.http_status,
                })
            }
            Err(err) => {
                let error = err.to_string();
                let recorded = self
                    .store
                    .record_outcome(delivery_id, delivery.attempts, 0, &error)
                    .await?;
                if !recorded {
                    tracing::warn!(delivery_id, "delivery attempt already recorded elsewhere");
                    return Ok(ProcessOutcome::Superseded { delivery_id });
                }
                tracing::warn!(
                    delivery_id,
                    event = %delivery.event,
                    attempt,
                    dead_lettered = attempt >= max_attempts,
                    error = %error,
                    "webhook transport failure"
                );
                Ok(ProcessOutcome::TransportFailed { delivery_id, error })
            }
        }
    }

    /// Calls [`process_one`](Self::process_one) up to `batch_size` times,
    /// stopping at the first cycle that did not complete an HTTP exchange.
    ///
    /// # Errors
    ///
    /// Returns the first [`StoreError`] hit; earlier cycles stay recorded.
    pub async fn process_batch(
        &self,
        batch_size: u32,
        max_attempts: i32,
    ) -> Result<BatchReport, StoreError> {
        let mut attempted = 0;
        while attempted < batch_size {
            let outcome = self.process_one(max_attempts).await?;
            if !outcome.attempted() {
                return Ok(BatchReport {
                    attempted,
                    stopped_on: Some(outcome),
                });
            }
            attempted += 1;
        }
        Ok(BatchReport {
            attempted,
            stopped_on: None,
        })
    }
}
