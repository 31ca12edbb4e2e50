//! Outbound webhook delivery rows and their listing filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Default attempt ceiling for a single delivery.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// One queued event to be forwarded to the external platform.
///
/// Created by [`crate::persistence::DeliveryStore::enqueue`] with
/// `attempts = 0`. Only the delivery processor mutates it afterwards, and
/// only through `record_outcome`, which bumps `attempts` by exactly one.
/// The payload is never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookDelivery {
    /// Store-assigned identifier (always > 0).
    pub id: i64,
    /// Event tag, e.g. `"grade.updated"`.
    pub event: String,
    /// JSON document forwarded verbatim as the request body.
    pub payload: serde_json::Value,
    /// Enqueue timestamp.
    pub created_at: DateTime<Utc>,
    /// Attempts made so far.
    pub attempts: i32,
    /// HTTP status of the last attempt; 0 when never attempted or when the
    /// last attempt failed at the transport level.
    pub last_http_status: i32,
    /// Response body (or transport error text) of the last attempt.
    pub last_response_body: String,
    /// Processor claim lease. `None` when unclaimed.
    pub claimed_until: Option<DateTime<Utc>>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl WebhookDelivery {
    /// Returns `true` if the delivery may still be attempted under the
    /// given ceiling.
    #[must_use]
    pub const fn is_eligible(&self, max_attempts: i32) -> bool {
        self.attempts < max_attempts
    }

    /// Returns `true` once the attempt ceiling has been reached.
    #[must_use]
    pub const fn is_dead_lettered(&self, max_attempts: i32) -> bool {
        !self.is_eligible(max_attempts)
    }

    /// Returns `true` if another processor holds an unexpired claim.
    #[must_use]
    pub fn is_claimed_at(&self, now: DateTime<Utc>) -> bool {
        self.claimed_until.is_some_and(|until| until > now)
    }
}

/// Listing filter for the admin delivery view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryFilter {
    /// Every delivery.
    #[default]
    All,
    /// Deliveries still below the attempt ceiling.
    Pending,
    /// Deliveries that exhausted their attempts.
    DeadLettered,
}

impl DeliveryFilter {
    /// Returns `true` if `delivery` belongs in this view.
    #[must_use]
    pub const fn matches(self, delivery: &WebhookDelivery, max_attempts: i32) -> bool {
        match self {
            Self::All => true,
            Self::Pending => delivery.is_eligible(max_attempts),
            Self::DeadLettered => delivery.is_dead_lettered(max_attempts),
        }
    }
}

/// One page of deliveries plus the unpaged total.
#[derive(Debug, Clone)]
pub struct DeliveryPage {
    /// Deliveries on this page, newest first.
    pub items: Vec<WebhookDelivery>,
    /// Total number of deliveries matching the filter.
    pub total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn delivery(attempts: i32) -> WebhookDelivery {
        let now = Utc::now();
        WebhookDelivery {
            id: 1,
            event: "test.event".to_string(),
            payload: serde_json::json!({"x": 1}),
            created_at: now,
            attempts,
            last_http_status: 0,
            last_response_body: String::new(),
            claimed_until: None,
            updated_at: now,
        }
    }

    #[test]
    fn eligibility_follows_ceiling() {
        assert!(delivery(0).is_eligible(1));
        assert!(!delivery(1).is_eligible(1));
        assert!(delivery(4).is_eligible(DEFAULT_MAX_ATTEMPTS));
        assert!(delivery(5).is_dead_lettered(DEFAULT_MAX_ATTEMPTS));
    }

    #[test]
    fn claim_expires() {
        let now = Utc::now();
        let mut d = delivery(0);
        assert!(!d.is_claimed_at(now));

        d.claimed_until = Some(now + Duration::seconds(30));
        assert!(d.is_claimed_at(now));
        assert!(!d.is_claimed_at(now + Duration::seconds(31)));
    }

    #[test]
    fn filter_partitions_rows() {
        let pending = delivery(2);
        let dead = delivery(5);

        assert!(DeliveryFilter::All.matches(&pending, 5));
        assert!(DeliveryFilter::All.matches(&dead, 5));
        assert!(DeliveryFilter::Pending.matches(&pending, 5));
        assert!(!DeliveryFilter::Pending.matches(&dead, 5));
        assert!(DeliveryFilter::DeadLettered.matches(&dead, 5));
        assert!(!DeliveryFilter::DeadLettered.matches(&pending, 5));
    }
}
