//! Persistence layer: delivery queue, operation ledger and the host
//! gradebook seam.
//!
//! The core only touches durable state through the traits defined here.
//! [`postgres::PostgresStore`] is the production implementation backed by
//! `sqlx::PgPool`; [`memory::MemoryStore`] implements the same contracts in
//! process for tests and local runs.

pub mod memory;
pub mod postgres;

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::domain::{
    DeliveryFilter, DeliveryPage, GradeItem, GradeWrite, NewOperation, OperationRecord,
    WebhookDelivery,
};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Storage failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Store unreachable or a query failed.
    #[error("database error: {0}")]
    Database(String),

    /// Another operation already holds this idempotency key.
    #[error("duplicate operation for client request id {0:?}")]
    DuplicateOperation(String),

    /// Referenced row does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of row.
        entity: &'static str,
        /// Row id.
        id: i64,
    },

    /// A stored JSON document could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Durable queue of outbound webhook deliveries.
#[async_trait]
pub trait DeliveryStore: Send + Sync + Debug {
    /// Inserts a new delivery with zero attempts and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the store is unavailable.
    async fn enqueue(&self, event: &str, payload: &serde_json::Value) -> Result<i64, StoreError>;

    /// Claims the oldest delivery with `attempts < max_attempts` that is
    /// not held by another processor, for `lease`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the store is unavailable.
    async fn fetch_next_eligible(
        &self,
        max_attempts: i32,
        lease: Duration,
    ) -> Result<Option<WebhookDelivery>, StoreError>;

    /// Records one attempt: increments `attempts` by one, stores the status
    /// and body, and releases the claim.
    ///
    /// The increment only happens while the stored attempt count still
    /// equals `expected_attempts`. Returns `false` when it did not.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the store is unavailable.
    async fn record_outcome(
        &self,
        id: i64,
        expected_attempts: i32,
        http_status: i32,
        response_body: &str,
    ) -> Result<bool, StoreError>;

    /// Loads a single delivery.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the store is unavailable.
    async fn get(&self, id: i64) -> Result<Option<WebhookDelivery>, StoreError>;

    /// Lists deliveries newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the store is unavailable.
    async fn list(
        &self,
        filter: DeliveryFilter,
        max_attempts: i32,
        offset: u64,
        limit: u64,
    ) -> Result<DeliveryPage, StoreError>;

    /// Resets `attempts` to 0 and releases any claim.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the delivery does not exist.
    async fn requeue(&self, id: i64) -> Result<(), StoreError>;
}

/// Read side of the idempotency ledger. Writes go through
/// [`GradeTransaction::record_applied`].
#[async_trait]
pub trait OperationLedger: Send + Sync + Debug {
    /// Finds the record for a non-empty idempotency key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the store is unavailable.
    async fn find(&self, client_request_id: &str) -> Result<Option<OperationRecord>, StoreError>;

    /// Deletes records created before `cutoff` and returns how many went.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the store is unavailable.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// The host's grading subsystem.
#[async_trait]
pub trait Gradebook: Send + Sync + Debug {
    /// Looks up a grade item.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the store is unavailable.
    async fn find_grade_item(&self, item_id: i64) -> Result<Option<GradeItem>, StoreError>;

    /// Returns `true` if the user exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the store is unavailable.
    async fn user_exists(&self, user_id: i64) -> Result<bool, StoreError>;

    /// Opens a transaction spanning the grade write and its ledger record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the store is unavailable.
    async fn begin(&self) -> Result<Box<dyn GradeTransaction>, StoreError>;
}

/// A unit of work in which a grade write and its ledger record either both
/// persist or neither does. Dropping it without [`commit`](Self::commit)
/// rolls back.
#[async_trait]
pub trait GradeTransaction: Send {
    /// Writes the grade through the host's grading API.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on failure; the caller must roll back.
    async fn write_grade(&mut self, write: &GradeWrite) -> Result<(), StoreError>;

    /// Inserts the ledger record and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateOperation`] when the key is already
    /// taken.
    async fn record_applied(&mut self, op: &NewOperation) -> Result<i64, StoreError>;

    /// Commits everything written in this transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateOperation`] if a racing transaction
    /// committed the same key first, or [`StoreError::Database`].
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discards everything written in this transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the rollback itself fails.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
