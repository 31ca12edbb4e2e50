//! In-process store implementing every persistence trait.
//!
//! Mirrors the PostgreSQL semantics that matter to the core: atomic claims,
//! compare-and-increment attempt accounting, and a uniqueness check on the
//! idempotency key that is re-evaluated at commit time so that two racing
//! transactions cannot both land.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use super::{DeliveryStore, GradeTransaction, Gradebook, OperationLedger, StoreError};
use crate::domain::{
    DeliveryFilter, DeliveryPage, GradeItem, GradeWrite, NewOperation, OperationRecord,
    WebhookDelivery,
};

#[derive(Debug, Default)]
struct MemoryState {
    deliveries: BTreeMap<i64, WebhookDelivery>,
    last_delivery_id: i64,
    operations: BTreeMap<i64, OperationRecord>,
    last_operation_id: i64,
    grade_items: HashMap<i64, GradeItem>,
    users: HashSet<i64>,
    grades: HashMap<(i64, i64), String>,
    grade_writes: u64,
}

impl MemoryState {
    fn operation_by_key(&self, client_request_id: &str) -> Option<&OperationRecord> {
        if client_request_id.is_empty() {
            return None;
        }
        self.operations
            .values()
            .find(|op| op.client_request_id == client_request_id)
    }
}

/// Shared in-memory store. Cloning shares the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a host grade item.
    pub async fn insert_grade_item(&self, item: GradeItem) {
        self.state.write().await.grade_items.insert(item.id, item);
    }

    /// Registers a host user.
    pub async fn insert_user(&self, user_id: i64) {
        self.state.write().await.users.insert(user_id);
    }

    /// Current stored grade for `(item_id, user_id)`.
    pub async fn grade(&self, item_id: i64, user_id: i64) -> Option<String> {
        self.state
            .read()
            .await
            .grades
            .get(&(item_id, user_id))
            .cloned()
    }

    /// Number of grade writes committed so far.
    pub async fn grade_write_count(&self) -> u64 {
        self.state.read().await.grade_writes
    }

    /// Number of ledger records.
    pub async fn operation_count(&self) -> usize {
        self.state.read().await.operations.len()
    }
}

#[async_trait]
impl DeliveryStore for MemoryStore {
    async fn enqueue(&self, event: &str, payload: &serde_json::Value) -> Result<i64, StoreError> {
        let mut state = self.state.write().await;
        state.last_delivery_id = state.last_delivery_id.saturating_add(1);
        let id = state.last_delivery_id;
        let now = Utc::now();
        state.deliveries.insert(
            id,
            WebhookDelivery {
                id,
                event: event.to_string(),
                payload: payload.clone(),
                created_at: now,
                attempts: 0,
                last_http_status: 0,
                last_response_body: String::new(),
                claimed_until: None,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn fetch_next_eligible(
        &self,
        max_attempts: i32,
        lease: Duration,
    ) -> Result<Option<WebhookDelivery>, StoreError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let next_id = state
            .deliveries
            .values()
            .filter(|d| d.is_eligible(max_attempts) && !d.is_claimed_at(now))
            .min_by_key(|d| (d.created_at, d.id))
            .map(|d| d.id);

        let Some(id) = next_id else {
            return Ok(None);
        };
        Ok(state.deliveries.get_mut(&id).map(|d| {
            d.claimed_until = Some(now + lease);
            d.clone()
        }))
    }

    async fn record_outcome(
        &self,
        id: i64,
        expected_attempts: i32,
        http_status: i32,
        response_body: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let Some(delivery) = state.deliveries.get_mut(&id) else {
            return Ok(false);
        };
        if delivery.attempts != expected_attempts {
            return Ok(false);
        }
        delivery.attempts = delivery.attempts.saturating_add(1);
        delivery.last_http_status = http_status;
        delivery.last_response_body = response_body.to_string();
        delivery.claimed_until = None;
        delivery.updated_at = Utc::now();
        Ok(true)
    }

    async fn get(&self, id: i64) -> Result<Option<WebhookDelivery>, StoreError> {
        Ok(self.state.read().await.deliveries.get(&id).cloned())
    }

    async fn list(
        &self,
        filter: DeliveryFilter,
        max_attempts: i32,
        offset: u64,
        limit: u64,
    ) -> Result<DeliveryPage, StoreError> {
        let state = self.state.read().await;
        let mut matching: Vec<&WebhookDelivery> = state
            .deliveries
            .values()
            .filter(|d| filter.matches(d, max_attempts))
            .collect();
        matching.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(DeliveryPage { items, total })
    }

    async fn requeue(&self, id: i64) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let delivery = state
            .deliveries
            .get_mut(&id)
            .ok_or(StoreError::NotFound {
                entity: "delivery",
                id,
            })?;
        delivery.attempts = 0;
        delivery.claimed_until = None;
        delivery.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl OperationLedger for MemoryStore {
    async fn find(&self, client_request_id: &str) -> Result<Option<OperationRecord>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .operation_by_key(client_request_id)
            .cloned())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let before = state.operations.len();
        state.operations.retain(|_, op| op.created_at >= cutoff);
        Ok((before - state.operations.len()) as u64)
    }
}

#[async_trait]
impl Gradebook for MemoryStore {
    async fn find_grade_item(&self, item_id: i64) -> Result<Option<GradeItem>, StoreError> {
        Ok(self.state.read().await.grade_items.get(&item_id).cloned())
    }

    async fn user_exists(&self, user_id: i64) -> Result<bool, StoreError> {
        Ok(self.state.read().await.users.contains(&user_id))
    }

    async fn begin(&self) -> Result<Box<dyn GradeTransaction>, StoreError> {
        Ok(Box::new(MemoryGradeTransaction {
            state: Arc::clone(&self.state),
            writes: Vec::new(),
            operation: None,
        }))
    }
}

/// Staged writes applied under a single write lock on commit.
#[derive(Debug)]
struct MemoryGradeTransaction {
    state: Arc<RwLock<MemoryState>>,
    writes: Vec<GradeWrite>,
    operation: Option<OperationRecord>,
}

#[async_trait]
impl GradeTransaction for MemoryGradeTransaction {
    async fn write_grade(&mut self, write: &GradeWrite) -> Result<(), StoreError> {
        if !self
            .state
            .read()
            .await
            .grade_items
            .contains_key(&write.item_id)
        {
            return Err(StoreError::NotFound {
                entity: "grade item",
                id: write.item_id,
            });
        }
        self.writes.push(write.clone());
        Ok(())
    }

    async fn record_applied(&mut self, op: &NewOperation) -> Result<i64, StoreError> {
        let mut state = self.state.write().await;
        if state.operation_by_key(&op.client_request_id).is_some() {
            return Err(StoreError::DuplicateOperation(op.client_request_id.clone()));
        }
        state.last_operation_id = state.last_operation_id.saturating_add(1);
        let id = state.last_operation_id;
        self.operation = Some(OperationRecord {
            id,
            client_request_id: op.client_request_id.clone(),
            op_type: op.op_type.clone(),
            payload: op.payload.clone(),
            created_at: Utc::now(),
            actor: op.actor,
        });
        Ok(id)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let Self {
            state,
            writes,
            operation,
        } = *self;
        let mut state = state.write().await;

        if let Some(op) = &operation
            && state.operation_by_key(&op.client_request_id).is_some()
        {
            return Err(StoreError::DuplicateOperation(op.client_request_id.clone()));
        }
        for write in writes {
            state
                .grades
                .insert((write.item_id, write.user_id), write.value.to_raw_string());
            state.grade_writes = state.grade_writes.saturating_add(1);
        }
        if let Some(op) = operation {
            state.operations.insert(op.id, op);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
