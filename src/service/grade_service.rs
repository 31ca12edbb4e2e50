//! Grade service: validates and applies inbound grade changes exactly once
//! per idempotency key.

use std::sync::Arc;

use crate::domain::{
    ApplyGradeRequest, ApplyGradeResult, ApplyStatus, GRADE_UPDATE, GradeItem, GradeType,
    GradeValue, GradeWrite, NewOperation, parse_event_timestamp,
};
use crate::error::ServiceError;
use crate::persistence::{GradeTransaction, Gradebook, OperationLedger, StoreError};

/// Orchestrates the apply-grade flow.
///
/// Every call follows: ledger fast path → existence checks → grade
/// validation → one transaction holding the grade write and the ledger
/// record. A uniqueness conflict on commit is resolved by reading the
/// winner's record back.
#[derive(Debug, Clone)]
pub struct GradeService {
    ledger: Arc<dyn OperationLedger>,
    gradebook: Arc<dyn Gradebook>,
}

impl GradeService {
    /// Creates a new `GradeService`.
    #[must_use]
    pub fn new(ledger: Arc<dyn OperationLedger>, gradebook: Arc<dyn Gradebook>) -> Self {
        Self { ledger, gradebook }
    }

    /// Applies a grade on behalf of `actor`.
    ///
    /// Calls without a `client_request_id` are not deduplicated.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::InvalidRequest`] for a malformed timestamp.
    /// - [`ServiceError::GradeItemNotFound`] / [`ServiceError::UserNotFound`].
    /// - [`ServiceError::InvalidGrade`] when the value fails validation.
    /// - [`ServiceError::Storage`] when the transaction fails; nothing is
    ///   persisted in that case.
    pub async fn apply_grade(
        &self,
        request: &ApplyGradeRequest,
        actor: i64,
    ) -> Result<ApplyGradeResult, ServiceError> {
        let key = request.client_request_id.as_str();

        if !key.is_empty()
            && let Some(existing) = self.ledger.find(key).await?
        {
            tracing::info!(
                client_request_id = key,
                operation_id = existing.id,
                "grade update already applied"
            );
            return Ok(ApplyGradeResult {
                status: ApplyStatus::AlreadyApplied,
                operation_id: existing.id,
            });
        }

        if parse_event_timestamp(&request.timestamp).is_none() {
            return Err(ServiceError::InvalidRequest(format!(
                "timestamp {:?} is not an ISO 8601 date-time",
                request.timestamp
            )));
        }

        let item = self
            .gradebook
            .find_grade_item(request.item_id)
            .await?
            .ok_or(ServiceError::GradeItemNotFound(request.item_id))?;
        if !self.gradebook.user_exists(request.user_id).await? {
            return Err(ServiceError::UserNotFound(request.user_id));
        }

        let write = GradeWrite {
            item_id: request.item_id,
            user_id: request.user_id,
            value: validate_grade(&item, &request.grade)?,
        };
        let operation = if key.is_empty() {
            None
        } else {
            Some(NewOperation {
                client_request_id: key.to_string(),
                op_type: GRADE_UPDATE.to_string(),
                payload: serde_json::to_value(request)
                    .map_err(|e| ServiceError::Internal(e.to_string()))?,
                actor,
            })
        };

        let mut tx = self.gradebook.begin().await?;
        let result = match write_in(tx.as_mut(), &write, operation.as_ref()).await {
            Ok(operation_id) => tx.commit().await.map(|()| operation_id),
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "grade transaction rollback failed");
                }
                Err(err)
            }
        };

        match result {
            Ok(operation_id) => {
                tracing::info!(
                    item_id = write.item_id,
                    user_id = write.user_id,
                    actor,
                    operation_id,
                    "grade applied"
                );
                Ok(ApplyGradeResult {
                    status: ApplyStatus::Ok,
                    operation_id,
                })
            }
            Err(StoreError::DuplicateOperation(key)) => self.resolve_duplicate(&key).await,
            Err(err) => Err(err.into()),
        }
    }

    /// Reads back the record that won a uniqueness race.
    async fn resolve_duplicate(&self, key: &str) -> Result<ApplyGradeResult, ServiceError> {
        let existing = self.ledger.find(key).await?.ok_or_else(|| {
            ServiceError::Storage(format!(
                "duplicate operation {key:?} reported but no ledger record found"
            ))
        })?;
        tracing::info!(
            client_request_id = key,
            operation_id = existing.id,
            "concurrent grade update lost the race"
        );
        Ok(ApplyGradeResult {
            status: ApplyStatus::AlreadyApplied,
            operation_id: existing.id,
        })
    }
}

/// Grade write plus optional ledger record; returns the record id or 0.
async fn write_in(
    tx: &mut dyn GradeTransaction,
    write: &GradeWrite,
    operation: Option<&NewOperation>,
) -> Result<i64, StoreError> {
    tx.write_grade(write).await?;
    match operation {
        Some(op) => tx.record_applied(op).await,
        None => Ok(0),
    }
}

/// Checks `raw` against the item's grade type.
///
/// Numeric items need a finite number no greater than `grade_max`. Other
/// grade types pass the raw value through to the host.
///
/// # Errors
///
/// Returns [`ServiceError::InvalidGrade`] on violation.
pub fn validate_grade(item: &GradeItem, raw: &str) -> Result<GradeValue, ServiceError> {
    if item.grade_type != GradeType::Value {
        return Ok(GradeValue::Raw(raw.to_string()));
    }
    let value: f64 = raw
        .trim()
        .parse()
        .ok()
        .filter(|v: &f64| v.is_finite())
        .ok_or_else(|| {
            ServiceError::InvalidGrade(format!("grade {raw:?} must be numeric for item {}", item.id))
        })?;
    if let Some(max) = item.grade_max
        && value > max
    {
        return Err(ServiceError::InvalidGrade(format!(
            "grade {value} exceeds maximum {max}"
        )));
    }
    Ok(GradeValue::Numeric(value))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::OperationRecord;
    use crate::persistence::MemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ITEM: i64 = 10;
    const SCALE_ITEM: i64 = 11;
    const USER: i64 = 20;
    const ACTOR: i64 = 2;

    async fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_grade_item(GradeItem {
                id: ITEM,
                grade_type: GradeType::Value,
                grade_max: Some(100.0),
            })
            .await;
        store
            .insert_grade_item(GradeItem {
                id: SCALE_ITEM,
                grade_type: GradeType::Scale,
                grade_max: None,
            })
            .await;
        store.insert_user(USER).await;
        store
    }

    fn service(store: &MemoryStore) -> GradeService {
        GradeService::new(Arc::new(store.clone()), Arc::new(store.clone()))
    }

    fn request(grade: &str, key: &str) -> ApplyGradeRequest {
        ApplyGradeRequest {
            item_id: ITEM,
            user_id: USER,
            grade: grade.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            client_request_id: key.to_string(),
        }
    }

    #[tokio::test]
    async fn same_key_applies_once() {
        let store = store().await;
        let svc = service(&store);

        let Ok(first) = svc.apply_grade(&request("87.5", "abc"), ACTOR).await else {
            panic!("first apply failed");
        };
        assert_eq!(first.status, ApplyStatus::Ok);
        assert!(first.operation_id > 0);

        let Ok(second) = svc.apply_grade(&request("87.5", "abc"), ACTOR).await else {
            panic!("second apply failed");
        };
        assert_eq!(second.status, ApplyStatus::AlreadyApplied);
        assert_eq!(second.operation_id, first.operation_id);

        assert_eq!(store.operation_count().await, 1);
        assert_eq!(store.grade_write_count().await, 1);
        assert_eq!(store.grade(ITEM, USER).await.as_deref(), Some("87.5"));
    }

    #[tokio::test]
    async fn ledger_records_actor_and_payload() {
        let store = store().await;
        let svc = service(&store);
        let _ = svc.apply_grade(&request("50", "audit-1"), ACTOR).await;

        let Ok(Some(record)) = store.find("audit-1").await else {
            panic!("record missing");
        };
        assert_eq!(record.op_type, GRADE_UPDATE);
        assert_eq!(record.actor, ACTOR);
        assert_eq!(record.payload.get("grade"), Some(&serde_json::json!("50")));
        assert_eq!(
            record.payload.get("client_request_id"),
            Some(&serde_json::json!("audit-1"))
        );
    }

    #[tokio::test]
    async fn empty_key_is_not_deduplicated() {
        let store = store().await;
        let svc = service(&store);

        for _ in 0..2 {
            let Ok(result) = svc.apply_grade(&request("40", ""), ACTOR).await else {
                panic!("apply failed");
            };
            assert_eq!(result.status, ApplyStatus::Ok);
            assert_eq!(result.operation_id, 0);
        }
        assert_eq!(store.grade_write_count().await, 2);
        assert_eq!(store.operation_count().await, 0);
    }

    #[tokio::test]
    async fn grade_above_max_mutates_nothing() {
        let store = store().await;
        let result = service(&store)
            .apply_grade(&request("150", "too-high"), ACTOR)
            .await;
        assert!(matches!(result, Err(ServiceError::InvalidGrade(_))));
        assert_eq!(store.operation_count().await, 0);
        assert_eq!(store.grade_write_count().await, 0);
    }

    #[tokio::test]
    async fn non_numeric_grade_rejected_for_value_item() {
        let store = store().await;
        let result = service(&store).apply_grade(&request("A+", "k"), ACTOR).await;
        assert!(matches!(result, Err(ServiceError::InvalidGrade(_))));
    }

    #[tokio::test]
    async fn scale_item_passes_raw_value() {
        let store = store().await;
        let mut req = request("Excellent", "scale-1");
        req.item_id = SCALE_ITEM;
        let Ok(result) = service(&store).apply_grade(&req, ACTOR).await else {
            panic!("apply failed");
        };
        assert_eq!(result.status, ApplyStatus::Ok);
        assert_eq!(store.grade(SCALE_ITEM, USER).await.as_deref(), Some("Excellent"));
    }

    #[tokio::test]
    async fn missing_item_and_user_are_not_found() {
        let store = store().await;
        let svc = service(&store);

        let mut req = request("10", "nf-1");
        req.item_id = 999;
        assert!(matches!(
            svc.apply_grade(&req, ACTOR).await,
            Err(ServiceError::GradeItemNotFound(999))
        ));

        let mut req = request("10", "nf-2");
        req.user_id = 999;
        assert!(matches!(
            svc.apply_grade(&req, ACTOR).await,
            Err(ServiceError::UserNotFound(999))
        ));
        assert_eq!(store.operation_count().await, 0);
    }

    #[tokio::test]
    async fn malformed_timestamp_rejected() {
        let store = store().await;
        let mut req = request("10", "ts");
        req.timestamp = "yesterday".to_string();
        assert!(matches!(
            service(&store).apply_grade(&req, ACTOR).await,
            Err(ServiceError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn iso8601_timestamps_without_offset_or_in_basic_form_apply() {
        let store = store().await;
        let svc = service(&store);
        for (n, ts) in [
            "2026-10-19T08:30:00",
            "20261019T083000Z",
            "2026-10-19T08:30:00+0000",
        ]
        .into_iter()
        .enumerate()
        {
            let mut req = request("10", &format!("iso-{n}"));
            req.timestamp = ts.to_string();
            let Ok(result) = svc.apply_grade(&req, ACTOR).await else {
                panic!("{ts} rejected");
            };
            assert_eq!(result.status, ApplyStatus::Ok, "{ts}");
        }
        assert_eq!(store.operation_count().await, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_same_key_applies_once() {
        let store = store().await;
        let svc = service(&store);

        let a = tokio::spawn({
            let svc = svc.clone();
            async move { svc.apply_grade(&request("70", "abc"), ACTOR).await }
        });
        let b = tokio::spawn({
            let svc = svc.clone();
            async move { svc.apply_grade(&request("70", "abc"), ACTOR).await }
        });
        let (Ok(Ok(a)), Ok(Ok(b))) = (a.await, b.await) else {
            panic!("apply failed");
        };

        let mut statuses = [a.status, b.status];
        statuses.sort_by_key(|s| *s == ApplyStatus::AlreadyApplied);
        assert_eq!(statuses, [ApplyStatus::Ok, ApplyStatus::AlreadyApplied]);
        assert_eq!(a.operation_id, b.operation_id);
        assert_eq!(store.grade_write_count().await, 1);
        assert_eq!(store.operation_count().await, 1);
    }

    /// Ledger whose first lookups miss, as if a racing request had not
    /// committed yet.
    #[derive(Debug)]
    struct LaggingLedger {
        inner: MemoryStore,
        misses_left: AtomicUsize,
    }

    #[async_trait]
    impl OperationLedger for LaggingLedger {
        async fn find(&self, key: &str) -> Result<Option<OperationRecord>, StoreError> {
            if self
                .misses_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Ok(None);
            }
            self.inner.find(key).await
        }

        async fn purge_older_than(
            &self,
            cutoff: chrono::DateTime<Utc>,
        ) -> Result<u64, StoreError> {
            self.inner.purge_older_than(cutoff).await
        }
    }

    #[tokio::test]
    async fn uniqueness_conflict_maps_to_already_applied() {
        let store = store().await;
        let Ok(first) = service(&store).apply_grade(&request("60", "race"), ACTOR).await else {
            panic!("first apply failed");
        };

        let lagging = GradeService::new(
            Arc::new(LaggingLedger {
                inner: store.clone(),
                misses_left: AtomicUsize::new(1),
            }),
            Arc::new(store.clone()),
        );
        let Ok(second) = lagging.apply_grade(&request("60", "race"), ACTOR).await else {
            panic!("second apply failed");
        };
        assert_eq!(second.status, ApplyStatus::AlreadyApplied);
        assert_eq!(second.operation_id, first.operation_id);
        assert_eq!(store.grade_write_count().await, 1);
    }

    /// Gradebook that reports an item which the transaction cannot write.
    #[derive(Debug)]
    struct BrokenGradebook {
        lookup: MemoryStore,
        writes: MemoryStore,
    }

    #[async_trait]
    impl Gradebook for BrokenGradebook {
        async fn find_grade_item(&self, item_id: i64) -> Result<Option<GradeItem>, StoreError> {
            self.lookup.find_grade_item(item_id).await
        }

        async fn user_exists(&self, user_id: i64) -> Result<bool, StoreError> {
            self.lookup.user_exists(user_id).await
        }

        async fn begin(&self) -> Result<Box<dyn GradeTransaction>, StoreError> {
            self.writes.begin().await
        }
    }

    #[tokio::test]
    async fn failed_write_leaves_no_ledger_record() {
        let lookup = store().await;
        let writes = MemoryStore::new();
        let svc = GradeService::new(
            Arc::new(writes.clone()),
            Arc::new(BrokenGradebook {
                lookup,
                writes: writes.clone(),
            }),
        );

        let result = svc.apply_grade(&request("30", "broken"), ACTOR).await;
        assert!(matches!(result, Err(ServiceError::GradeItemNotFound(ITEM))));
        assert_eq!(writes.operation_count().await, 0);
        assert_eq!(writes.grade_write_count().await, 0);
    }

    #[test]
    fn validate_grade_rules() {
        let item = GradeItem {
            id: 1,
            grade_type: GradeType::Value,
            grade_max: Some(100.0),
        };
        assert_eq!(validate_grade(&item, "100").ok(), Some(GradeValue::Numeric(100.0)));
        assert_eq!(validate_grade(&item, " 7.5 ").ok(), Some(GradeValue::Numeric(7.5)));
        assert!(validate_grade(&item, "100.01").is_err());
        assert!(validate_grade(&item, "NaN").is_err());
        assert!(validate_grade(&item, "inf").is_err());
        assert!(validate_grade(&item, "").is_err());

        let unbounded = GradeItem {
            grade_max: None,
            ..item
        };
        assert!(validate_grade(&unbounded, "1e6").is_ok());

        let text = GradeItem {
            id: 2,
            grade_type: GradeType::Text,
            grade_max: Some(1.0),
        };
        assert_eq!(
            validate_grade(&text, "well done").ok(),
            Some(GradeValue::Raw("well done".to_string()))
        );
    }
}
