//! PostgreSQL implementation of the persistence layer.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};

use super::{DeliveryStore, GradeTransaction, Gradebook, OperationLedger, StoreError};
use crate::config::ServiceConfig;
use crate::domain::{
    DeliveryFilter, DeliveryPage, GradeItem, GradeType, GradeWrite, NewOperation, OperationRecord,
    WebhookDelivery,
};

/// SQLSTATE for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

const DELIVERY_COLUMNS: &str = "id, event, payload, created_at, attempts, last_http_status, \
     last_response_body, claimed_until, updated_at";

const CLAIMED_COLUMNS: &str = "d.id, d.event, d.payload, d.created_at, d.attempts, \
     d.last_http_status, d.last_response_body, d.claimed_until, d.updated_at";

type DeliveryRow = (
    i64,
    String,
    serde_json::Value,
    DateTime<Utc>,
    i32,
    i32,
    String,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
);

type OperationRow = (i64, String, String, serde_json::Value, DateTime<Utc>, i64);

fn delivery_from_row(row: DeliveryRow) -> WebhookDelivery {
    let (
        id,
        event,
        payload,
        created_at,
        attempts,
        last_http_status,
        last_response_body,
        claimed_until,
        updated_at,
    ) = row;
    WebhookDelivery {
        id,
        event,
        payload,
        created_at,
        attempts,
        last_http_status,
        last_response_body,
        claimed_until,
        updated_at,
    }
}

fn operation_from_row(row: OperationRow) -> OperationRecord {
    let (id, client_request_id, op_type, payload, created_at, actor) = row;
    OperationRecord {
        id,
        client_request_id,
        op_type,
        payload,
        created_at,
        actor,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().is_some_and(|code| code == UNIQUE_VIOLATION);
    }
    false
}

const fn filter_tag(filter: DeliveryFilter) -> &'static str {
    match filter {
        DeliveryFilter::All => "all",
        DeliveryFilter::Pending => "pending",
        DeliveryFilter::DeadLettered => "dead_lettered",
    }
}

/// PostgreSQL-backed store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wraps an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool from configuration and runs the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the database is unreachable or
    /// a migration fails.
    pub async fn connect(config: &ServiceConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(StdDuration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        tracing::info!("database migrations applied");
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl DeliveryStore for PostgresStore {
    async fn enqueue(&self, event: &str, payload: &serde_json::Value) -> Result<i64, StoreError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO webhook_deliveries (event, payload) VALUES ($1, $2) RETURNING id",
        )
        .bind(event)
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn fetch_next_eligible(
        &self,
        max_attempts: i32,
        lease: Duration,
    ) -> Result<Option<WebhookDelivery>, StoreError> {
        let sql = format!(
            "WITH next AS ( \
                 SELECT id FROM webhook_deliveries \
                 WHERE attempts < $1 AND (claimed_until IS NULL OR claimed_until < now()) \
                 ORDER BY created_at ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE webhook_deliveries d \
             SET claimed_until = now() + ($2::bigint * interval '1 millisecond'), updated_at = now() \
             FROM next WHERE d.id = next.id \
             RETURNING {CLAIMED_COLUMNS}"
        );
        let row = sqlx::query_as::<_, DeliveryRow>(&sql)
            .bind(max_attempts)
            .bind(lease.num_milliseconds())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(delivery_from_row))
    }

    async fn record_outcome(
        &self,
        id: i64,
        expected_attempts: i32,
        http_status: i32,
        response_body: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE webhook_deliveries \
             SET attempts = attempts + 1, last_http_status = $3, last_response_body = $4, \
                 claimed_until = NULL, updated_at = now() \
             WHERE id = $1 AND attempts = $2",
        )
        .bind(id)
        .bind(expected_attempts)
        .bind(http_status)
        .bind(response_body)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, id: i64) -> Result<Option<WebhookDelivery>, StoreError> {
        let row = sqlx::query_as::<_, DeliveryRow>(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(delivery_from_row))
    }

    async fn list(
        &self,
        filter: DeliveryFilter,
        max_attempts: i32,
        offset: u64,
        limit: u64,
    ) -> Result<DeliveryPage, StoreError> {
        const FILTER_SQL: &str = "($2 = 'all' \
             OR ($2 = 'pending' AND attempts < $1) \
             OR ($2 = 'dead_lettered' AND attempts >= $1))";

        let tag = filter_tag(filter);
        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM webhook_deliveries WHERE {FILTER_SQL}"
        ))
        .bind(max_attempts)
        .bind(tag)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, DeliveryRow>(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries WHERE {FILTER_SQL} \
             ORDER BY created_at DESC, id DESC OFFSET $3 LIMIT $4"
        ))
        .bind(max_attempts)
        .bind(tag)
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(DeliveryPage {
            items: rows.into_iter().map(delivery_from_row).collect(),
            total: u64::try_from(total).unwrap_or(0),
        })
    }

    async fn requeue(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE webhook_deliveries SET attempts = 0, claimed_until = NULL, updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "delivery",
                id,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl OperationLedger for PostgresStore {
    async fn find(&self, client_request_id: &str) -> Result<Option<OperationRecord>, StoreError> {
        if client_request_id.is_empty() {
            return Ok(None);
        }
        let row = sqlx::query_as::<_, OperationRow>(
            "SELECT id, client_request_id, op_type, payload, created_at, actor \
             FROM operation_records WHERE client_request_id = $1",
        )
        .bind(client_request_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(operation_from_row))
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM operation_records WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Gradebook for PostgresStore {
    async fn find_grade_item(&self, item_id: i64) -> Result<Option<GradeItem>, StoreError> {
        let row = sqlx::query_as::<_, (i64, i16, Option<f64>)>(
            "SELECT id, grade_type, grade_max FROM grade_items WHERE id = $1",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, grade_type, grade_max)| GradeItem {
            id,
            grade_type: GradeType::from_code(grade_type),
            grade_max,
        }))
    }

    async fn user_exists(&self, user_id: i64) -> Result<bool, StoreError> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn begin(&self) -> Result<Box<dyn GradeTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgGradeTransaction { tx }))
    }
}

/// A grade write and its ledger record inside one database transaction.
struct PgGradeTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl GradeTransaction for PgGradeTransaction {
    async fn write_grade(&mut self, write: &GradeWrite) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO grade_grades (item_id, user_id, raw_grade) VALUES ($1, $2, $3) \
             ON CONFLICT (item_id, user_id) \
             DO UPDATE SET raw_grade = EXCLUDED.raw_grade, updated_at = now()",
        )
        .bind(write.item_id)
        .bind(write.user_id)
        .bind(write.value.to_raw_string())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn record_applied(&mut self, op: &NewOperation) -> Result<i64, StoreError> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO operation_records (client_request_id, op_type, payload, actor) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(&op.client_request_id)
        .bind(&op.op_type)
        .bind(&op.payload)
        .bind(op.actor)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateOperation(op.client_request_id.clone())
            } else {
                StoreError::from(e)
            }
        })
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
