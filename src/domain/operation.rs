//! Idempotency ledger records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operation type tag written for grade changes.
pub const GRADE_UPDATE: &str = "grade_update";

/// Durable proof that an external write has been applied.
///
/// At most one record exists per non-empty `client_request_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Store-assigned identifier.
    pub id: i64,
    /// Caller-supplied idempotency key.
    pub client_request_id: String,
    /// Operation tag (e.g. [`GRADE_UPDATE`]).
    pub op_type: String,
    /// Validated request, kept for audit.
    pub payload: serde_json::Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Principal that applied the operation.
    pub actor: i64,
}

/// Ledger entry to be written inside a grade transaction.
#[derive(Debug, Clone)]
pub struct NewOperation {
    /// Idempotency key; never empty.
    pub client_request_id: String,
    /// Operation tag.
    pub op_type: String,
    /// Validated request.
    pub payload: serde_json::Value,
    /// Applying principal.
    pub actor: i64,
}
