//! Grade items, grade values and the apply-grade request/result types.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Offset-carrying ISO 8601 layouts tried after RFC 3339.
const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y%m%dT%H%M%S%.f%z"];

/// Offset-less layouts, read as UTC.
const NAIVE_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y%m%dT%H%M%S%.fZ",
    "%Y%m%dT%H%M%S%.f",
];

/// Parses an ISO 8601 date-time in extended or basic form.
///
/// Accepts RFC 3339, `+hhmm` offsets, and offset-less values (taken as
/// UTC). Returns `None` for anything else.
#[must_use]
pub fn parse_event_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    OFFSET_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(raw, fmt).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .or_else(|| {
            NAIVE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|naive| naive.and_utc())
        })
}

/// How the host interprets grades for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeType {
    /// Item is not graded.
    None,
    /// Numeric grade bounded by the item's maximum.
    Value,
    /// Grade picked from a scale.
    Scale,
    /// Free-text feedback only.
    Text,
}

impl GradeType {
    /// Maps the host's integer grade-type column.
    ///
    /// Unknown codes fall back to [`GradeType::None`] so that the host's own
    /// validation decides.
    #[must_use]
    pub const fn from_code(code: i16) -> Self {
        match code {
            1 => Self::Value,
            2 => Self::Scale,
            3 => Self::Text,
            _ => Self::None,
        }
    }
}

/// A gradable item owned by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeItem {
    /// Host item id.
    pub id: i64,
    /// Grade interpretation.
    pub grade_type: GradeType,
    /// Upper bound for numeric grades, if configured.
    pub grade_max: Option<f64>,
}

/// A grade after validation against its item.
#[derive(Debug, Clone, PartialEq)]
pub enum GradeValue {
    /// Parsed numeric grade.
    Numeric(f64),
    /// Raw value handed to the host unchanged.
    Raw(String),
}

impl GradeValue {
    /// Renders the value the way it is stored by the host.
    #[must_use]
    pub fn to_raw_string(&self) -> String {
        match self {
            Self::Numeric(n) => n.to_string(),
            Self::Raw(s) => s.clone(),
        }
    }
}

/// The write sent to the host's grading subsystem.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeWrite {
    /// Grade item.
    pub item_id: i64,
    /// Graded user.
    pub user_id: i64,
    /// Validated value.
    pub value: GradeValue,
}

/// Inbound `update_grade` request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApplyGradeRequest {
    /// Grade item id.
    pub item_id: i64,
    /// Host user id.
    pub user_id: i64,
    /// Grade value as sent by the platform.
    pub grade: String,
    /// ISO-8601 timestamp of the grading event.
    pub timestamp: String,
    /// Idempotency key. Empty disables deduplication.
    #[serde(default)]
    pub client_request_id: String,
}

/// Result status of an apply-grade call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    /// The grade was written by this call.
    Ok,
    /// A previous call with the same key already wrote it.
    AlreadyApplied,
}

/// Outcome of an apply-grade call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ApplyGradeResult {
    /// What happened.
    pub status: ApplyStatus,
    /// Ledger record id, or 0 when no idempotency key was supplied.
    pub operation_id: i64,
}
