//! Service layer: business logic orchestration.
//!
//! [`GradeService`] applies inbound grade changes against the host
//! gradebook and the idempotency ledger.

pub mod grade_service;

pub use grade_service::{GradeService, validate_grade};
