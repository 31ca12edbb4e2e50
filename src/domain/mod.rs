//! Domain layer: delivery rows, ledger records and grade types.
//!
//! Plain data types shared by the persistence, webhook and service layers.
//! Nothing in here touches I/O.

pub mod delivery;
pub mod grade;
pub mod operation;

pub use delivery::{DEFAULT_MAX_ATTEMPTS, DeliveryFilter, DeliveryPage, WebhookDelivery};
pub use grade::{
    ApplyGradeRequest, ApplyGradeResult, ApplyStatus, GradeItem, GradeType, GradeValue, GradeWrite,
    parse_event_timestamp,
};
pub use operation::{GRADE_UPDATE, NewOperation, OperationRecord};
