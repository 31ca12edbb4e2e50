//! # gradebridge
//!
//! Bridge between an LMS host and an external assessment platform.
//!
//! Two flows are implemented:
//!
//! - **Outbound**: events are queued in the delivery store and forwarded to
//!   the platform as HMAC-SHA256 signed POSTs, with a bounded number of
//!   attempts per event.
//! - **Inbound**: the platform writes grades through an idempotent
//!   grade-apply call. A client request id makes retries safe.
//!
//! ## Architecture
//!
//! ```text
//! Platform / Host (HTTP)
//!     │
//!     ├── REST Handlers (api/)
//!     │
//!     ├── GradeService (service/)        Scheduler (scheduler)
//!     │                                      │
//!     │                                  DeliveryProcessor (webhook/)
//!     │                                      ├── Forwarder ── signing
//!     │                                      │
//!     └── Gradebook / OperationLedger / DeliveryStore (persistence/)
//!             │
//!             └── PostgreSQL or in-memory
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod scheduler;
pub mod service;
pub mod signing;
pub mod webhook;
