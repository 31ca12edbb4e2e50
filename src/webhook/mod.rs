//! Outbound webhook delivery: the signed forwarder and the queue processor.

pub mod forwarder;
pub mod processor;

pub use forwarder::{
    DeliveryOutcome, Forwarder, MAX_RESPONSE_BODY_CHARS, SIGNATURE_HEADER, TIMESTAMP_HEADER,
    TransportError,
};
pub use processor::{BatchReport, DeliveryProcessor, ProcessOutcome};
