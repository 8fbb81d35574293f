//! Core domain types for the courier event pipeline.
//!
//! Provides the message, record, and outcome types exchanged between the
//! broker boundary, the connection supervisor, and the publisher, plus the
//! clock abstraction used to make timing deterministic in tests. All other
//! crates depend on these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    ConnectionState, ErrorClass, InboundRecord, OutboundMessage, PublishOutcome, SkipReason,
    HEADER_CONTENT_TYPE, HEADER_MESSAGE_ID, HEADER_ORIGIN,
};
pub use time::{Clock, RealClock, TestClock};
