//! Core domain models for publishing and consuming events.
//!
//! Defines the outbound message envelope, the owned inbound record, the
//! connection state machine states, and the publish outcome reported to
//! observability. Messages are immutable once constructed: fields are
//! private and only builder-style methods that consume `self` can change
//! them before the message is handed to the publisher.

use std::{collections::BTreeMap, fmt, time::Duration};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Header carrying the payload media type.
pub const HEADER_CONTENT_TYPE: &str = "content-type";

/// Header naming the component that produced the message.
pub const HEADER_ORIGIN: &str = "origin";

/// Header carrying the unique message identifier.
pub const HEADER_MESSAGE_ID: &str = "message-id";

const JSON_CONTENT_TYPE: &str = "application/json";

/// Strongly-typed message identifier.
///
/// Generated once per outbound message and carried in the
/// [`HEADER_MESSAGE_ID`] header so consumers can correlate deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    /// Creates a new random message ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event about to be handed to the broker.
///
/// The partition key groups related events (for example all events of one
/// user) so the broker keeps them on one partition. The payload is already
/// serialized; headers carry metadata such as content type and origin.
///
/// # Example
///
/// ```
/// use courier_core::{OutboundMessage, HEADER_CONTENT_TYPE};
///
/// let message = OutboundMessage::json("u1", &serde_json::json!({ "price": 10 }))
///     .unwrap()
///     .with_origin("checkout");
///
/// assert_eq!(message.key(), "u1");
/// assert_eq!(message.header(HEADER_CONTENT_TYPE), Some("application/json"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    id: MessageId,
    key: String,
    payload: Bytes,
    headers: BTreeMap<String, String>,
}

impl OutboundMessage {
    /// Creates a message from an already serialized payload.
    pub fn new(key: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        let id = MessageId::new();
        let mut headers = BTreeMap::new();
        headers.insert(HEADER_MESSAGE_ID.to_string(), id.to_string());

        Self { id, key: key.into(), payload: payload.into(), headers }
    }

    /// Serializes `value` as JSON and sets the JSON content type.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Serialization`] if the value cannot be encoded.
    pub fn json<T: Serialize + ?Sized>(key: impl Into<String>, value: &T) -> Result<Self> {
        let payload = serde_json::to_vec(value)?;
        Ok(Self::new(key, payload).with_header(HEADER_CONTENT_TYPE, JSON_CONTENT_TYPE))
    }

    /// Sets the origin header.
    #[must_use]
    pub fn with_origin(self, origin: impl Into<String>) -> Self {
        self.with_header(HEADER_ORIGIN, origin)
    }

    /// Sets an arbitrary header, replacing any previous value.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Returns the unique message identifier.
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Returns the partition key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the serialized payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Returns all headers in name order.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Returns a single header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Size of the payload in bytes.
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}

/// Owned copy of one record received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRecord {
    /// Topic the record was read from.
    pub topic: String,
    /// Partition within the topic.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Partition key, if the producer set one.
    pub key: Option<String>,
    /// Raw payload bytes.
    pub payload: Bytes,
    /// Record headers.
    pub headers: BTreeMap<String, String>,
}

impl InboundRecord {
    /// Decodes the payload as a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Serialization`] when the payload is not valid
    /// JSON and [`CoreError::InvalidMessage`] when it is empty.
    pub fn decode_json(&self) -> Result<serde_json::Value> {
        if self.payload.is_empty() {
            return Err(CoreError::invalid_message(format!(
                "empty payload at {}/{}@{}",
                self.topic, self.partition, self.offset
            )));
        }
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Broker connection state machine.
///
/// ```text
///  Disconnected ──attempt──▶ Connecting ──handshake ok──▶ Ready
///       ▲                        │                          │
///       └────handshake failed────┘                          │
///       └──────────connection lost / disconnect─────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session with the broker.
    #[default]
    Disconnected,
    /// Handshake in flight.
    Connecting,
    /// Session established and subscribed.
    Ready,
}

impl ConnectionState {
    /// Value published on the connection status gauge.
    pub fn gauge_value(self) -> i64 {
        match self {
            Self::Ready => 1,
            Self::Disconnected | Self::Connecting => 0,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

/// Classification of a failed publish for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Session-level failure; the connection is considered lost.
    Connection,
    /// The broker did not acknowledge in time; the session may be fine.
    Timeout,
    /// Anything else.
    Unknown,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection_error"),
            Self::Timeout => write!(f, "timeout"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Why a publish was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SkipReason {
    /// The connection was not `Ready`.
    NotReady,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => write!(f, "not_ready"),
        }
    }
}

/// Result of one publish attempt.
///
/// Never surfaced to the caller as an error; it only drives metrics and
/// logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Broker acknowledged the message.
    Sent {
        /// Time from send start to acknowledgement.
        duration: Duration,
    },
    /// Nothing was sent.
    Skipped {
        /// Why the send was skipped.
        reason: SkipReason,
    },
    /// Send was attempted and failed.
    Failed {
        /// Failure classification.
        error_class: ErrorClass,
        /// Time from send start to failure.
        duration: Duration,
    },
}

impl PublishOutcome {
    /// Skipped because the connection is not ready.
    pub fn not_ready() -> Self {
        Self::Skipped { reason: SkipReason::NotReady }
    }

    /// Metric label for `messages_published_total{outcome}`.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sent { .. } => "success",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failure",
        }
    }

    /// Measured send duration, absent for skipped publishes.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Sent { duration } | Self::Failed { duration, .. } => Some(*duration),
            Self::Skipped { .. } => None,
        }
    }

    /// Error class for failed publishes.
    pub fn error_class(&self) -> Option<ErrorClass> {
        match self {
            Self::Failed { error_class, .. } => Some(*error_class),
            Self::Sent { .. } | Self::Skipped { .. } => None,
        }
    }

    /// Returns `true` if the broker acknowledged the message.
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}
