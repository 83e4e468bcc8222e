//! Event trait and the serialized form used at the outbox and transport
//! boundaries.
//!
//! Events are facts: immutable, handled by zero or more handlers, never
//! returning a value. Their identity is their declared type, exposed as a
//! stable, versioned descriptor by [`Event::event_type`].
//!
//! # Example
//!
//! ```
//! use courier_core::event::Event;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! struct OrderCreated {
//!     order_id: u64,
//! }
//!
//! impl Event for OrderCreated {
//!     fn event_type(&self) -> &'static str {
//!         "OrderCreated.v1"
//!     }
//!
//!     fn destination(&self) -> &'static str {
//!         "order-events"
//!     }
//! }
//! ```

use crate::codec::{Codec, CodecError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An event that can be published locally or staged for external delivery.
///
/// # Event Naming Convention
///
/// `event_type()` should return a stable identifier with a version suffix
/// (`"OrderPlaced.v1"`). It is stored in outbox records and used by the inbound
/// router to pick a decoder, so changing it is a schema change.
///
/// # Thread Safety
///
/// Events must be `Send + Sync + 'static`: the concurrent orchestrator shares
/// one event between handler tasks.
pub trait Event: Send + Sync + 'static {
    /// Stable, versioned type descriptor.
    fn event_type(&self) -> &'static str;

    /// Where the outbox relay sends this event. Defaults to the event type.
    fn destination(&self) -> &'static str {
        self.event_type()
    }
}

/// An encoded event: type descriptor, bytes and optional metadata.
///
/// This is the wire form between the dispatch core and its storage/transport
/// collaborators. The core never inspects `data`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerializedEvent {
    /// The event type identifier (e.g., "OrderPlaced.v1").
    pub event_type: String,

    /// Codec-encoded event data.
    pub data: Vec<u8>,

    /// Optional metadata.
    ///
    /// The outbox writes `correlation_id` here so consumers can deduplicate
    /// redelivered events.
    pub metadata: Option<serde_json::Value>,
}

impl SerializedEvent {
    /// Create a new serialized event.
    #[must_use]
    pub const fn new(
        event_type: String,
        data: Vec<u8>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_type,
            data,
            metadata,
        }
    }

    /// Encode an event with the given codec.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the codec cannot encode the event.
    pub fn encode<E, C>(
        event: &E,
        codec: &C,
        metadata: Option<serde_json::Value>,
    ) -> Result<Self, CodecError>
    where
        E: Event + Serialize,
        C: Codec + ?Sized,
    {
        Ok(Self {
            event_type: event.event_type().to_string(),
            data: codec.encode(event)?,
            metadata,
        })
    }

    /// Decode the payload back into an event.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if the bytes do not decode as `E`.
    pub fn decode<E, C>(&self, codec: &C) -> Result<E, CodecError>
    where
        E: DeserializeOwned,
        C: Codec + ?Sized,
    {
        codec.decode(&self.data)
    }

    /// Correlation id stored in the metadata, if any.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.get("correlation_id"))
            .and_then(serde_json::Value::as_str)
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, size: {} bytes }}",
            self.event_type,
            self.data.len()
        )
    }
}
