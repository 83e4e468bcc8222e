//! Transport boundary to a message broker.
//!
//! The dispatch core only needs "send bytes to a destination" and "receive
//! bytes from destinations". Broker protocols, partitioning and consumer
//! groups live behind this trait in separate crates.
//!
//! # Architecture
//!
//! ```text
//! Publisher ──► Outbox store ──► OutboxRelay ──► Transport::send ──► broker
//!                                                                      │
//! Publisher ◄── InboundRouter ◄── Transport::receive ◄─────────────────┘
//! ```
//!
//! # Delivery
//!
//! - **At-least-once**: the relay may send a record more than once if it
//!   crashes between a successful send and marking the record delivered.
//! - **Idempotency**: consumers deduplicate, typically on the
//!   `correlation_id` carried in [`SerializedEvent::metadata`].
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//!
//! transport.send("order-events", &event, &cancellation).await?;
//!
//! let mut stream = transport.receive(&["order-events"]).await?;
//! while let Some(message) = stream.next().await {
//!     let message = message?;
//!     println!("{} from {}", message.event.event_type, message.destination);
//! }
//! ```

use crate::event::SerializedEvent;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors that can occur at the transport boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to send an event to a destination
    #[error("Send failed for destination '{destination}': {reason}")]
    SendFailed {
        /// The destination that failed
        destination: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to destinations
    #[error("Subscription failed for destinations {destinations:?}: {reason}")]
    SubscriptionFailed {
        /// The destinations that failed to subscribe
        destinations: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// The send was abandoned because cancellation was requested
    #[error("Send cancelled")]
    Cancelled,

    /// Generic error for other failures
    #[error("Transport error: {0}")]
    Other(String),
}

/// One message received from the broker.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundMessage {
    /// Destination (topic, queue) the message arrived on.
    pub destination: String,

    /// The received event, still encoded.
    pub event: SerializedEvent,
}

impl InboundMessage {
    /// Create an inbound message.
    #[must_use]
    pub fn new(destination: impl Into<String>, event: SerializedEvent) -> Self {
        Self {
            destination: destination.into(),
            event,
        }
    }
}

/// Stream of received messages.
pub type InboundStream =
    Pin<Box<dyn Stream<Item = Result<InboundMessage, TransportError>> + Send>>;

/// "Send bytes, get bytes" contract to a broker.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: the relay sends records for one
/// batch from a single task but may share the transport with an inbound
/// consumer.
pub trait Transport: Send + Sync {
    /// Send an encoded event to a destination.
    ///
    /// Implementations should stop waiting and return
    /// [`TransportError::Cancelled`] once `cancellation` fires.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the broker rejects or cannot be reached.
    fn send<'a>(
        &'a self,
        destination: &'a str,
        event: &'a SerializedEvent,
        cancellation: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;

    /// Subscribe to destinations and stream received messages.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SubscriptionFailed`] if the subscription
    /// cannot be established.
    fn receive<'a>(
        &'a self,
        destinations: &'a [&'a str],
    ) -> Pin<Box<dyn Future<Output = Result<InboundStream, TransportError>> + Send + 'a>>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn send<'a>(
        &'a self,
        destination: &'a str,
        event: &'a SerializedEvent,
        cancellation: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>> {
        (**self).send(destination, event, cancellation)
    }

    fn receive<'a>(
        &'a self,
        destinations: &'a [&'a str],
    ) -> Pin<Box<dyn Future<Output = Result<InboundStream, TransportError>> + Send + 'a>> {
        (**self).receive(destinations)
    }
}
