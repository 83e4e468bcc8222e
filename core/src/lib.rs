//! # Courier Core
//!
//! Core traits and types for the Courier dispatch core.
//!
//! Courier answers two questions for an in-process application:
//!
//! - which handler(s) run for a message, in what order, wrapped in what
//!   cross-cutting behavior;
//! - how an externally visible event is eventually delivered even when the
//!   broker is unavailable at the time it is raised.
//!
//! This crate holds the vocabulary. Execution (sender, publisher,
//! orchestrators, outbox relay, resilience policies) lives in
//! `courier-runtime`; test doubles live in `courier-testing`.
//!
//! ## Core Concepts
//!
//! - **Request**: a message with exactly one handler and a typed response
//! - **Event**: a fact with zero or more handlers and no response
//! - **Outcome**: success with a value, or failure with structured reasons;
//!   every dispatch returns one instead of panicking
//! - **Context**: correlation id, timestamp and cancellation for one call
//! - **Pipeline**: behaviors folded around a request handler
//! - **Resolver**: static lookup from message type to handler(s)
//! - **Collaborators**: [`codec::Codec`], [`transport::Transport`] and
//!   [`outbox::OutboxStore`] contracts implemented outside the core
//!
//! ## Example
//!
//! ```ignore
//! use courier_core::*;
//!
//! struct CreateOrder { customer: String, amount: u64 }
//!
//! impl Request for CreateOrder {
//!     type Response = u64;
//! }
//!
//! let registry = HandlerRegistry::builder()
//!     .request::<CreateOrder>(FnRequestHandler::new(|req: CreateOrder, _ctx: Context| async move {
//!         if req.amount == 0 {
//!             return Outcome::failure(Reason::rejected("empty order"));
//!         }
//!         Outcome::success(42)
//!     }))
//!     .build()?;
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use tokio_util::sync::CancellationToken;

pub mod codec;
pub mod context;
pub mod event;
pub mod handler;
pub mod outbox;
pub mod outcome;
pub mod pipeline;
pub mod request;
pub mod resolver;
pub mod transport;

pub use codec::{BincodeCodec, Codec, CodecError, JsonCodec};
pub use context::{Context, ContextFactory, DefaultContextFactory};
pub use event::{Event, SerializedEvent};
pub use handler::{EventHandler, FnEventHandler, FnRequestHandler, RequestHandler};
pub use outbox::{DeliveryState, OutboxError, OutboxRecord, OutboxStore, RecordId};
pub use outcome::{CaughtPanic, Metadata, Outcome, Reason, Reasons};
pub use pipeline::{Next, Pipeline, PipelineBehavior, PipelineBuilder};
pub use request::Request;
pub use resolver::{DependencyResolver, HandlerRegistry, HandlerRegistryBuilder, RegistrationError};
pub use transport::{InboundMessage, InboundStream, Transport, TransportError};

/// Environment module - Injected dependencies
///
/// Time is the only ambient dependency the core reads directly. Everything
/// else (stores, transports, codecs) is passed to the runtime types that use
/// it.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// let factory = DefaultContextFactory::with_clock(SystemClock);
    ///
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time from the operating system.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
        fn now(&self) -> DateTime<Utc> {
            (**self).now()
        }
    }
}

pub use environment::{Clock, SystemClock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_moves_forward() {
        let first = SystemClock.now();
        let second = SystemClock.now();
        assert!(second >= first);
    }
}
