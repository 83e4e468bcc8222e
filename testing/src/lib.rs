//! # Courier Testing
//!
//! Test doubles and helpers for the Courier dispatch core.
//!
//! This crate provides:
//! - A fixed [`Clock`] for deterministic timestamps
//! - [`InMemoryOutboxStore`] with failure injection
//! - [`RecordingTransport`] capturing sends and feeding inbound messages
//! - Recording and failing event handlers
//! - Context and tracing helpers
//! - proptest strategies for outcome patterns
//!
//! ## Example
//!
//! ```ignore
//! use courier_testing::{InMemoryOutboxStore, RecordingTransport, test_context};
//!
//! #[tokio::test]
//! async fn relay_delivers_staged_events() {
//!     let store = Arc::new(InMemoryOutboxStore::new());
//!     let transport = Arc::new(RecordingTransport::new());
//!     let outbox = Outbox::new(Arc::clone(&store));
//!
//!     outbox.add(&OrderCreated { order_id: 1 }, &test_context()).await;
//!
//!     let relay = OutboxRelay::new(store.clone(), transport.clone(), RelayConfig::default());
//!     relay.process_batch(&CancellationToken::new()).await?;
//!
//!     assert_eq!(transport.sent().len(), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use courier_core::environment::Clock;

pub mod handlers;
pub mod outbox_store;
pub mod transport;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use courier_testing::mocks::FixedClock;
    /// use courier_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone, Copy)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// A fixed clock at 2025-01-01 00:00:00 UTC.
    #[must_use]
    pub fn test_clock() -> FixedClock {
        // 2025-01-01T00:00:00Z
        FixedClock::new(DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use super::mocks::test_clock;
    use courier_core::context::{Context, ContextFactory, DefaultContextFactory};
    use courier_core::outcome::{Outcome, Reason};
    use tracing_subscriber::EnvFilter;

    /// A fresh context stamped with [`test_clock`].
    #[must_use]
    pub fn test_context() -> Context {
        DefaultContextFactory::with_clock(test_clock()).create()
    }

    /// Install a test-writer subscriber honouring `RUST_LOG`.
    ///
    /// Safe to call from every test; only the first call installs.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }

    /// Failure messages of an outcome, for compact assertions.
    #[must_use]
    pub fn reason_messages<T>(outcome: &Outcome<T>) -> Vec<String> {
        outcome
            .failure_reasons()
            .iter()
            .map(Reason::to_string)
            .collect()
    }
}

/// Property-based testing utilities.
pub mod properties {
    use proptest::prelude::*;

    /// Which of `n` handlers fail, for `1..=max_handlers` handlers.
    pub fn failure_pattern(max_handlers: usize) -> impl Strategy<Value = Vec<bool>> {
        proptest::collection::vec(any::<bool>(), 1..=max_handlers)
    }

    /// A retry scenario: `(max_attempts, attempt that first succeeds)`.
    ///
    /// The success attempt may lie beyond `max_attempts`, in which case the
    /// operation never succeeds within the policy.
    pub fn retry_scenario(max: u32) -> impl Strategy<Value = (u32, u32)> {
        (1..=max).prop_flat_map(move |max_attempts| (Just(max_attempts), 1..=max + 1))
    }
}

pub use handlers::{FailingEventHandler, RecordingEventHandler};
pub use helpers::{init_tracing, reason_messages, test_context};
pub use mocks::{FixedClock, test_clock};
pub use outbox_store::InMemoryOutboxStore;
pub use transport::RecordingTransport;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_context_uses_fixed_clock() {
        let first = test_context();
        let second = test_context();
        assert_eq!(first.timestamp(), second.timestamp());
        assert_ne!(first.correlation_id(), second.correlation_id());
    }
}
