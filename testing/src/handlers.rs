//! Recording and failing event handlers.

use courier_core::context::Context;
use courier_core::event::Event;
use courier_core::handler::EventHandler;
use courier_core::outcome::{Outcome, Reason};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Records every event it handles together with the correlation id.
///
/// Clones share the recording, so keep one clone for assertions and register
/// the other.
#[derive(Debug)]
pub struct RecordingEventHandler<E> {
    name: &'static str,
    seen: Arc<Mutex<Vec<(E, Uuid)>>>,
}

impl<E> Clone for RecordingEventHandler<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            seen: Arc::clone(&self.seen),
        }
    }
}

impl<E: Clone> RecordingEventHandler<E> {
    /// Create a named recorder.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Events handled so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<E> {
        self.entries().into_iter().map(|(event, _)| event).collect()
    }

    /// Events with the correlation id they were handled under.
    #[must_use]
    pub fn entries(&self) -> Vec<(E, Uuid)> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of events handled.
    #[must_use]
    pub fn count(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl<E: Event + Clone> EventHandler<E> for RecordingEventHandler<E> {
    fn handle<'a>(&'a self, event: &'a E, ctx: &'a Context) -> BoxFuture<'a, Outcome<()>> {
        Box::pin(async move {
            self.seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((event.clone(), ctx.correlation_id()));
            Outcome::success(())
        })
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Always fails with a fixed rejection message.
#[derive(Debug, Clone)]
pub struct FailingEventHandler {
    name: &'static str,
    message: String,
    calls: Arc<AtomicUsize>,
}

impl FailingEventHandler {
    /// A handler failing with `Reason::Rejected(message)`.
    #[must_use]
    pub fn new(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            message: message.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of invocations.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<E: Event> EventHandler<E> for FailingEventHandler {
    fn handle<'a>(&'a self, _event: &'a E, _ctx: &'a Context) -> BoxFuture<'a, Outcome<()>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Outcome::failure(Reason::rejected(self.message.clone()))
        })
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::helpers::test_context;

    #[derive(Clone, Debug, PartialEq)]
    struct Ping(u8);

    impl Event for Ping {
        fn event_type(&self) -> &'static str {
            "Ping.v1"
        }
    }

    #[tokio::test]
    async fn recorder_keeps_events_and_correlation() {
        let recorder = RecordingEventHandler::<Ping>::new("recorder");
        let handler = recorder.clone();
        let ctx = test_context();

        let outcome = handler.handle(&Ping(3), &ctx).await;

        assert!(outcome.is_success());
        assert_eq!(recorder.entries(), vec![(Ping(3), ctx.correlation_id())]);
        assert_eq!(EventHandler::<Ping>::name(&recorder), "recorder");
    }

    #[test]
    fn failing_handler_counts_calls() {
        let failing = FailingEventHandler::new("failing", "out of stock");

        let outcome = tokio_test::block_on(EventHandler::<Ping>::handle(
            &failing,
            &Ping(1),
            &test_context(),
        ));

        assert_eq!(outcome.failure_reasons()[0].to_string(), "out of stock");
        assert_eq!(failing.calls(), 1);
    }
}
