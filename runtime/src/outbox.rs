//! Outbox staging.
//!
//! [`Outbox::add`] encodes an event and persists it as a `Pending`
//! [`OutboxRecord`]. Delivery happens later, in the
//! [relay](crate::relay::OutboxRelay). Staging is the whole contract:
//! success means "accepted for eventual delivery", nothing more.
//!
//! Each record carries the correlation id of the staging call both as a
//! column and inside the event metadata, so consumers can deduplicate
//! redelivered events.

use crate::metrics::OutboxMetrics;
use courier_core::codec::{BincodeCodec, Codec};
use courier_core::context::Context;
use courier_core::environment::{Clock, SystemClock};
use courier_core::event::{Event, SerializedEvent};
use courier_core::outbox::{OutboxRecord, OutboxStore, RecordId};
use courier_core::outcome::{Outcome, Reason, keys};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

/// Stages events into an [`OutboxStore`].
///
/// Cheap to clone; clones share the store, clock and waker.
pub struct Outbox<S: OutboxStore + ?Sized, C = BincodeCodec> {
    store: Arc<S>,
    codec: C,
    clock: Arc<dyn Clock>,
    waker: Option<Arc<Notify>>,
}

impl<S: OutboxStore + ?Sized> Outbox<S, BincodeCodec> {
    /// An outbox using the bincode codec and the system clock.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self::with_codec(store, BincodeCodec)
    }
}

impl<S: OutboxStore + ?Sized, C: Codec> Outbox<S, C> {
    /// An outbox using `codec` and the system clock.
    #[must_use]
    pub fn with_codec(store: Arc<S>, codec: C) -> Self {
        Self {
            store,
            codec,
            clock: Arc::new(SystemClock),
            waker: None,
        }
    }

    /// Timestamp records with `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Notify `waker` after every staged record.
    ///
    /// Pass [`OutboxRelay::waker`](crate::relay::OutboxRelay::waker) so the relay
    /// drains without waiting for its poll interval.
    #[must_use]
    pub fn with_waker(mut self, waker: Arc<Notify>) -> Self {
        self.waker = Some(waker);
        self
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The codec records are encoded with.
    #[must_use]
    pub const fn codec(&self) -> &C {
        &self.codec
    }

    /// Encode `event` and persist it as a new `Pending` record.
    ///
    /// Returns the fresh record id. Encoding and store errors become
    /// [`Reason::Infrastructure`] failures; a cancelled context stages nothing.
    pub async fn add<E>(&self, event: &E, ctx: &Context) -> Outcome<RecordId>
    where
        E: Event + Serialize,
    {
        if let Err(reason) = ctx.ensure_active() {
            return Outcome::failure(reason);
        }

        let event_type = event.event_type();
        let metadata = serde_json::json!({
            "correlation_id": ctx.correlation_id().to_string(),
            "content_type": self.codec.content_type(),
        });
        let encoded = match SerializedEvent::encode(event, &self.codec, Some(metadata)) {
            Ok(encoded) => encoded,
            Err(error) => {
                tracing::error!(event_type, error = %error, "Failed to encode event for outbox");
                OutboxMetrics::record_stage_error();
                return Outcome::failure(Reason::infrastructure("codec", error));
            }
        };

        let id = Uuid::new_v4();
        let record = OutboxRecord::pending(
            id,
            event.destination(),
            encoded,
            ctx.correlation_id(),
            self.clock.now(),
        );

        match self.store.add(record).await {
            Ok(()) => {
                tracing::debug!(
                    event_type,
                    record_id = %id,
                    correlation_id = %ctx.correlation_id(),
                    "Event staged in outbox"
                );
                OutboxMetrics::record_staged(event_type);
                if let Some(waker) = &self.waker {
                    waker.notify_one();
                }
                Outcome::success(id).with_metadata(keys::RECORD_ID, id.to_string())
            }
            Err(error) => {
                tracing::error!(
                    event_type,
                    correlation_id = %ctx.correlation_id(),
                    error = %error,
                    "Failed to stage event in outbox"
                );
                OutboxMetrics::record_stage_error();
                Outcome::failure(Reason::infrastructure("outbox", error))
            }
        }
    }
}

impl<S: OutboxStore + ?Sized, C: Clone> Clone for Outbox<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            codec: self.codec.clone(),
            clock: Arc::clone(&self.clock),
            waker: self.waker.clone(),
        }
    }
}

impl<S: OutboxStore + ?Sized, C: std::fmt::Debug> std::fmt::Debug for Outbox<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("codec", &self.codec)
            .field("waker", &self.waker.is_some())
            .finish_non_exhaustive()
    }
}
