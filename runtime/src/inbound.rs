//! Inbound consumption.
//!
//! The receiving side of the outbox: an [`InboundRouter`] maps type
//! descriptors to decoders, decodes each transport message and publishes the
//! event to local handlers through a [`Publisher`].
//!
//! Messages with an unknown descriptor are skipped and counted, never fatal.
//! The correlation id written by the producing outbox is restored into the
//! handler context so one logical flow keeps one id across processes.
//!
//! # Example
//!
//! ```rust,ignore
//! let router = InboundRouter::new(publisher)
//!     .on::<OrderCreated>("OrderCreated.v1")
//!     .on::<OrderCancelled>("OrderCancelled.v1");
//!
//! let report = router
//!     .consume(&transport, &["orders"], &DefaultContextFactory::new(), &shutdown)
//!     .await?;
//! ```

use crate::metrics::InboundMetrics;
use crate::publisher::Publisher;
use courier_core::codec::{BincodeCodec, Codec, CodecError};
use courier_core::context::{Context, ContextFactory};
use courier_core::event::{Event, SerializedEvent};
use courier_core::outbox::OutboxStore;
use courier_core::outcome::Outcome;
use courier_core::resolver::DependencyResolver;
use courier_core::transport::{InboundStream, Transport, TransportError};
use futures::StreamExt;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type RouteFn<D, S, C, K> = for<'a> fn(
    &'a Publisher<D, S, C>,
    &'a K,
    &'a SerializedEvent,
    &'a Context,
) -> Result<BoxFuture<'a, Outcome<()>>, CodecError>;

fn route<'a, E, D, S, C, K>(
    publisher: &'a Publisher<D, S, C>,
    codec: &'a K,
    event: &'a SerializedEvent,
    ctx: &'a Context,
) -> Result<BoxFuture<'a, Outcome<()>>, CodecError>
where
    E: Event + DeserializeOwned,
    D: DependencyResolver,
    S: OutboxStore + ?Sized,
    C: Codec,
    K: Codec,
{
    let decoded: E = event.decode(codec)?;
    Ok(Box::pin(publisher.publish_local(Arc::new(decoded), ctx)))
}

/// What happened to one inbound message.
#[derive(Debug)]
pub enum Routed {
    /// Decoded and published; carries the aggregate handler outcome.
    Dispatched(Outcome<()>),
    /// No decoder registered for the type descriptor.
    Skipped,
    /// The payload did not decode.
    Undecodable(CodecError),
}

/// Counters for one [`InboundRouter::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InboundReport {
    /// Messages taken off the stream.
    pub received: usize,
    /// Messages whose handlers all succeeded.
    pub dispatched: usize,
    /// Messages with an unknown type descriptor.
    pub skipped: usize,
    /// Messages with at least one failing handler.
    pub failed: usize,
    /// Stream errors and undecodable payloads.
    pub errors: usize,
}

/// Decodes inbound messages and publishes them locally.
pub struct InboundRouter<D, S: OutboxStore + ?Sized = dyn OutboxStore, C = BincodeCodec, K = BincodeCodec>
{
    publisher: Publisher<D, S, C>,
    codec: K,
    routes: HashMap<String, RouteFn<D, S, C, K>>,
}

impl<D: DependencyResolver, S: OutboxStore + ?Sized, C: Codec> InboundRouter<D, S, C> {
    /// A router decoding with the bincode codec.
    #[must_use]
    pub fn new(publisher: Publisher<D, S, C>) -> Self {
        Self::with_codec(publisher, BincodeCodec)
    }
}

impl<D, S, C, K> InboundRouter<D, S, C, K>
where
    D: DependencyResolver,
    S: OutboxStore + ?Sized,
    C: Codec,
    K: Codec,
{
    /// A router decoding with `codec`.
    #[must_use]
    pub fn with_codec(publisher: Publisher<D, S, C>, codec: K) -> Self {
        Self {
            publisher,
            codec,
            routes: HashMap::new(),
        }
    }

    /// Decode messages tagged `event_type` as `E`.
    ///
    /// A later registration for the same descriptor replaces the earlier one.
    #[must_use]
    pub fn on<E: Event + DeserializeOwned>(mut self, event_type: impl Into<String>) -> Self {
        let event_type = event_type.into();
        if self
            .routes
            .insert(event_type.clone(), route::<E, D, S, C, K>)
            .is_some()
        {
            tracing::warn!(event_type = %event_type, "Replacing inbound route");
        }
        self
    }

    /// Whether a decoder is registered for `event_type`.
    #[must_use]
    pub fn handles(&self, event_type: &str) -> bool {
        self.routes.contains_key(event_type)
    }

    /// The publisher decoded events go through.
    #[must_use]
    pub const fn publisher(&self) -> &Publisher<D, S, C> {
        &self.publisher
    }

    /// Decode and publish one message.
    pub async fn dispatch(&self, event: &SerializedEvent, ctx: &Context) -> Routed {
        let Some(route) = self.routes.get(event.event_type.as_str()) else {
            tracing::debug!(event_type = %event.event_type, "No inbound route, skipping");
            return Routed::Skipped;
        };
        match route(&self.publisher, &self.codec, event, ctx) {
            Ok(publish) => Routed::Dispatched(publish.await),
            Err(e) => {
                tracing::warn!(
                    event_type = %event.event_type,
                    correlation_id = %ctx.correlation_id(),
                    error = %e,
                    "Failed to decode inbound event"
                );
                Routed::Undecodable(e)
            }
        }
    }

    /// Consume `stream` until it ends or `shutdown` fires.
    pub async fn run(
        &self,
        mut stream: InboundStream,
        factory: &dyn ContextFactory,
        shutdown: &CancellationToken,
    ) -> InboundReport {
        let mut report = InboundReport::default();

        loop {
            let next = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                next = stream.next() => next,
            };
            let Some(item) = next else {
                break;
            };

            let message = match item {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(error = %e, "Inbound stream error");
                    InboundMetrics::record_error();
                    report.errors += 1;
                    continue;
                }
            };
            report.received += 1;
            InboundMetrics::record_received();

            let ctx = restore_correlation(factory.create(), &message.event);
            match self.dispatch(&message.event, &ctx).await {
                Routed::Dispatched(outcome) if outcome.is_success() => report.dispatched += 1,
                Routed::Dispatched(_) => report.failed += 1,
                Routed::Skipped => {
                    InboundMetrics::record_skipped();
                    report.skipped += 1;
                }
                Routed::Undecodable(_) => {
                    InboundMetrics::record_error();
                    report.errors += 1;
                }
            }
        }

        tracing::info!(
            received = report.received,
            dispatched = report.dispatched,
            skipped = report.skipped,
            failed = report.failed,
            errors = report.errors,
            "Inbound consumer stopped"
        );
        report
    }

    /// Subscribe to `destinations` on `transport` and [`run`](Self::run).
    ///
    /// # Errors
    ///
    /// Returns the transport error when the subscription cannot be opened.
    pub async fn consume<T: Transport + ?Sized>(
        &self,
        transport: &T,
        destinations: &[&str],
        factory: &dyn ContextFactory,
        shutdown: &CancellationToken,
    ) -> Result<InboundReport, TransportError> {
        let stream = transport.receive(destinations).await?;
        Ok(self.run(stream, factory, shutdown).await)
    }
}

fn restore_correlation(ctx: Context, event: &SerializedEvent) -> Context {
    match event.correlation_id().map(Uuid::parse_str) {
        Some(Ok(id)) => ctx.with_correlation_id(id),
        _ => ctx,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use courier_core::handler::FnEventHandler;
    use courier_core::resolver::HandlerRegistry;
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Shipped {
        order_id: u64,
    }

    impl Event for Shipped {
        fn event_type(&self) -> &'static str {
            "Shipped.v1"
        }
    }

    fn router(seen: &Arc<Mutex<Vec<(u64, Uuid)>>>) -> InboundRouter<HandlerRegistry> {
        let seen = Arc::clone(seen);
        let registry = HandlerRegistry::builder()
            .event::<Shipped>(FnEventHandler::new(
                "record",
                move |event: Shipped, ctx: Context| {
                    let seen = Arc::clone(&seen);
                    async move {
                        seen.lock().unwrap().push((event.order_id, ctx.correlation_id()));
                        Outcome::success(())
                    }
                },
            ))
            .build()
            .unwrap();
        InboundRouter::new(Publisher::new(registry)).on::<Shipped>("Shipped.v1")
    }

    #[tokio::test]
    async fn decodes_and_publishes_known_types() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let router = router(&seen);
        let event = SerializedEvent::encode(&Shipped { order_id: 7 }, &BincodeCodec, None).unwrap();
        let ctx = Context::root();

        let routed = router.dispatch(&event, &ctx).await;

        assert!(matches!(routed, Routed::Dispatched(outcome) if outcome.is_success()));
        assert_eq!(*seen.lock().unwrap(), vec![(7, ctx.correlation_id())]);
    }

    #[tokio::test]
    async fn unknown_types_are_skipped() {
        let router = router(&Arc::new(Mutex::new(Vec::new())));
        let event = SerializedEvent::new("Unknown.v1".to_string(), vec![1, 2, 3], None);

        assert!(matches!(
            router.dispatch(&event, &Context::root()).await,
            Routed::Skipped
        ));
        assert!(!router.handles("Unknown.v1"));
    }

    #[tokio::test]
    async fn garbage_payload_is_undecodable() {
        let router = router(&Arc::new(Mutex::new(Vec::new())));
        let event = SerializedEvent::new("Shipped.v1".to_string(), vec![1], None);

        assert!(matches!(
            router.dispatch(&event, &Context::root()).await,
            Routed::Undecodable(CodecError::Decode { .. })
        ));
    }

    #[test]
    fn correlation_id_is_restored_from_metadata() {
        let id = Uuid::new_v4();
        let event = SerializedEvent::new(
            "Shipped.v1".to_string(),
            Vec::new(),
            Some(serde_json::json!({ "correlation_id": id.to_string() })),
        );

        assert_eq!(restore_correlation(Context::root(), &event).correlation_id(), id);
    }
}
