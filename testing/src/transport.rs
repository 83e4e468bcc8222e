//! Recording transport.
//!
//! Captures every successful send, fails sends on a script and feeds inbound
//! messages to a single subscriber. Messages pushed before the subscription is
//! opened are buffered, so tests never race the consumer.

use courier_core::CancellationToken;
use courier_core::event::SerializedEvent;
use courier_core::transport::{InboundMessage, InboundStream, Transport, TransportError};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug)]
struct Inner {
    sent: Vec<(String, SerializedEvent)>,
    attempts: usize,
    scripted: VecDeque<TransportError>,
    always: Option<TransportError>,
    delay: Option<Duration>,
    inbound_tx: Option<mpsc::UnboundedSender<Result<InboundMessage, TransportError>>>,
    inbound_rx: Option<mpsc::UnboundedReceiver<Result<InboundMessage, TransportError>>>,
}

/// In-memory [`Transport`] for tests.
///
/// Clones share state.
#[derive(Clone, Debug)]
pub struct RecordingTransport {
    inner: Arc<Mutex<Inner>>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    /// A transport that accepts every send.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                sent: Vec::new(),
                attempts: 0,
                scripted: VecDeque::new(),
                always: None,
                delay: None,
                inbound_tx: Some(tx),
                inbound_rx: Some(rx),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next sends with `errors`, in order.
    #[must_use]
    pub fn with_failures(self, errors: impl IntoIterator<Item = TransportError>) -> Self {
        self.lock().scripted.extend(errors);
        self
    }

    /// Fail every send with `error` once the script is used up.
    #[must_use]
    pub fn failing_with(self, error: TransportError) -> Self {
        self.lock().always = Some(error);
        self
    }

    /// Delay every send by `delay`; cancellation aborts the wait.
    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        self.lock().delay = Some(delay);
        self
    }

    /// Stop failing sends.
    pub fn heal(&self) {
        let mut inner = self.lock();
        inner.scripted.clear();
        inner.always = None;
    }

    /// Successful sends, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<(String, SerializedEvent)> {
        self.lock().sent.clone()
    }

    /// Send calls made, successful or not.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    /// Queue an inbound message for the subscriber.
    pub fn push_inbound(&self, message: InboundMessage) {
        self.push(Ok(message));
    }

    /// Queue an inbound stream error for the subscriber.
    pub fn push_inbound_error(&self, error: TransportError) {
        self.push(Err(error));
    }

    fn push(&self, item: Result<InboundMessage, TransportError>) {
        if let Some(tx) = &self.lock().inbound_tx {
            let _ = tx.send(item);
        }
    }

    /// End the inbound stream once queued messages are consumed.
    pub fn close_inbound(&self) {
        self.lock().inbound_tx = None;
    }
}

impl Transport for RecordingTransport {
    fn send<'a>(
        &'a self,
        destination: &'a str,
        event: &'a SerializedEvent,
        cancellation: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let delay = {
                let mut inner = self.lock();
                inner.attempts += 1;
                inner.delay
            };
            if let Some(delay) = delay {
                tokio::select! {
                    () = cancellation.cancelled() => return Err(TransportError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
            if cancellation.is_cancelled() {
                return Err(TransportError::Cancelled);
            }

            let mut inner = self.lock();
            if let Some(error) = inner.scripted.pop_front().or_else(|| inner.always.clone()) {
                tracing::debug!(destination, error = %error, "Scripted transport failure");
                return Err(error);
            }
            inner.sent.push((destination.to_string(), event.clone()));
            Ok(())
        })
    }

    fn receive<'a>(
        &'a self,
        destinations: &'a [&'a str],
    ) -> Pin<Box<dyn Future<Output = Result<InboundStream, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let wanted: Vec<String> = destinations.iter().map(ToString::to_string).collect();
            let Some(mut rx) = self.lock().inbound_rx.take() else {
                return Err(TransportError::SubscriptionFailed {
                    destinations: wanted,
                    reason: "already subscribed".to_string(),
                });
            };

            let stream: InboundStream = Box::pin(async_stream::stream! {
                while let Some(item) = rx.recv().await {
                    match item {
                        Ok(message) if !wanted.contains(&message.destination) => continue,
                        item => yield item,
                    }
                }
            });
            Ok(stream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn event() -> SerializedEvent {
        SerializedEvent::new("OrderCreated.v1".to_string(), vec![7], None)
    }

    #[tokio::test]
    async fn records_successful_sends() {
        let transport = RecordingTransport::new();
        transport
            .send("orders", &event(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(transport.sent(), vec![("orders".to_string(), event())]);
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test]
    async fn scripted_failures_come_first() {
        let transport = RecordingTransport::new()
            .with_failures([TransportError::ConnectionFailed("refused".to_string())]);
        let token = CancellationToken::new();

        assert!(transport.send("orders", &event(), &token).await.is_err());
        assert!(transport.send("orders", &event(), &token).await.is_ok());
        assert_eq!(transport.attempts(), 2);
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_a_delayed_send() {
        let transport = RecordingTransport::new().with_delay(Duration::from_secs(60));
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            cancel.cancel();
        });

        let result = transport.send("orders", &event(), &token).await;

        assert_eq!(result, Err(TransportError::Cancelled));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn inbound_filters_by_destination_and_buffers() {
        let transport = RecordingTransport::new();
        transport.push_inbound(InboundMessage::new("orders", event()));
        transport.push_inbound(InboundMessage::new("billing", event()));
        transport.push_inbound(InboundMessage::new("orders", event()));
        transport.close_inbound();

        let stream = transport.receive(&["orders"]).await.unwrap();
        let received: Vec<_> = stream.collect().await;

        assert_eq!(received.len(), 2);
        assert!(transport.receive(&["orders"]).await.is_err());
    }
}
