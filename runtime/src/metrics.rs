//! Prometheus metrics for observability and monitoring.
//!
//! Every runtime component records through the `metrics` facade with a small
//! recorder struct:
//! - Request dispatch ([`DispatchMetrics`])
//! - Event publishing and fan-out ([`PublishMetrics`])
//! - Outbox staging ([`OutboxMetrics`])
//! - Relay batches and deliveries ([`RelayMetrics`])
//! - Inbound consumption ([`InboundMetrics`])
//! - Resilience policies ([`RetryMetrics`], [`TimeoutMetrics`])
//!
//! Nothing is recorded until a recorder is installed.
//! [`MetricsRecorder::install`] installs the Prometheus one for the whole
//! process and hands back its handle. Serving the rendered text is up to the
//! host application, typically behind its own `/metrics` route.
//!
//! # Example
//!
//! ```rust,no_run
//! use courier_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), courier_runtime::metrics::MetricsError> {
//! let recorder = MetricsRecorder::install()?;
//!
//! // later, from the host's scrape route
//! let text = recorder.render();
//! # let _ = text;
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from installing the Prometheus recorder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetricsError {
    /// The histogram bucket layout was rejected
    #[error("Invalid Prometheus bucket layout: {0}")]
    Buckets(String),
    /// A recorder other than ours is already installed
    #[error("Failed to install Prometheus recorder: {0}")]
    Install(String),
}

/// Seconds-scale buckets for every `*_duration_seconds` histogram.
const DURATION_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

static INSTALLED: OnceLock<Result<PrometheusHandle, MetricsError>> = OnceLock::new();

/// Handle to the process-wide Prometheus recorder.
///
/// The first [`install`](Self::install) installs the recorder and describes
/// every courier metric; later calls share the same registry.
#[derive(Clone)]
pub struct MetricsRecorder {
    handle: PrometheusHandle,
}

impl MetricsRecorder {
    /// Install the Prometheus recorder, or reuse the one installed earlier.
    ///
    /// # Errors
    ///
    /// [`MetricsError::Install`] when another recorder already owns the
    /// `metrics` facade, [`MetricsError::Buckets`] if the bucket layout is
    /// rejected.
    pub fn install() -> Result<Self, MetricsError> {
        INSTALLED
            .get_or_init(install_prometheus)
            .clone()
            .map(|handle| Self { handle })
    }

    /// The underlying exporter handle.
    #[must_use]
    pub const fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }

    /// Current metrics in the Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

fn install_prometheus() -> Result<PrometheusHandle, MetricsError> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            DURATION_BUCKETS,
        )
        .map_err(|e| MetricsError::Buckets(e.to_string()))?
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    // descriptions only reach a recorder that is already installed
    register_metrics();
    tracing::info!("Prometheus metrics recorder installed");
    Ok(handle)
}

/// Register all metric descriptions.
fn register_metrics() {
    // Dispatch
    describe_counter!(
        "courier_requests_total",
        "Total number of requests dispatched by the sender"
    );
    describe_counter!(
        "courier_request_failures_total",
        "Total number of requests that returned a failure outcome"
    );
    describe_counter!(
        "courier_handler_not_found_total",
        "Total number of requests with no registered handler"
    );
    describe_counter!(
        "courier_handler_panics_total",
        "Total number of panics caught at a dispatch boundary"
    );
    describe_histogram!(
        "courier_request_duration_seconds",
        "Time taken to dispatch a request through its pipeline"
    );

    // Publishing
    describe_counter!(
        "courier_events_published_total",
        "Total number of events published locally"
    );
    describe_counter!(
        "courier_event_handler_failures_total",
        "Total number of failing event handler invocations"
    );
    describe_histogram!(
        "courier_publish_duration_seconds",
        "Time taken to fan an event out to its handlers"
    );

    // Outbox
    describe_counter!(
        "courier_outbox_staged_total",
        "Total number of events staged in the outbox"
    );
    describe_counter!(
        "courier_outbox_stage_errors_total",
        "Total number of failed outbox staging attempts"
    );

    // Relay
    describe_counter!(
        "courier_relay_delivered_total",
        "Total number of outbox records delivered"
    );
    describe_counter!(
        "courier_relay_failed_total",
        "Total number of outbox records marked failed"
    );
    describe_counter!(
        "courier_relay_store_errors_total",
        "Total number of outbox store errors seen by the relay"
    );
    describe_gauge!(
        "courier_relay_pending",
        "Pending outbox records observed at the last batch"
    );
    describe_histogram!(
        "courier_relay_batch_duration_seconds",
        "Time taken to process one relay batch"
    );

    // Inbound
    describe_counter!(
        "courier_inbound_received_total",
        "Total number of messages received from the transport"
    );
    describe_counter!(
        "courier_inbound_skipped_total",
        "Total number of inbound messages with no registered decoder"
    );
    describe_counter!(
        "courier_inbound_errors_total",
        "Total number of inbound decode or stream errors"
    );

    // Retry
    describe_counter!(
        "courier_retry_attempts_total",
        "Total number of attempts made under a retry policy"
    );
    describe_counter!(
        "courier_retry_successes_total",
        "Total number of operations that succeeded after a retry"
    );
    describe_counter!(
        "courier_retry_exhausted_total",
        "Total number of operations that exhausted max attempts"
    );
    describe_counter!(
        "courier_retry_not_retryable_total",
        "Total number of failures a retry filter declined"
    );

    // Timeout
    describe_counter!(
        "courier_timeouts_total",
        "Total number of operations that hit their deadline"
    );
    describe_histogram!(
        "courier_timeout_elapsed_duration_seconds",
        "Time taken by operations that finished within their deadline"
    );
}

/// Request dispatch metrics recorder.
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record a dispatched request and its outcome.
    pub fn record_request(message_type: &'static str, success: bool, duration: Duration) {
        counter!("courier_requests_total", "message_type" => message_type).increment(1);
        if !success {
            counter!("courier_request_failures_total", "message_type" => message_type)
                .increment(1);
        }
        histogram!("courier_request_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a request with no handler.
    pub fn record_handler_not_found(message_type: &'static str) {
        counter!("courier_handler_not_found_total", "message_type" => message_type).increment(1);
    }

    /// Record a caught panic.
    pub fn record_panic() {
        counter!("courier_handler_panics_total").increment(1);
    }
}

/// Event publishing metrics recorder.
pub struct PublishMetrics;

impl PublishMetrics {
    /// Record a local fan-out.
    pub fn record_publish(event_type: &'static str, handlers: usize, duration: Duration) {
        counter!("courier_events_published_total", "event_type" => event_type).increment(1);
        histogram!("courier_publish_duration_seconds").record(duration.as_secs_f64());
        tracing::trace!(event_type, handlers, "Recorded publish metrics");
    }

    /// Record failing handlers of one fan-out.
    pub fn record_handler_failures(event_type: &'static str, count: usize) {
        counter!("courier_event_handler_failures_total", "event_type" => event_type)
            .increment(count as u64);
    }
}

/// Outbox staging metrics recorder.
pub struct OutboxMetrics;

impl OutboxMetrics {
    /// Record a staged record.
    pub fn record_staged(event_type: &'static str) {
        counter!("courier_outbox_staged_total", "event_type" => event_type).increment(1);
    }

    /// Record a staging failure.
    pub fn record_stage_error() {
        counter!("courier_outbox_stage_errors_total").increment(1);
    }
}

/// Relay metrics recorder.
pub struct RelayMetrics;

impl RelayMetrics {
    /// Record one processed batch.
    pub fn record_batch(delivered: usize, failed: usize, duration: Duration) {
        counter!("courier_relay_delivered_total").increment(delivered as u64);
        counter!("courier_relay_failed_total").increment(failed as u64);
        histogram!("courier_relay_batch_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record the pending backlog.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_pending(pending: u64) {
        gauge!("courier_relay_pending").set(pending as f64);
    }

    /// Record a store error.
    pub fn record_store_error() {
        counter!("courier_relay_store_errors_total").increment(1);
    }
}

/// Inbound consumption metrics recorder.
pub struct InboundMetrics;

impl InboundMetrics {
    /// Record a received message.
    pub fn record_received() {
        counter!("courier_inbound_received_total").increment(1);
    }

    /// Record a message with no registered decoder.
    pub fn record_skipped() {
        counter!("courier_inbound_skipped_total").increment(1);
    }

    /// Record a decode or stream error.
    pub fn record_error() {
        counter!("courier_inbound_errors_total").increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record an attempt.
    pub fn record_attempt() {
        counter!("courier_retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("courier_retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("courier_retry_exhausted_total").increment(1);
    }

    /// Record a failure a filter declined to retry.
    pub fn record_not_retryable() {
        counter!("courier_retry_not_retryable_total").increment(1);
    }
}

/// Timeout metrics recorder.
pub struct TimeoutMetrics;

impl TimeoutMetrics {
    /// Record an operation that finished within its deadline.
    pub fn record_completed(elapsed: Duration) {
        histogram!("courier_timeout_elapsed_duration_seconds").record(elapsed.as_secs_f64());
    }

    /// Record an operation that hit its deadline.
    pub fn record_expired() {
        counter!("courier_timeouts_total").increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn install_is_idempotent_within_the_process() {
        let first = MetricsRecorder::install().unwrap();
        let second = MetricsRecorder::install().unwrap();

        OutboxMetrics::record_staged("OrderCreated.v1");

        assert!(first.render().contains("courier_outbox_staged_total"));
        assert!(second.render().contains("courier_outbox_staged_total"));
    }

    #[test]
    fn rendered_text_carries_recorded_metrics() {
        let recorder = MetricsRecorder::install().unwrap();

        DispatchMetrics::record_request("CreateOrder", true, Duration::from_millis(3));
        OutboxMetrics::record_staged("OrderCreated.v1");
        RelayMetrics::record_batch(2, 1, Duration::from_millis(10));

        let rendered = recorder.render();
        assert!(rendered.contains("courier_requests_total"));
        assert!(rendered.contains("courier_outbox_staged_total"));
        assert!(rendered.contains("courier_relay_delivered_total"));
        assert!(rendered.contains("# HELP courier_relay_delivered_total"));
    }
}
