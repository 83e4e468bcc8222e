//! Outbox relay.
//!
//! Background worker that drains `Pending` outbox records through a
//! [`Transport`]. Each record is attempted independently under the configured
//! [`RetryPolicy`] (optionally with a per-attempt [`TimeoutPolicy`]):
//!
//! - delivered: the record is marked `Delivered` (or removed when
//!   `delete_delivered` is set);
//! - retries exhausted or declined: the record is marked `Failed` with the
//!   total attempt count and last error, and is never retried automatically;
//! - relay shutting down: the record stays `Pending` for the next run.
//!
//! Delivery is at-least-once. A crash between a successful send and the store
//! update redelivers the record on restart, so consumers deduplicate on the
//! correlation id carried in the event metadata.

use crate::metrics::RelayMetrics;
use crate::policy::{Policy, PolicyExt, Wrapped};
use crate::retry::RetryPolicy;
use crate::timeout::TimeoutPolicy;
use chrono::Utc;
use courier_core::context::Context;
use courier_core::outbox::{OutboxError, OutboxRecord, OutboxStore};
use courier_core::outcome::{Outcome, Reason};
use courier_core::transport::{Transport, TransportError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Relay tuning.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Maximum records fetched per batch.
    pub batch_size: usize,
    /// How long to sleep when the outbox is drained.
    pub poll_interval: Duration,
    /// Retry policy applied to each record.
    pub retry: RetryPolicy,
    /// Deadline for a single send attempt.
    pub attempt_timeout: Option<Duration>,
    /// Remove delivered records instead of marking them.
    pub delete_delivered: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_millis(500),
            retry: RetryPolicy::default(),
            attempt_timeout: None,
            delete_delivered: false,
        }
    }
}

impl RelayConfig {
    /// Set the batch size (at least 1).
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the idle poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the per-record retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bound every send attempt.
    #[must_use]
    pub const fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Remove delivered records from the store.
    #[must_use]
    pub const fn with_delete_delivered(mut self, delete: bool) -> Self {
        self.delete_delivered = delete;
        self
    }
}

/// Errors that abort a relay batch.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The store could not be read.
    #[error("Outbox store error: {0}")]
    Store(#[from] OutboxError),
}

/// Result of one [`OutboxRelay::process_batch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Records fetched from the store.
    pub fetched: usize,
    /// Records sent and marked delivered.
    pub delivered: usize,
    /// Records marked failed.
    pub failed: usize,
    /// Records left pending because the relay is shutting down.
    pub left_pending: usize,
    /// Wall-clock time of the batch.
    pub duration: Duration,
}

impl BatchReport {
    /// Whether every fetched record reached a terminal state.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.delivered + self.failed == self.fetched
    }
}

/// Cumulative relay counters.
#[derive(Debug, Default)]
pub struct RelayStats {
    batches: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    store_errors: AtomicU64,
}

impl RelayStats {
    /// Batches processed.
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Records delivered.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Records marked failed.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Store errors seen.
    pub fn store_errors(&self) -> u64 {
        self.store_errors.load(Ordering::Relaxed)
    }

    fn store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
        RelayMetrics::record_store_error();
    }
}

/// Drains an outbox through a transport.
pub struct OutboxRelay<S: OutboxStore + ?Sized, T> {
    store: Arc<S>,
    transport: T,
    config: RelayConfig,
    policy: Wrapped<RetryPolicy, Option<TimeoutPolicy>>,
    waker: Arc<Notify>,
    stats: Arc<RelayStats>,
}

impl<S: OutboxStore + ?Sized, T: Transport> OutboxRelay<S, T> {
    /// Create a relay over `store` and `transport`.
    #[must_use]
    pub fn new(store: Arc<S>, transport: T, config: RelayConfig) -> Self {
        let policy = config
            .retry
            .clone()
            .wrap(config.attempt_timeout.map(TimeoutPolicy::new));
        Self {
            store,
            transport,
            config,
            policy,
            waker: Arc::new(Notify::new()),
            stats: Arc::new(RelayStats::default()),
        }
    }

    /// Signal that wakes an idle relay. Hand it to
    /// [`Outbox::with_waker`](crate::outbox::Outbox::with_waker).
    #[must_use]
    pub fn waker(&self) -> Arc<Notify> {
        Arc::clone(&self.waker)
    }

    /// Cumulative counters.
    #[must_use]
    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    /// The relay configuration.
    #[must_use]
    pub const fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Fetch one batch of pending records and attempt each.
    ///
    /// Stops early, leaving the rest `Pending`, once `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Store`] when pending records cannot be fetched.
    /// Errors while marking a record are logged and counted, not returned.
    pub async fn process_batch(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<BatchReport, RelayError> {
        let started = Instant::now();
        let records = match self.store.fetch_pending(self.config.batch_size).await {
            Ok(records) => records,
            Err(e) => {
                self.stats.store_error();
                return Err(e.into());
            }
        };

        let mut report = BatchReport {
            fetched: records.len(),
            ..BatchReport::default()
        };
        if records.is_empty() {
            return Ok(report);
        }
        debug!(count = records.len(), "Processing outbox batch");

        for record in &records {
            if shutdown.is_cancelled() {
                break;
            }
            let outcome = self.deliver(record, shutdown).await;
            let attempts = record
                .attempts
                .saturating_add(outcome.attempts().unwrap_or(1));

            match outcome.reasons() {
                None => {
                    if self.settle_delivered(record, attempts).await {
                        report.delivered += 1;
                    }
                }
                Some(_) if shutdown.is_cancelled() => {
                    debug!(record_id = %record.id, "Relay stopping, record left pending");
                    break;
                }
                Some(reasons) => {
                    error!(
                        record_id = %record.id,
                        event_type = %record.event.event_type,
                        destination = %record.destination,
                        attempts,
                        error = %reasons,
                        "Outbox delivery failed, marking record failed"
                    );
                    match self
                        .store
                        .mark_failed(record.id, attempts, &reasons.to_string())
                        .await
                    {
                        Ok(()) => report.failed += 1,
                        Err(e) => {
                            error!(record_id = %record.id, error = %e, "Failed to mark record failed");
                            self.stats.store_error();
                        }
                    }
                }
            }
        }

        report.left_pending = report.fetched - report.delivered - report.failed;
        report.duration = started.elapsed();

        self.stats.batches.fetch_add(1, Ordering::Relaxed);
        self.stats
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.stats
            .failed
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        RelayMetrics::record_batch(report.delivered, report.failed, report.duration);
        match self.store.pending_count().await {
            Ok(pending) => RelayMetrics::record_pending(pending),
            Err(e) => {
                warn!(error = %e, "Failed to read pending outbox count");
                self.stats.store_error();
            }
        }

        info!(
            fetched = report.fetched,
            delivered = report.delivered,
            failed = report.failed,
            left_pending = report.left_pending,
            elapsed_ms = report.duration.as_millis(),
            "Outbox batch processed"
        );
        Ok(report)
    }

    /// Send one record under the relay policy.
    async fn deliver(&self, record: &OutboxRecord, shutdown: &CancellationToken) -> Outcome<()> {
        let ctx = Context::new(record.correlation_id, Utc::now(), shutdown.child_token());
        let transport = &self.transport;

        self.policy
            .execute(ctx, move |ctx: Context| async move {
                match transport
                    .send(&record.destination, &record.event, ctx.cancellation())
                    .await
                {
                    Ok(()) => Outcome::success(()),
                    Err(TransportError::Cancelled) => Outcome::failure(Reason::Cancelled),
                    Err(e) => {
                        warn!(
                            record_id = %record.id,
                            destination = %record.destination,
                            error = %e,
                            "Transport send failed"
                        );
                        Outcome::failure(Reason::infrastructure("transport", e))
                    }
                }
            })
            .await
    }

    async fn settle_delivered(&self, record: &OutboxRecord, attempts: u32) -> bool {
        let result = if self.config.delete_delivered {
            self.store.remove(record.id).await
        } else {
            self.store.mark_delivered(record.id, attempts).await
        };
        match result {
            Ok(()) => {
                debug!(record_id = %record.id, attempts, "Outbox record delivered");
                true
            }
            Err(e) => {
                // The send went through; the record will be redelivered.
                error!(record_id = %record.id, error = %e, "Failed to mark record delivered");
                self.stats.store_error();
                false
            }
        }
    }

    /// Process batches until `shutdown` fires.
    ///
    /// A full, settled batch is followed immediately by the next one. Otherwise
    /// the relay waits for the poll interval, a waker notification or shutdown,
    /// whichever comes first.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis(),
            "Starting outbox relay"
        );

        while !shutdown.is_cancelled() {
            let drain_again = match self.process_batch(&shutdown).await {
                Ok(report) => report.fetched >= self.config.batch_size && report.is_settled(),
                Err(e) => {
                    error!(error = %e, "Outbox relay batch failed");
                    false
                }
            };
            if drain_again {
                continue;
            }

            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                () = self.waker.notified() => {}
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!(
            delivered = self.stats.delivered(),
            failed = self.stats.failed(),
            "Outbox relay stopped"
        );
    }
}

impl<S, T> OutboxRelay<S, T>
where
    S: OutboxStore + ?Sized + 'static,
    T: Transport + 'static,
{
    /// Run the relay on its own task.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.retry.max_attempts(), 3);
        assert!(config.attempt_timeout.is_none());
        assert!(!config.delete_delivered);
    }

    #[test]
    fn batch_size_is_at_least_one() {
        assert_eq!(RelayConfig::default().with_batch_size(0).batch_size, 1);
    }

    #[test]
    fn settled_report() {
        let settled = BatchReport {
            fetched: 3,
            delivered: 2,
            failed: 1,
            ..BatchReport::default()
        };
        let interrupted = BatchReport {
            fetched: 3,
            delivered: 2,
            left_pending: 1,
            ..BatchReport::default()
        };
        assert!(settled.is_settled());
        assert!(!interrupted.is_settled());
    }
}
