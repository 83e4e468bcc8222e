//! Outbox records and the storage contract behind them.
//!
//! The outbox decouples "event accepted" from "event delivered". Publishing in
//! outbox mode appends a [`OutboxRecord`] in the `Pending` state; a relay later
//! fetches pending records, sends them through a transport and moves each one
//! to `Delivered` or `Failed`.
//!
//! ```text
//!             send ok                    retries exhausted
//! Pending ───────────────► Delivered    Pending ─────────────► Failed
//! ```
//!
//! Durable storage is an external collaborator: this module only defines the
//! [`OutboxStore`] trait. `courier-testing` ships an in-memory store.

use crate::event::SerializedEvent;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Identity of an outbox record.
pub type RecordId = Uuid;

/// Delivery state of a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryState {
    /// Staged, not yet delivered.
    Pending,
    /// Confirmed sent by the transport.
    Delivered,
    /// Retry policy exhausted; no further automatic attempts.
    Failed,
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Delivered => write!(f, "DELIVERED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// A staged event plus its delivery state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Record identity.
    pub id: RecordId,
    /// Where the relay sends the event.
    pub destination: String,
    /// The encoded event.
    pub event: SerializedEvent,
    /// Correlation id of the call that staged the record.
    pub correlation_id: Uuid,
    /// When the record was staged.
    pub created_at: DateTime<Utc>,
    /// Current delivery state.
    pub state: DeliveryState,
    /// Delivery attempts made so far.
    pub attempts: u32,
    /// Error from the last failed attempt.
    pub last_error: Option<String>,
}

impl OutboxRecord {
    /// A new `Pending` record with no attempts.
    #[must_use]
    pub fn pending(
        id: RecordId,
        destination: impl Into<String>,
        event: SerializedEvent,
        correlation_id: Uuid,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            destination: destination.into(),
            event,
            correlation_id,
            created_at,
            state: DeliveryState::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    /// Whether the record still awaits delivery.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state == DeliveryState::Pending
    }
}

/// Errors reported by an [`OutboxStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutboxError {
    /// The store cannot be reached.
    #[error("Outbox store unavailable: {0}")]
    Unavailable(String),

    /// No record with this id.
    #[error("Outbox record not found: {0}")]
    NotFound(RecordId),

    /// Failed to persist a record.
    #[error("Failed to write outbox record: {0}")]
    Write(String),

    /// Failed to read records.
    #[error("Failed to read outbox records: {0}")]
    Read(String),

    /// Failed to change a record's state.
    #[error("Failed to update outbox record {id}: {reason}")]
    Update {
        /// The record being updated
        id: RecordId,
        /// Store error message
        reason: String,
    },
}

/// Durable storage for outbox records.
///
/// Implementations provide their own concurrency safety: `add` may be called
/// from many tasks at once while the relay fetches and updates.
pub trait OutboxStore: Send + Sync {
    /// Persist a new record.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError`] if the record cannot be stored.
    fn add(&self, record: OutboxRecord) -> BoxFuture<'_, Result<(), OutboxError>>;

    /// Up to `batch_size` pending records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError`] if the store cannot be read.
    fn fetch_pending(
        &self,
        batch_size: usize,
    ) -> BoxFuture<'_, Result<Vec<OutboxRecord>, OutboxError>>;

    /// Transition a record to `Delivered`.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::NotFound`] for an unknown id.
    fn mark_delivered(&self, id: RecordId, attempts: u32) -> BoxFuture<'_, Result<(), OutboxError>>;

    /// Transition a record to `Failed`, keeping the last error.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::NotFound`] for an unknown id.
    fn mark_failed<'a>(
        &'a self,
        id: RecordId,
        attempts: u32,
        error: &'a str,
    ) -> BoxFuture<'a, Result<(), OutboxError>>;

    /// Delete a record.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError`] if the delete fails.
    fn remove(&self, id: RecordId) -> BoxFuture<'_, Result<(), OutboxError>>;

    /// Number of pending records.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError`] if the store cannot be read.
    fn pending_count(&self) -> BoxFuture<'_, Result<u64, OutboxError>>;
}

impl<T: OutboxStore + ?Sized> OutboxStore for std::sync::Arc<T> {
    fn add(&self, record: OutboxRecord) -> BoxFuture<'_, Result<(), OutboxError>> {
        (**self).add(record)
    }

    fn fetch_pending(
        &self,
        batch_size: usize,
    ) -> BoxFuture<'_, Result<Vec<OutboxRecord>, OutboxError>> {
        (**self).fetch_pending(batch_size)
    }

    fn mark_delivered(&self, id: RecordId, attempts: u32) -> BoxFuture<'_, Result<(), OutboxError>> {
        (**self).mark_delivered(id, attempts)
    }

    fn mark_failed<'a>(
        &'a self,
        id: RecordId,
        attempts: u32,
        error: &'a str,
    ) -> BoxFuture<'a, Result<(), OutboxError>> {
        (**self).mark_failed(id, attempts, error)
    }

    fn remove(&self, id: RecordId) -> BoxFuture<'_, Result<(), OutboxError>> {
        (**self).remove(id)
    }

    fn pending_count(&self) -> BoxFuture<'_, Result<u64, OutboxError>> {
        (**self).pending_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_record_starts_clean() {
        let record = OutboxRecord::pending(
            Uuid::new_v4(),
            "order-events",
            SerializedEvent::new("OrderCreated.v1".to_string(), vec![1], None),
            Uuid::new_v4(),
            Utc::now(),
        );

        assert!(record.is_pending());
        assert_eq!(record.attempts, 0);
        assert!(record.last_error.is_none());
    }

    #[test]
    fn delivery_state_display() {
        assert_eq!(DeliveryState::Pending.to_string(), "PENDING");
        assert_eq!(DeliveryState::Delivered.to_string(), "DELIVERED");
        assert_eq!(DeliveryState::Failed.to_string(), "FAILED");
    }
}
