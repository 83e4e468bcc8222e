//! In-memory outbox store.
//!
//! Records are kept in staging order, so `fetch_pending` returns the oldest
//! pending records first. Failures can be injected per operation to exercise
//! the infrastructure paths of the outbox and the relay.

use courier_core::outbox::{DeliveryState, OutboxError, OutboxRecord, OutboxStore, RecordId};
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Inner {
    records: Vec<OutboxRecord>,
    unavailable: bool,
    fail_next_add: Option<OutboxError>,
    fail_marks: bool,
}

/// Outbox store backed by a `Vec` behind a mutex.
///
/// Clones share the same records.
#[derive(Clone, Debug, Default)]
pub struct InMemoryOutboxStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryOutboxStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every operation fail with [`OutboxError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Fail the next `add` with `error`.
    pub fn fail_next_add(&self, error: OutboxError) {
        self.lock().fail_next_add = Some(error);
    }

    /// Make `mark_delivered`, `mark_failed` and `remove` fail.
    pub fn fail_marks(&self, fail: bool) {
        self.lock().fail_marks = fail;
    }

    /// Snapshot of every record, in staging order.
    #[must_use]
    pub fn records(&self) -> Vec<OutboxRecord> {
        self.lock().records.clone()
    }

    /// The record with `id`, if present.
    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<OutboxRecord> {
        self.lock().records.iter().find(|r| r.id == id).cloned()
    }

    /// Number of records in `state`.
    #[must_use]
    pub fn count(&self, state: DeliveryState) -> usize {
        self.lock().records.iter().filter(|r| r.state == state).count()
    }

    /// Number of stored records
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// Check if the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    fn check_available(inner: &Inner) -> Result<(), OutboxError> {
        if inner.unavailable {
            return Err(OutboxError::Unavailable("store offline".to_string()));
        }
        Ok(())
    }

    fn update(
        &self,
        id: RecordId,
        apply: impl FnOnce(&mut OutboxRecord),
    ) -> Result<(), OutboxError> {
        let mut inner = self.lock();
        Self::check_available(&inner)?;
        if inner.fail_marks {
            return Err(OutboxError::Update {
                id,
                reason: "injected failure".to_string(),
            });
        }
        let record = inner
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(OutboxError::NotFound(id))?;
        apply(record);
        Ok(())
    }
}

impl OutboxStore for InMemoryOutboxStore {
    fn add(&self, record: OutboxRecord) -> BoxFuture<'_, Result<(), OutboxError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            Self::check_available(&inner)?;
            if let Some(error) = inner.fail_next_add.take() {
                return Err(error);
            }
            if inner.records.iter().any(|r| r.id == record.id) {
                return Err(OutboxError::Write(format!("duplicate record id {}", record.id)));
            }
            inner.records.push(record);
            Ok(())
        })
    }

    fn fetch_pending(
        &self,
        batch_size: usize,
    ) -> BoxFuture<'_, Result<Vec<OutboxRecord>, OutboxError>> {
        Box::pin(async move {
            let inner = self.lock();
            Self::check_available(&inner)?;
            Ok(inner
                .records
                .iter()
                .filter(|r| r.is_pending())
                .take(batch_size)
                .cloned()
                .collect())
        })
    }

    fn mark_delivered(&self, id: RecordId, attempts: u32) -> BoxFuture<'_, Result<(), OutboxError>> {
        Box::pin(async move {
            self.update(id, |record| {
                record.state = DeliveryState::Delivered;
                record.attempts = attempts;
                record.last_error = None;
            })
        })
    }

    fn mark_failed<'a>(
        &'a self,
        id: RecordId,
        attempts: u32,
        error: &'a str,
    ) -> BoxFuture<'a, Result<(), OutboxError>> {
        Box::pin(async move {
            self.update(id, |record| {
                record.state = DeliveryState::Failed;
                record.attempts = attempts;
                record.last_error = Some(error.to_string());
            })
        })
    }

    fn remove(&self, id: RecordId) -> BoxFuture<'_, Result<(), OutboxError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            Self::check_available(&inner)?;
            if inner.fail_marks {
                return Err(OutboxError::Update {
                    id,
                    reason: "injected failure".to_string(),
                });
            }
            let before = inner.records.len();
            inner.records.retain(|r| r.id != id);
            if inner.records.len() == before {
                return Err(OutboxError::NotFound(id));
            }
            Ok(())
        })
    }

    fn pending_count(&self) -> BoxFuture<'_, Result<u64, OutboxError>> {
        Box::pin(async move {
            let inner = self.lock();
            Self::check_available(&inner)?;
            Ok(inner.records.iter().filter(|r| r.is_pending()).count() as u64)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_core::event::SerializedEvent;
    use uuid::Uuid;

    fn record() -> OutboxRecord {
        OutboxRecord::pending(
            Uuid::new_v4(),
            "orders",
            SerializedEvent::new("OrderCreated.v1".to_string(), vec![1, 2], None),
            Uuid::new_v4(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn fetches_pending_in_staging_order() {
        let store = InMemoryOutboxStore::new();
        let (a, b, c) = (record(), record(), record());
        for r in [&a, &b, &c] {
            store.add(r.clone()).await.unwrap();
        }
        store.mark_delivered(a.id, 1).await.unwrap();

        let pending = store.fetch_pending(10).await.unwrap();
        let ids: Vec<_> = pending.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![b.id, c.id]);
        assert_eq!(store.fetch_pending(1).await.unwrap().len(), 1);
        assert_eq!(store.pending_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn mark_failed_keeps_error_and_attempts() {
        let store = InMemoryOutboxStore::new();
        let r = record();
        store.add(r.clone()).await.unwrap();

        store.mark_failed(r.id, 3, "broker down").await.unwrap();

        let stored = store.get(r.id).unwrap();
        assert_eq!(stored.state, DeliveryState::Failed);
        assert_eq!(stored.attempts, 3);
        assert_eq!(stored.last_error.as_deref(), Some("broker down"));
    }

    #[tokio::test]
    async fn injected_failures() {
        let store = InMemoryOutboxStore::new();
        store.fail_next_add(OutboxError::Write("disk full".to_string()));
        assert!(store.add(record()).await.is_err());
        assert!(store.add(record()).await.is_ok());

        store.set_unavailable(true);
        assert!(matches!(
            store.fetch_pending(10).await,
            Err(OutboxError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let store = InMemoryOutboxStore::new();
        let id = Uuid::new_v4();
        assert_eq!(
            store.mark_delivered(id, 1).await,
            Err(OutboxError::NotFound(id))
        );
        assert_eq!(store.remove(id).await, Err(OutboxError::NotFound(id)));
    }
}
