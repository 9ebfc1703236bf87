//! In-memory record store.
//!
//! Production-shaped stand-in for the shared record store: versioned
//! conditional updates, a secondary attribute index with a configurable
//! visibility lag (modelling the real store's eventually consistent
//! index), and optional change-event emission for wiring the ingress in
//! dev mode and tests.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use deposit_types::{ChangeEvent, EventKind, RecordKind};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::{sync::broadcast, time::Instant};

use crate::{
    client::{RecordStore, VersionedValue},
    error::StoreError,
};

#[derive(Debug, Clone)]
struct StoredRecord {
    version: u64,
    body: Value,
    /// When the secondary index catches up with this write.
    index_visible_at: Instant,
}

/// In-memory [`RecordStore`] backend.
#[derive(Debug)]
pub struct InMemoryStore {
    records: RwLock<HashMap<RecordKind, HashMap<String, StoredRecord>>>,
    index_lag: Duration,
    events: Option<broadcast::Sender<ChangeEvent>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// An empty store with an immediately consistent index.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            index_lag: Duration::ZERO,
            events: None,
        }
    }

    /// Delays attribute-index visibility of every write by `lag`.
    pub fn with_index_lag(mut self, lag: Duration) -> Self {
        self.index_lag = lag;
        self
    }

    /// Emits a [`ChangeEvent`] on the given channel for every create and
    /// update.
    pub fn with_event_sender(mut self, events: broadcast::Sender<ChangeEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, id: &str, kind: RecordKind, event: EventKind) {
        if let Some(events) = &self.events {
            // Nobody listening is fine.
            let _ = events.send(ChangeEvent::new(id, kind, event));
        }
    }

    fn body_id(kind: RecordKind, body: &Value) -> Result<String, StoreError> {
        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| StoreError::InvalidBody {
                kind,
                reason: "missing id".to_owned(),
            })
    }

    fn attribute_matches(body: &Value, field: &str, value: &str) -> bool {
        match body.get(field) {
            Some(Value::String(s)) => s == value,
            Some(Value::Bool(b)) => b.to_string() == value,
            Some(Value::Number(n)) => n.to_string() == value,
            _ => false,
        }
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn create(&self, kind: RecordKind, body: Value) -> Result<String, StoreError> {
        let id = Self::body_id(kind, &body)?;
        let mut records = self.records.write();
        let of_kind = records.entry(kind).or_default();
        if of_kind.contains_key(&id) {
            return Err(StoreError::AlreadyExists { kind, id });
        }
        of_kind.insert(
            id.clone(),
            StoredRecord {
                version: 1,
                body,
                index_visible_at: Instant::now() + self.index_lag,
            },
        );
        drop(records);

        self.emit(&id, kind, EventKind::Created);
        Ok(id)
    }

    async fn read(&self, kind: RecordKind, id: &str) -> Result<VersionedValue, StoreError> {
        let records = self.records.read();
        let stored = records
            .get(&kind)
            .and_then(|of_kind| of_kind.get(id))
            .ok_or_else(|| StoreError::NotFound {
                kind,
                id: id.to_owned(),
            })?;
        Ok(VersionedValue {
            version: stored.version,
            body: stored.body.clone(),
        })
    }

    async fn update(
        &self,
        kind: RecordKind,
        id: &str,
        expected_version: u64,
        body: Value,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write();
        let stored = records
            .get_mut(&kind)
            .and_then(|of_kind| of_kind.get_mut(id))
            .ok_or_else(|| StoreError::NotFound {
                kind,
                id: id.to_owned(),
            })?;

        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                kind,
                id: id.to_owned(),
                expected: expected_version,
                found: stored.version,
            });
        }

        stored.version += 1;
        stored.body = body;
        stored.index_visible_at = Instant::now() + self.index_lag;
        drop(records);

        self.emit(id, kind, EventKind::Modified);
        Ok(())
    }

    async fn find_by_attribute(
        &self,
        kind: RecordKind,
        field: &str,
        value: &str,
    ) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        let records = self.records.read();
        let Some(of_kind) = records.get(&kind) else {
            return Ok(Vec::new());
        };

        let mut ids: Vec<String> = of_kind
            .iter()
            .filter(|(_, stored)| stored.index_visible_at <= now)
            .filter(|(_, stored)| Self::attribute_matches(&stored.body, field, value))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use deposit_types::{Deposit, DepositId, RepositoryId, SubmissionId};

    use crate::client::RecordStoreExt;

    use super::*;

    fn deposit(id: &str) -> Deposit {
        Deposit::new(
            DepositId::new(id),
            SubmissionId::new("s1"),
            RepositoryId::new("r1"),
        )
    }

    #[tokio::test]
    async fn create_read_update_round_trip() {
        let store = InMemoryStore::new();
        let d = deposit("d1");
        store.create_record(&d).await.unwrap();

        let read = store.read_record::<Deposit>("d1").await.unwrap();
        assert_eq!(read.version(), 1);
        assert_eq!(read.record(), &d);

        let mut updated = read.record().clone();
        updated.set_status_message(Some("sent".to_owned()));
        store.update_record(read.version(), &updated).await.unwrap();

        let read2 = store.read_record::<Deposit>("d1").await.unwrap();
        assert_eq!(read2.version(), 2);
        assert_eq!(read2.record().status_message(), Some("sent"));
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let store = InMemoryStore::new();
        store.create_record(&deposit("d1")).await.unwrap();
        let err = store.create_record(&deposit("d1")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let store = InMemoryStore::new();
        let d = deposit("d1");
        store.create_record(&d).await.unwrap();
        store.update_record(1, &d).await.unwrap();

        let err = store.update_record(1, &d).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(matches!(
            err,
            StoreError::VersionConflict {
                expected: 1,
                found: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn attribute_lookup_matches_serialized_fields() {
        let store = InMemoryStore::new();
        store.create_record(&deposit("d1")).await.unwrap();
        store.create_record(&deposit("d2")).await.unwrap();

        let ids = store
            .find_by_attribute(RecordKind::Deposit, "submission", "s1")
            .await
            .unwrap();
        assert_eq!(ids, vec!["d1", "d2"]);

        let none = store
            .find_by_attribute(RecordKind::Deposit, "submission", "s2")
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn index_lag_hides_fresh_writes() {
        let store = InMemoryStore::new().with_index_lag(Duration::from_secs(5));
        store.create_record(&deposit("d1")).await.unwrap();

        // Direct reads are immediately consistent.
        assert!(store.read_record::<Deposit>("d1").await.is_ok());

        // The index has not caught up yet.
        let ids = store
            .find_by_attribute(RecordKind::Deposit, "submission", "s1")
            .await
            .unwrap();
        assert!(ids.is_empty());

        tokio::time::sleep(Duration::from_secs(6)).await;
        let ids = store
            .find_by_attribute(RecordKind::Deposit, "submission", "s1")
            .await
            .unwrap();
        assert_eq!(ids, vec!["d1"]);
    }

    #[tokio::test]
    async fn events_are_emitted_on_writes() {
        let (tx, mut rx) = broadcast::channel(8);
        let store = InMemoryStore::new().with_event_sender(tx);
        store.create_record(&deposit("d1")).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.entity_id(), "d1");
        assert_eq!(event.entity_kind(), RecordKind::Deposit);
        assert_eq!(event.event_kind(), EventKind::Created);
    }
}
