use async_trait::async_trait;
use deposit_types::{Record, RecordKind};
use serde_json::Value;

use crate::error::StoreError;

/// A raw record body paired with the store version observed when it was
/// read. Conditional updates must present this version back.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedValue {
    pub version: u64,
    pub body: Value,
}

/// A typed record paired with its observed store version.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<R> {
    version: u64,
    record: R,
}

impl<R> Versioned<R> {
    pub fn new(version: u64, record: R) -> Self {
        Self { version, record }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn record(&self) -> &R {
        &self.record
    }

    pub fn into_record(self) -> R {
        self.record
    }
}

/// Wire-level contract of the shared record store.
///
/// Records are JSON bodies filed under a [`RecordKind`]; every stored
/// record carries a monotonically increasing version, and `update` is
/// conditional on the version the caller observed. `find_by_attribute`
/// goes through a secondary index that is only eventually consistent;
/// callers must not treat a miss as proof of absence until the bounded
/// wait in [`crate::wait_for_indexed`] has elapsed.
#[cfg_attr(feature = "test-utils", mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Files a new record under the id carried in its body. Returns the id.
    async fn create(&self, kind: RecordKind, body: Value) -> Result<String, StoreError>;

    /// Reads a record and the version to present back on update.
    async fn read(&self, kind: RecordKind, id: &str) -> Result<VersionedValue, StoreError>;

    /// Replaces a record's body iff the stored version still equals
    /// `expected_version`.
    async fn update(
        &self,
        kind: RecordKind,
        id: &str,
        expected_version: u64,
        body: Value,
    ) -> Result<(), StoreError>;

    /// Ids of records whose serialized top-level `field` equals `value`.
    async fn find_by_attribute(
        &self,
        kind: RecordKind,
        field: &str,
        value: &str,
    ) -> Result<Vec<String>, StoreError>;
}

/// Typed serde layer over [`RecordStore`].
#[async_trait]
pub trait RecordStoreExt: RecordStore {
    /// Files a typed record, returning its id.
    async fn create_record<R: Record>(&self, record: &R) -> Result<String, StoreError> {
        let body = serde_json::to_value(record).map_err(|source| StoreError::Unserializable {
            kind: R::KIND,
            source,
        })?;
        self.create(R::KIND, body).await
    }

    /// Reads a typed record with its version.
    async fn read_record<R: Record>(&self, id: &str) -> Result<Versioned<R>, StoreError> {
        let raw = self.read(R::KIND, id).await?;
        let record =
            serde_json::from_value(raw.body).map_err(|source| StoreError::Malformed {
                kind: R::KIND,
                id: id.to_owned(),
                source,
            })?;
        Ok(Versioned::new(raw.version, record))
    }

    /// Conditionally replaces a typed record at the observed version.
    async fn update_record<R: Record>(
        &self,
        expected_version: u64,
        record: &R,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_value(record).map_err(|source| StoreError::Unserializable {
            kind: R::KIND,
            source,
        })?;
        self.update(R::KIND, record.record_id(), expected_version, body)
            .await
    }

    /// Ids of typed records matching an indexed attribute.
    async fn find_records_by_attribute<R: Record>(
        &self,
        field: &str,
        value: &str,
    ) -> Result<Vec<String>, StoreError> {
        self.find_by_attribute(R::KIND, field, value).await
    }
}

impl<S: RecordStore + ?Sized> RecordStoreExt for S {}
