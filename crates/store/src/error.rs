use deposit_types::RecordKind;
use thiserror::Error;

/// Errors surfaced by record-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with the given id (or it is not yet index-visible for
    /// lookups that went through the secondary index).
    #[error("no {kind:?} record with id {id}")]
    NotFound { kind: RecordKind, id: String },

    /// A record with this id already exists.
    #[error("{kind:?} record {id} already exists")]
    AlreadyExists { kind: RecordKind, id: String },

    /// Conditional update lost the race: the stored version moved past the
    /// one observed at read time.
    #[error("version conflict on {kind:?} {id}: update at {expected}, store at {found}")]
    VersionConflict {
        kind: RecordKind,
        id: String,
        expected: u64,
        found: u64,
    },

    /// The stored body does not deserialize as the requested type.
    #[error("malformed {kind:?} record {id}")]
    Malformed {
        kind: RecordKind,
        id: String,
        #[source]
        source: serde_json::Error,
    },

    /// A record body failed to serialize.
    #[error("unserializable {kind:?} record")]
    Unserializable {
        kind: RecordKind,
        #[source]
        source: serde_json::Error,
    },

    /// A record body is structurally unusable (e.g. missing its id).
    #[error("invalid {kind:?} record body: {reason}")]
    InvalidBody { kind: RecordKind, reason: String },

    /// Transport-level failure talking to a remote store backend.
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Version conflicts are retried transparently by the critical section;
    /// everything else propagates.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}
