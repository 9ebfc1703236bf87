//! The record contract the store crate operates on.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{Deposit, Repository, RepositoryCopy, Submission};

/// Kinds of entity the record store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordKind {
    Submission,
    Repository,
    Deposit,
    RepositoryCopy,
}

/// A value type the record store can persist.
///
/// Records serialize to a JSON object whose top-level scalar fields are
/// what the store's secondary index covers; `find_by_attribute` queries
/// match against those serialized field values.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The kind tag records of this type are stored under.
    const KIND: RecordKind;

    /// The record-store id of this entity.
    fn record_id(&self) -> &str;
}

impl Record for Submission {
    const KIND: RecordKind = RecordKind::Submission;

    fn record_id(&self) -> &str {
        self.id().as_str()
    }
}

impl Record for Repository {
    const KIND: RecordKind = RecordKind::Repository;

    fn record_id(&self) -> &str {
        self.id().as_str()
    }
}

impl Record for Deposit {
    const KIND: RecordKind = RecordKind::Deposit;

    fn record_id(&self) -> &str {
        self.id().as_str()
    }
}

impl Record for RepositoryCopy {
    const KIND: RecordKind = RecordKind::RepositoryCopy;

    fn record_id(&self) -> &str {
        self.id().as_str()
    }
}

#[cfg(test)]
mod tests {
    use crate::{DepositId, RepositoryId, SubmissionId};

    use super::*;

    #[test]
    fn deposit_serializes_index_fields_at_top_level() {
        let deposit = Deposit::new(
            DepositId::new("d1"),
            SubmissionId::new("s1"),
            RepositoryId::new("r1"),
        );
        let body = serde_json::to_value(&deposit).unwrap();
        assert_eq!(body["submission"], "s1");
        assert_eq!(body["repository"], "r1");
        assert_eq!(body["depositStatus"], "not-started");
    }

    #[test]
    fn submission_round_trips_through_json() {
        let mut submission =
            Submission::new(SubmissionId::new("s1"), vec![RepositoryId::new("r1")]);
        submission.mark_submitted();
        submission.set_metadata(serde_json::json!({"title": "On Deposits"}));

        let json = serde_json::to_string(&submission).unwrap();
        let back: Submission = serde_json::from_str(&json).unwrap();
        assert_eq!(back, submission);
    }
}
