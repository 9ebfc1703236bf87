use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    id::{DepositId, RepositoryId, SubmissionId},
    status::DepositStatus,
};

/// The record of transferring one submission's package to one archive.
///
/// At most one deposit per (submission, repository) pair is non-terminal at
/// a time; the dispatcher's critical-section precondition guards this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deposit {
    id: DepositId,
    submission: SubmissionId,
    repository: RepositoryId,
    deposit_status: DepositStatus,
    /// URI of the archive-provided status document, if the transport
    /// surfaced one.
    deposit_status_ref: Option<String>,
    /// Message chain of the failure that put the deposit into failed.
    status_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Deposit {
    pub fn new(id: DepositId, submission: SubmissionId, repository: RepositoryId) -> Self {
        let now = Utc::now();
        Self {
            id,
            submission,
            repository,
            deposit_status: DepositStatus::NotStarted,
            deposit_status_ref: None,
            status_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &DepositId {
        &self.id
    }

    pub fn submission(&self) -> &SubmissionId {
        &self.submission
    }

    pub fn repository(&self) -> &RepositoryId {
        &self.repository
    }

    pub fn deposit_status(&self) -> DepositStatus {
        self.deposit_status
    }

    pub fn deposit_status_ref(&self) -> Option<&str> {
        self.deposit_status_ref.as_deref()
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn set_deposit_status(&mut self, status: DepositStatus) {
        self.deposit_status = status;
        self.updated_at = Utc::now();
    }

    pub fn set_deposit_status_ref(&mut self, status_ref: Option<String>) {
        self.deposit_status_ref = status_ref;
        self.updated_at = Utc::now();
    }

    pub fn set_status_message(&mut self, message: Option<String>) {
        self.status_message = message;
        self.updated_at = Utc::now();
    }
}
