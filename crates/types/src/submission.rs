use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{
    id::{RepositoryId, SubmissionId},
    status::{AggregatedDepositStatus, SubmissionStatus},
};

/// A user's request to deposit a manuscript into one or more archives.
///
/// The content model (bibliographic metadata, manifest) is opaque to the
/// pipeline; assemblers interpret the metadata blob and the file list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    id: SubmissionId,
    submitted: bool,
    repositories: Vec<RepositoryId>,
    submission_status: SubmissionStatus,
    aggregated_deposit_status: AggregatedDepositStatus,
    /// Opaque bibliographic metadata consumed by assemblers.
    metadata: serde_json::Value,
    files: Vec<FileDescriptor>,
}

impl Submission {
    pub fn new(id: SubmissionId, repositories: Vec<RepositoryId>) -> Self {
        Self {
            id,
            submitted: false,
            repositories,
            submission_status: SubmissionStatus::Unsubmitted,
            aggregated_deposit_status: AggregatedDepositStatus::NotStarted,
            metadata: serde_json::Value::Null,
            files: Vec::new(),
        }
    }

    pub fn id(&self) -> &SubmissionId {
        &self.id
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    pub fn repositories(&self) -> &[RepositoryId] {
        &self.repositories
    }

    pub fn submission_status(&self) -> SubmissionStatus {
        self.submission_status
    }

    pub fn aggregated_deposit_status(&self) -> AggregatedDepositStatus {
        self.aggregated_deposit_status
    }

    pub fn metadata(&self) -> &serde_json::Value {
        &self.metadata
    }

    pub fn files(&self) -> &[FileDescriptor] {
        &self.files
    }

    /// Marks the submission as committed by the user.
    pub fn mark_submitted(&mut self) {
        self.submitted = true;
        self.submission_status = SubmissionStatus::Submitted;
    }

    pub fn set_submission_status(&mut self, status: SubmissionStatus) {
        self.submission_status = status;
    }

    pub fn set_aggregated_deposit_status(&mut self, status: AggregatedDepositStatus) {
        self.aggregated_deposit_status = status;
    }

    pub fn set_metadata(&mut self, metadata: serde_json::Value) {
        self.metadata = metadata;
    }

    pub fn add_file(&mut self, file: FileDescriptor) {
        self.files.push(file);
    }
}

/// One custodial file carried by a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    name: String,
    mime_type: String,
    source: FileSource,
}

impl FileDescriptor {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, source: FileSource) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            source,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn source(&self) -> &FileSource {
        &self.source
    }
}

/// Where a custodial file's bytes live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileSource {
    /// Bytes carried inline on the record.
    Inline(Vec<u8>),
    /// Bytes on the local filesystem.
    Path(PathBuf),
}
