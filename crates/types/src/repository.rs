use serde::{Deserialize, Serialize};

use crate::{
    id::{RepositoryCopyId, RepositoryId, SubmissionId},
    status::CopyStatus,
};

/// A downstream archive a submission can target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    id: RepositoryId,
    name: String,
    /// Key used to look up the runtime repository configuration for this
    /// archive.
    repository_key: String,
}

impl Repository {
    pub fn new(
        id: RepositoryId,
        name: impl Into<String>,
        repository_key: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            repository_key: repository_key.into(),
        }
    }

    pub fn id(&self) -> &RepositoryId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn repository_key(&self) -> &str {
        &self.repository_key
    }
}

/// Evidence that an archive took custody of a submission's package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryCopy {
    id: RepositoryCopyId,
    submission: SubmissionId,
    repository: RepositoryId,
    copy_status: CopyStatus,
    /// The archive's identifiers for the copy, e.g. its final URL or the
    /// stored path.
    external_ids: Vec<String>,
}

impl RepositoryCopy {
    pub fn new(id: RepositoryCopyId, submission: SubmissionId, repository: RepositoryId) -> Self {
        Self {
            id,
            submission,
            repository,
            copy_status: CopyStatus::InProgress,
            external_ids: Vec::new(),
        }
    }

    pub fn id(&self) -> &RepositoryCopyId {
        &self.id
    }

    pub fn submission(&self) -> &SubmissionId {
        &self.submission
    }

    pub fn repository(&self) -> &RepositoryId {
        &self.repository
    }

    pub fn copy_status(&self) -> CopyStatus {
        self.copy_status
    }

    pub fn external_ids(&self) -> &[String] {
        &self.external_ids
    }

    pub fn set_copy_status(&mut self, status: CopyStatus) {
        self.copy_status = status;
    }

    pub fn add_external_id(&mut self, id: impl Into<String>) {
        let id = id.into();
        if !self.external_ids.contains(&id) {
            self.external_ids.push(id);
        }
    }
}
