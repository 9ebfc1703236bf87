//! Fixtures shared by the unit tests: canned repository configuration,
//! seeded records, and a scriptable transport.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use deposit_assembler::{AssemblerRegistry, METS_SPEC_URI};
use deposit_config::{
    Archive, AssemblySpec, AuthMech, AuthRealm, ChecksumAlgorithm, Compression, MappedStatus,
    ProtocolBinding, RepositoriesConfig, RepositoryConfig, StatusMapping, TransportConfig,
};
use deposit_package::OpenPackage;
use deposit_store::{memory::InMemoryStore, RecordStoreExt};
use deposit_transport::{PackageTransport, TransportError, TransportOutcome};
use deposit_types::{
    FileDescriptor, FileSource, Repository, RepositoryId, Submission, SubmissionId,
};

use crate::ctx::DepositContext;

pub(crate) const REPO_KEY: &str = "dspace-prod";
pub(crate) const STATEMENT_URL: &str = "https://archive.example.org/statement/1";

/// A sword2 repository entry with the usual status mapping.
pub(crate) fn repositories_config() -> RepositoriesConfig {
    let mut map = std::collections::HashMap::new();
    map.insert("archived".to_owned(), MappedStatus::Accepted);
    map.insert("withdrawn".to_owned(), MappedStatus::Rejected);
    map.insert("inreview".to_owned(), MappedStatus::InProgress);
    map.insert("errored".to_owned(), MappedStatus::Failed);

    let config = RepositoryConfig {
        transport: TransportConfig {
            protocol: ProtocolBinding::Sword2 {
                collection_url: "https://archive.example.org/collection".to_owned(),
                on_behalf_of: None,
            },
            auth_realms: vec![AuthRealm {
                mech: AuthMech::Userpass,
                base_url: "https://archive.example.org/".to_owned(),
                username: Some("user".to_owned()),
                password: Some("pass".to_owned()),
            }],
        },
        assembly: AssemblySpec {
            spec_uri: METS_SPEC_URI.to_owned(),
            compression: Compression::None,
            archive: Archive::Zip,
            checksums: vec![ChecksumAlgorithm::Md5],
        },
        status_mapping: StatusMapping {
            scheme: deposit_sword::STATE_SCHEME.to_owned(),
            map,
        },
    };
    RepositoriesConfig::from_entries([(REPO_KEY.to_owned(), config)])
}

/// A submission with one inline custodial file, targeting `repository`.
pub(crate) fn submission(id: &str, repository: &str) -> Submission {
    let mut s = Submission::new(SubmissionId::new(id), vec![RepositoryId::new(repository)]);
    s.set_metadata(serde_json::json!({"title": "Fixture"}));
    s.add_file(FileDescriptor::new(
        "article.pdf",
        "application/pdf",
        FileSource::Inline(b"%PDF-1.4 fixture".to_vec()),
    ));
    s
}

pub(crate) fn repository(id: &str) -> Repository {
    Repository::new(RepositoryId::new(id), "Fixture Archive", REPO_KEY)
}

/// Seeds a store with one repository and one submitted submission.
pub(crate) async fn seeded_store(submission_id: &str, repository_id: &str) -> InMemoryStore {
    let store = InMemoryStore::new();
    store.create_record(&repository(repository_id)).await.unwrap();
    let mut s = submission(submission_id, repository_id);
    s.mark_submitted();
    store.create_record(&s).await.unwrap();
    store
}

/// What the scripted transport should do on each call.
#[derive(Debug, Clone)]
pub(crate) enum TransportScript {
    /// Drain the package, then report pending with the fixture statement.
    Pending,
    /// Drain the package, then report inferred acceptance.
    Accepted(Vec<String>),
    /// Drain the package (surfacing packaging failures), then fail with
    /// the given permanent message.
    RejectWith(String),
    /// Do not touch the package; fail immediately.
    RefuseWithoutReading(String),
}

/// Hand-rolled transport double: unlike a mock it can drain the package
/// stream, which is what surfaces packaging failures.
#[derive(Debug)]
pub(crate) struct ScriptedTransport {
    script: TransportScript,
    pub(crate) calls: AtomicUsize,
}

impl ScriptedTransport {
    pub(crate) fn new(script: TransportScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackageTransport for ScriptedTransport {
    async fn transmit(
        &self,
        _config: &RepositoryConfig,
        package: &mut OpenPackage,
    ) -> Result<TransportOutcome, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            TransportScript::Pending => {
                package.read_to_vec().await?;
                Ok(TransportOutcome::pending(STATEMENT_URL, Vec::new()))
            }
            TransportScript::Accepted(ids) => {
                package.read_to_vec().await?;
                Ok(TransportOutcome::accepted(ids.clone()))
            }
            TransportScript::RejectWith(message) => {
                package.read_to_vec().await?;
                Err(TransportError::Http {
                    target: "https://archive.example.org/collection".to_owned(),
                    status: 412,
                    body: message.clone(),
                })
            }
            TransportScript::RefuseWithoutReading(message) => Err(TransportError::Http {
                target: "https://archive.example.org/collection".to_owned(),
                status: 400,
                body: message.clone(),
            }),
        }
    }
}

/// Context over the seeded fixtures.
pub(crate) fn context(
    store: Arc<InMemoryStore>,
    transport: Arc<ScriptedTransport>,
) -> DepositContext<InMemoryStore, ScriptedTransport> {
    DepositContext::new(
        store,
        transport,
        Arc::new(AssemblerRegistry::with_defaults()),
        Arc::new(repositories_config()),
    )
}
