//! Service-level pipeline tests: event in, terminal statuses out.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use deposit_assembler::{AssemblerRegistry, METS_SPEC_URI};
use deposit_config::{
    Archive, AssemblySpec, ChecksumAlgorithm, Compression, MappedStatus, ProtocolBinding,
    RepositoriesConfig, RepositoryConfig, ServiceConfig, StatusMapping, TransportConfig,
};
use deposit_core::{
    resolver::{FetchError, ResolverSchedule, StatementFetcher},
    DepositContext, DepositServiceBuilder,
};
use deposit_package::OpenPackage;
use deposit_store::{memory::InMemoryStore, RecordStoreExt};
use deposit_transport::{PackageTransport, TransportError, TransportOutcome};
use deposit_types::{
    AggregatedDepositStatus, CopyStatus, Deposit, DepositStatus, FileDescriptor, FileSource,
    Repository, RepositoryCopy, RepositoryId, Submission, SubmissionId, SubmissionStatus,
};
use tokio::sync::broadcast;

const REPO_KEY: &str = "archive";
const STATEMENT_URL: &str = "https://archive.example.org/statement/1";

fn repositories() -> RepositoriesConfig {
    let mut map = std::collections::HashMap::new();
    map.insert("archived".to_owned(), MappedStatus::Accepted);
    map.insert("withdrawn".to_owned(), MappedStatus::Rejected);

    RepositoriesConfig::from_entries([(
        REPO_KEY.to_owned(),
        RepositoryConfig {
            transport: TransportConfig {
                protocol: ProtocolBinding::Sword2 {
                    collection_url: "https://archive.example.org/collection".to_owned(),
                    on_behalf_of: None,
                },
                auth_realms: Vec::new(),
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
        },
    )])
}

/// Transport double: drains the package, then follows its script.
struct FakeTransport {
    reject_with: Option<String>,
}

#[async_trait]
impl PackageTransport for FakeTransport {
    async fn transmit(
        &self,
        _config: &RepositoryConfig,
        package: &mut OpenPackage,
    ) -> Result<TransportOutcome, TransportError> {
        package.read_to_vec().await?;
        match &self.reject_with {
            None => Ok(TransportOutcome::pending(STATEMENT_URL, Vec::new())),
            Some(body) => Err(TransportError::Http {
                target: "https://archive.example.org/collection".to_owned(),
                status: 412,
                body: body.clone(),
            }),
        }
    }
}

/// Fetcher double always answering with one state term.
struct FakeFetcher {
    term: &'static str,
}

#[async_trait]
impl StatementFetcher for FakeFetcher {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
        Ok(format!(
            r#"<feed xmlns="http://www.w3.org/2005/Atom">
                 <link rel="alternate" href="https://archive.example.org/item/9"/>
                 <category scheme="{}" term="{}"/>
               </feed>"#,
            deposit_sword::STATE_SCHEME,
            self.term
        )
        .into_bytes())
    }
}

fn service_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.deposit_workers = 2;
    config.aggregator_interval_secs = 1;
    config.drain_timeout_secs = 5;
    config
}

fn quick_schedule() -> ResolverSchedule {
    ResolverSchedule {
        initial: Duration::from_millis(50),
        factor: 2.0,
        cap: Duration::from_millis(200),
        total: Duration::from_secs(600),
    }
}

async fn seed(store: &InMemoryStore) {
    store
        .create_record(&Repository::new(
            RepositoryId::new("r1"),
            "Test Archive",
            REPO_KEY,
        ))
        .await
        .unwrap();

    let mut submission = Submission::new(SubmissionId::new("s1"), vec![RepositoryId::new("r1")]);
    submission.set_metadata(serde_json::json!({"title": "Pipeline"}));
    submission.add_file(FileDescriptor::new(
        "article.pdf",
        "application/pdf",
        FileSource::Inline(b"%PDF-1.4 body".to_vec()),
    ));
    store.create_record(&submission).await.unwrap();
}

async fn mark_submitted(store: &InMemoryStore) {
    let read = store.read_record::<Submission>("s1").await.unwrap();
    let mut submitted = read.record().clone();
    submitted.mark_submitted();
    store.update_record(read.version(), &submitted).await.unwrap();
}

/// Polls the store until the condition holds; panics after the budget.
async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..2_000 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test(start_paused = true)]
async fn sword_deposit_reaches_accepted_end_to_end() {
    let (events_tx, events_rx) = broadcast::channel(64);
    let store = Arc::new(InMemoryStore::new().with_event_sender(events_tx));
    seed(&store).await;

    let ctx = DepositContext::new(
        store.clone(),
        Arc::new(FakeTransport { reject_with: None }),
        Arc::new(AssemblerRegistry::with_defaults()),
        Arc::new(repositories()),
    );
    let service = DepositServiceBuilder::new(
        ctx,
        Arc::new(FakeFetcher { term: "archived" }),
        service_config(),
    )
    .with_resolver_schedule(quick_schedule())
    .spawn(events_rx);

    // The user commits the submission; the modify event drives the rest.
    mark_submitted(&store).await;

    wait_until(|| {
        let store = store.clone();
        async move {
            store
                .read_record::<Deposit>("dep-s1-r1")
                .await
                .map(|d| d.record().deposit_status() == DepositStatus::Accepted)
                .unwrap_or(false)
        }
    })
    .await;

    let deposit = store.read_record::<Deposit>("dep-s1-r1").await.unwrap();
    assert_eq!(deposit.record().deposit_status_ref(), Some(STATEMENT_URL));

    let copy = store.read_record::<RepositoryCopy>("copy-s1-r1").await.unwrap();
    assert_eq!(copy.record().copy_status(), CopyStatus::Accepted);
    assert_eq!(
        copy.record().external_ids(),
        ["https://archive.example.org/item/9"]
    );

    // The aggregator tick rolls the submission up.
    wait_until(|| {
        let store = store.clone();
        async move {
            store
                .read_record::<Submission>("s1")
                .await
                .map(|s| {
                    s.record().aggregated_deposit_status() == AggregatedDepositStatus::Accepted
                })
                .unwrap_or(false)
        }
    })
    .await;
    let submission = store.read_record::<Submission>("s1").await.unwrap();
    assert_eq!(
        submission.record().submission_status(),
        SubmissionStatus::Complete
    );

    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn archive_side_checksum_rejection_fails_the_deposit() {
    let (events_tx, events_rx) = broadcast::channel(64);
    let store = Arc::new(InMemoryStore::new().with_event_sender(events_tx));
    seed(&store).await;

    let ctx = DepositContext::new(
        store.clone(),
        Arc::new(FakeTransport {
            reject_with: Some(
                "package md5 did not match the checksum computed on receipt".to_owned(),
            ),
        }),
        Arc::new(AssemblerRegistry::with_defaults()),
        Arc::new(repositories()),
    );
    let service = DepositServiceBuilder::new(
        ctx,
        Arc::new(FakeFetcher { term: "archived" }),
        service_config(),
    )
    .with_resolver_schedule(quick_schedule())
    .spawn(events_rx);

    mark_submitted(&store).await;

    wait_until(|| {
        let store = store.clone();
        async move {
            store
                .read_record::<Deposit>("dep-s1-r1")
                .await
                .map(|d| d.record().deposit_status() == DepositStatus::Failed)
                .unwrap_or(false)
        }
    })
    .await;

    let deposit = store.read_record::<Deposit>("dep-s1-r1").await.unwrap();
    assert!(deposit
        .record()
        .status_message()
        .unwrap()
        .contains("did not match the checksum"));
    assert_eq!(deposit.record().deposit_status_ref(), None);
    // No custody evidence for a rejected transfer.
    assert!(store
        .read_record::<RepositoryCopy>("copy-s1-r1")
        .await
        .is_err());

    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rejection_terms_settle_the_submission_as_rejected() {
    let (events_tx, events_rx) = broadcast::channel(64);
    let store = Arc::new(InMemoryStore::new().with_event_sender(events_tx));
    seed(&store).await;

    let ctx = DepositContext::new(
        store.clone(),
        Arc::new(FakeTransport { reject_with: None }),
        Arc::new(AssemblerRegistry::with_defaults()),
        Arc::new(repositories()),
    );
    let service = DepositServiceBuilder::new(
        ctx,
        Arc::new(FakeFetcher { term: "withdrawn" }),
        service_config(),
    )
    .with_resolver_schedule(quick_schedule())
    .spawn(events_rx);

    mark_submitted(&store).await;

    wait_until(|| {
        let store = store.clone();
        async move {
            store
                .read_record::<Submission>("s1")
                .await
                .map(|s| {
                    s.record().aggregated_deposit_status() == AggregatedDepositStatus::Rejected
                })
                .unwrap_or(false)
        }
    })
    .await;

    let deposit = store.read_record::<Deposit>("dep-s1-r1").await.unwrap();
    assert_eq!(deposit.record().deposit_status(), DepositStatus::Rejected);

    service.shutdown().await;
}
