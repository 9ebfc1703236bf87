//! Status resolver: polls a deposit's archive-issued status document and
//! drives the deposit to a terminal state.
//!
//! Unknown or missing state terms never mean rejection; they leave the
//! deposit in progress and the poller re-schedules itself with backoff.
//! When several terms appear, the deterministic priority is
//! rejected > accepted > failed > in-progress.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use deposit_config::{MappedStatus, RepositoriesConfig};
use deposit_store::{perform_critical, RecordStore, RecordStoreExt};
use deposit_sword::parse_statement;
use deposit_types::{
    CopyStatus, Deposit, DepositId, DepositStatus, Repository, Submission,
};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinSet, time::Instant};
use tracing::{debug, info, warn};

use crate::{error::ServiceError, task::upsert_repository_copy};

/// Backoff schedule for status polling.
#[derive(Debug, Clone)]
pub struct ResolverSchedule {
    /// First delay after an in-progress observation.
    pub initial: Duration,
    /// Geometric growth factor.
    pub factor: f64,
    /// Cap on any single delay.
    pub cap: Duration,
    /// Total polling budget; exhaustion fails the deposit.
    pub total: Duration,
}

impl Default for ResolverSchedule {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(10),
            factor: 2.0,
            cap: Duration::from_secs(3600),
            total: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Fetches a status document by its reference URI.
#[async_trait]
pub trait StatementFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Failure fetching a status document. Always retryable within the
/// polling budget.
#[derive(Debug, Error)]
#[error("fetching {url}: {reason}")]
pub struct FetchError {
    pub url: String,
    pub reason: String,
}

/// HTTP fetcher with realm-based basic auth.
#[derive(Debug)]
pub struct HttpStatementFetcher {
    client: reqwest::Client,
    repositories: Arc<RepositoriesConfig>,
}

impl HttpStatementFetcher {
    pub fn new(repositories: Arc<RepositoriesConfig>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            repositories,
        })
    }

    fn credentials_for(&self, url: &str) -> Option<(String, Option<String>)> {
        self.repositories.keys().find_map(|key| {
            let config = self.repositories.lookup(key)?;
            let realm = config.transport.realm_for(url)?;
            realm
                .username
                .as_ref()
                .map(|user| (user.clone(), realm.password.clone()))
        })
    }
}

#[async_trait]
impl StatementFetcher for HttpStatementFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut request = self.client.get(url);
        if let Some((user, password)) = self.credentials_for(url) {
            request = request.basic_auth(user, password.as_deref());
        }
        let wrap = |reason: String| FetchError {
            url: url.to_owned(),
            reason,
        };
        let response = request.send().await.map_err(|e| wrap(e.to_string()))?;
        if !response.status().is_success() {
            return Err(wrap(format!("status {}", response.status())));
        }
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| wrap(e.to_string()))
    }
}

/// What one resolution pass concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The deposit was already terminal; nothing to do.
    AlreadyTerminal,
    /// The archive is still working (or the document was unavailable or
    /// unparseable); poll again later.
    InProgress,
    Accepted,
    Rejected,
    /// The archive reported a failure term.
    Failed,
}

impl Resolution {
    fn is_settled(&self) -> bool {
        !matches!(self, Resolution::InProgress)
    }
}

/// rejected > accepted > failed > in-progress.
fn priority(resolution: &Resolution) -> u8 {
    match resolution {
        Resolution::Rejected => 3,
        Resolution::Accepted => 2,
        Resolution::Failed => 1,
        Resolution::InProgress | Resolution::AlreadyTerminal => 0,
    }
}

/// One resolution pass: fetch, extract terms, map, apply.
pub async fn resolve_once<S, F>(
    store: &S,
    repositories: &RepositoriesConfig,
    fetcher: &F,
    deposit_id: &DepositId,
) -> Result<Resolution, ServiceError>
where
    S: RecordStore,
    F: StatementFetcher + ?Sized,
{
    let scoped = |message: String| ServiceError::deposit(deposit_id.clone(), message);

    let deposit: Deposit = store
        .read_record(deposit_id.as_str())
        .await
        .map_err(|e| scoped(format!("reading deposit: {e}")))?
        .into_record();

    if deposit.deposit_status().is_terminal() {
        return Ok(Resolution::AlreadyTerminal);
    }
    let Some(status_ref) = deposit.deposit_status_ref() else {
        return Err(scoped("deposit has no status reference to poll".to_owned()));
    };

    let repository: Repository = store
        .read_record(deposit.repository().as_str())
        .await
        .map_err(|e| scoped(format!("reading repository: {e}")))?
        .into_record();
    let mapping = repositories
        .lookup(repository.repository_key())
        .map(|config| &config.status_mapping)
        .ok_or_else(|| {
            scoped(format!(
                "no configuration for repository key {}",
                repository.repository_key()
            ))
        })?;

    let body = match fetcher.fetch(status_ref).await {
        Ok(body) => body,
        Err(e) => {
            debug!(deposit = %deposit_id, error = %e, "status document unavailable; will retry");
            return Ok(Resolution::InProgress);
        }
    };

    let statement = match parse_statement(&body, &mapping.scheme) {
        Ok(statement) => statement,
        Err(e) => {
            warn!(deposit = %deposit_id, error = %e, "unparseable status document; will retry");
            return Ok(Resolution::InProgress);
        }
    };

    // Deterministic priority over however many terms the statement
    // carries; unknown terms resolve to in-progress, never rejection.
    let mut resolution = Resolution::InProgress;
    for term in statement.terms() {
        let candidate = match mapping.map.get(term) {
            Some(MappedStatus::Rejected) => Resolution::Rejected,
            Some(MappedStatus::Accepted) => Resolution::Accepted,
            Some(MappedStatus::Failed) => Resolution::Failed,
            Some(MappedStatus::InProgress) => Resolution::InProgress,
            None => {
                debug!(deposit = %deposit_id, term = %term, "unknown state term");
                Resolution::InProgress
            }
        };
        if priority(&candidate) > priority(&resolution) {
            resolution = candidate;
        }
    }

    match resolution {
        Resolution::Accepted => {
            let submission: Submission = store
                .read_record(deposit.submission().as_str())
                .await
                .map_err(|e| scoped(format!("reading submission: {e}")))?
                .into_record();

            let external_id = statement
                .alternate()
                .unwrap_or(status_ref)
                .to_owned();
            upsert_repository_copy(
                store,
                &submission,
                &repository,
                CopyStatus::Accepted,
                &[external_id],
            )
            .await
            .map_err(|e| scoped(format!("recording repository copy: {e}")))?;

            apply_deposit_status(store, deposit_id, DepositStatus::Accepted, None).await?;
            info!(deposit = %deposit_id, "deposit accepted by archive");
        }
        Resolution::Rejected => {
            apply_deposit_status(store, deposit_id, DepositStatus::Rejected, None).await?;
            let submission: Submission = store
                .read_record(deposit.submission().as_str())
                .await
                .map_err(|e| scoped(format!("reading submission: {e}")))?
                .into_record();
            // Downgrade custody evidence if any was recorded.
            let copy_id = crate::task::repository_copy_id(&submission, &repository);
            if let Ok(existing) = store
                .read_record::<deposit_types::RepositoryCopy>(copy_id.as_str())
                .await
            {
                let mut copy = existing.record().clone();
                copy.set_copy_status(CopyStatus::Rejected);
                if let Err(e) = store.update_record(existing.version(), &copy).await {
                    warn!(deposit = %deposit_id, error = %e, "could not mark repository copy rejected");
                }
            }
            info!(deposit = %deposit_id, "deposit rejected by archive");
        }
        Resolution::Failed => {
            apply_deposit_status(
                store,
                deposit_id,
                DepositStatus::Failed,
                Some("archive reported a failure state".to_owned()),
            )
            .await?;
        }
        Resolution::InProgress | Resolution::AlreadyTerminal => {}
    }

    Ok(resolution)
}

async fn apply_deposit_status<S>(
    store: &S,
    deposit_id: &DepositId,
    status: DepositStatus,
    message: Option<String>,
) -> Result<(), ServiceError>
where
    S: RecordStore,
{
    let result = perform_critical::<Deposit, _, _, _, _>(
        store,
        deposit_id.as_str(),
        |d| !d.deposit_status().is_terminal(),
        move |mut d| {
            d.set_deposit_status(status);
            if message.is_some() {
                d.set_status_message(message.clone());
            }
            d
        },
        move |d| d.deposit_status() == status,
    )
    .await;
    if let Some(e) = result.error() {
        return Err(ServiceError::deposit(
            deposit_id.clone(),
            format!("recording resolved status: {e}"),
        ));
    }
    Ok(())
}

/// Polls one deposit until it settles or the budget runs out; exhaustion
/// marks the deposit failed.
pub async fn poll_until_resolved<S, F>(
    store: &S,
    repositories: &RepositoriesConfig,
    fetcher: &F,
    schedule: &ResolverSchedule,
    deposit_id: DepositId,
) where
    S: RecordStore,
    F: StatementFetcher + ?Sized,
{
    let deadline = Instant::now() + schedule.total;
    let mut delay = schedule.initial;

    loop {
        match resolve_once(store, repositories, fetcher, &deposit_id).await {
            Ok(resolution) if resolution.is_settled() => return,
            Ok(_) => {}
            Err(e) => {
                warn!(deposit = %deposit_id, error = %e, "status resolution pass failed");
            }
        }

        if Instant::now() + delay >= deadline {
            warn!(deposit = %deposit_id, "status polling budget exhausted");
            let _ = apply_deposit_status(
                store,
                &deposit_id,
                DepositStatus::Failed,
                Some("status polling exhausted without a terminal state".to_owned()),
            )
            .await;
            return;
        }

        tokio::time::sleep(deposit_retry::jittered(delay)).await;
        delay = delay.mul_f64(schedule.factor).min(schedule.cap);
    }
}

/// Enqueues deposits for asynchronous status resolution.
#[derive(Debug, Clone)]
pub struct StatusPollHandle {
    tx: mpsc::UnboundedSender<DepositId>,
}

impl StatusPollHandle {
    pub fn enqueue(&self, deposit_id: DepositId) {
        if self.tx.send(deposit_id).is_err() {
            warn!("status resolver is shut down; dropping poll request");
        }
    }
}

/// Builder for the status-resolver worker.
pub struct StatusResolverBuilder<S, F> {
    store: Arc<S>,
    repositories: Arc<RepositoriesConfig>,
    fetcher: Arc<F>,
    schedule: ResolverSchedule,
}

impl<S, F> StatusResolverBuilder<S, F>
where
    S: RecordStore + 'static,
    F: StatementFetcher + 'static,
{
    pub fn new(store: Arc<S>, repositories: Arc<RepositoriesConfig>, fetcher: Arc<F>) -> Self {
        Self {
            store,
            repositories,
            fetcher,
            schedule: ResolverSchedule::default(),
        }
    }

    pub fn with_schedule(mut self, schedule: ResolverSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Builds the poll handle and the worker future. The worker spawns
    /// one poller per enqueued deposit (requests for a deposit already
    /// being polled are dropped) and exits when every handle is dropped
    /// and in-flight pollers finish.
    pub fn build(self) -> (StatusPollHandle, impl std::future::Future<Output = ()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<DepositId>();
        let handle = StatusPollHandle { tx };

        let task = async move {
            let mut pollers = JoinSet::new();
            let mut active: std::collections::HashSet<DepositId> = std::collections::HashSet::new();
            loop {
                tokio::select! {
                    request = rx.recv() => {
                        let Some(deposit_id) = request else {
                            break;
                        };
                        if !active.insert(deposit_id.clone()) {
                            debug!(deposit = %deposit_id, "already polling; request dropped");
                            continue;
                        }
                        let store = self.store.clone();
                        let repositories = self.repositories.clone();
                        let fetcher = self.fetcher.clone();
                        let schedule = self.schedule.clone();
                        pollers.spawn(async move {
                            poll_until_resolved(
                                store.as_ref(),
                                repositories.as_ref(),
                                fetcher.as_ref(),
                                &schedule,
                                deposit_id.clone(),
                            )
                            .await;
                            deposit_id
                        });
                    }
                    Some(result) = pollers.join_next(), if !pollers.is_empty() => {
                        match result {
                            Ok(deposit_id) => {
                                active.remove(&deposit_id);
                            }
                            Err(e) => warn!(error = %e, "status poller panicked"),
                        }
                    }
                }
            }
            // Drain in-flight pollers after the queue closes.
            while let Some(result) = pollers.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "status poller panicked");
                }
            }
        };

        (handle, task)
    }
}
