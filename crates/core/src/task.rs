//! The deposit task: one execution per (submission, deposit, repository)
//! triple.
//!
//! The task claims its deposit through the critical section (only a
//! not-started or failed deposit may be claimed), assembles the package,
//! opens a transport session, sends, and records the outcome. A second
//! task racing on the same deposit loses the claim and no-ops, which is
//! what makes retried executions idempotent.

use deposit_store::{perform_critical, RecordStore, RecordStoreExt};
use deposit_types::{
    CopyStatus, Deposit, DepositId, DepositStatus, Repository, RepositoryCopy, RepositoryCopyId,
    Submission,
};
use deposit_transport::PackageTransport;
use tracing::{debug, info, warn};

use crate::{ctx::DepositContext, error::ServiceError};

/// What the task left behind for asynchronous status resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The claim was rejected: the deposit is already terminal or in
    /// flight. Nothing happened.
    Skipped,
    /// Transport succeeded and acceptance was inferred; nothing to poll.
    Accepted,
    /// Transport succeeded and the archive issued a status document; the
    /// deposit awaits resolution.
    AwaitingStatus(DepositId),
}

/// Executes one deposit task to completion.
///
/// On transport or packaging failure the deposit is marked failed with
/// the failure's message chain and a typed error bubbles to the caller
/// for the error handler.
pub async fn execute_deposit<S, T>(
    ctx: &DepositContext<S, T>,
    deposit_id: &DepositId,
) -> Result<TaskOutcome, ServiceError>
where
    S: RecordStore,
    T: PackageTransport,
{
    let store = ctx.store.as_ref();

    // Claim the deposit: not-started or failed -> submitted. Losing the
    // claim is a normal control signal, not an error.
    let claim = perform_critical::<Deposit, _, _, _, _>(
        store,
        deposit_id.as_str(),
        |d| d.deposit_status().is_dispatchable(),
        |mut d| {
            d.set_deposit_status(DepositStatus::Submitted);
            d.set_status_message(None);
            d
        },
        |d| d.deposit_status() == DepositStatus::Submitted,
    )
    .await;

    if let Some(e) = claim.error() {
        return Err(ServiceError::deposit(
            deposit_id.clone(),
            format!("claiming the deposit: {e}"),
        ));
    }
    if claim.precondition_rejected() {
        debug!(deposit = %deposit_id, "deposit not claimable; skipping");
        return Ok(TaskOutcome::Skipped);
    }
    let Some(deposit) = claim.record() else {
        return Err(ServiceError::deposit(
            deposit_id.clone(),
            "claim succeeded without a record",
        ));
    };

    match transmit(ctx, deposit).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            let message = e.message_chain();
            warn!(deposit = %deposit_id, error = %message, "deposit task failed");
            fail_deposit(store, deposit_id, message).await;
            Err(e)
        }
    }
}

/// Assembles and sends the package, then records what the transport
/// established.
async fn transmit<S, T>(
    ctx: &DepositContext<S, T>,
    deposit: &Deposit,
) -> Result<TaskOutcome, ServiceError>
where
    S: RecordStore,
    T: PackageTransport,
{
    let store = ctx.store.as_ref();
    let deposit_id = deposit.id().clone();
    let scoped = |message: String| ServiceError::deposit(deposit_id.clone(), message);

    let submission: Submission = store
        .read_record(deposit.submission().as_str())
        .await
        .map_err(|e| scoped(format!("reading submission: {e}")))?
        .into_record();
    let repository: Repository = store
        .read_record(deposit.repository().as_str())
        .await
        .map_err(|e| scoped(format!("reading repository: {e}")))?
        .into_record();

    let config = ctx
        .repositories
        .lookup(repository.repository_key())
        .ok_or_else(|| {
            scoped(format!(
                "no configuration for repository key {}",
                repository.repository_key()
            ))
        })?;

    let stream = ctx
        .assemblers
        .assemble(&submission, &config.assembly)
        .map_err(|e| ServiceError::deposit_caused(deposit_id.clone(), "assembling package", e))?;
    let mut package = stream.open();

    let outcome = ctx
        .transports
        .transmit(config, &mut package)
        .await
        .map_err(|e| ServiceError::deposit_caused(deposit_id.clone(), "transmitting package", e))?;

    if outcome.is_accepted() {
        // No status document: acceptance is inferred from the transport
        // response, so custody evidence must exist alongside it.
        upsert_repository_copy(
            store,
            &submission,
            &repository,
            CopyStatus::Accepted,
            outcome.external_ids(),
        )
        .await
        .map_err(|e| scoped(format!("recording repository copy: {e}")))?;

        let updated = perform_critical::<Deposit, _, _, _, _>(
            store,
            deposit_id.as_str(),
            |d| !d.deposit_status().is_terminal(),
            |mut d| {
                d.set_deposit_status(DepositStatus::Accepted);
                d
            },
            |d| d.deposit_status() == DepositStatus::Accepted,
        )
        .await;
        if let Some(e) = updated.error() {
            return Err(scoped(format!("recording acceptance: {e}")));
        }
        info!(deposit = %deposit_id, "deposit accepted on transport success");
        return Ok(TaskOutcome::Accepted);
    }

    let Some(status_ref) = outcome.status_ref().map(str::to_owned) else {
        return Err(scoped(
            "transport reported neither acceptance nor a status reference".to_owned(),
        ));
    };

    let updated = perform_critical::<Deposit, _, _, _, _>(
        store,
        deposit_id.as_str(),
        |d| d.deposit_status() == DepositStatus::Submitted,
        |mut d| {
            d.set_deposit_status_ref(Some(status_ref.clone()));
            d
        },
        |d| d.deposit_status_ref().is_some(),
    )
    .await;
    if let Some(e) = updated.error() {
        return Err(scoped(format!("recording status reference: {e}")));
    }

    info!(deposit = %deposit_id, status_ref = %status_ref, "deposit submitted; awaiting status");
    Ok(TaskOutcome::AwaitingStatus(deposit_id))
}

/// Marks the deposit failed, recording the message chain. Best effort:
/// a failure to fail is logged, not propagated over the original error.
async fn fail_deposit<S>(store: &S, deposit_id: &DepositId, message: String)
where
    S: RecordStore,
{
    let result = perform_critical::<Deposit, _, _, _, _>(
        store,
        deposit_id.as_str(),
        |d| !d.deposit_status().is_terminal(),
        move |mut d| {
            d.set_deposit_status(DepositStatus::Failed);
            d.set_status_message(Some(message.clone()));
            d
        },
        |d| d.deposit_status() == DepositStatus::Failed,
    )
    .await;
    if let Some(e) = result.error() {
        warn!(deposit = %deposit_id, error = %e, "could not mark deposit failed");
    }
}

/// Creates or updates the (submission, repository) repository copy.
pub(crate) async fn upsert_repository_copy<S>(
    store: &S,
    submission: &Submission,
    repository: &Repository,
    status: CopyStatus,
    external_ids: &[String],
) -> Result<(), deposit_store::StoreError>
where
    S: RecordStore,
{
    let copy_id = repository_copy_id(submission, repository);

    match store
        .read_record::<RepositoryCopy>(copy_id.as_str())
        .await
    {
        Ok(existing) => {
            let mut copy = existing.record().clone();
            copy.set_copy_status(status);
            for id in external_ids {
                copy.add_external_id(id.clone());
            }
            store.update_record(existing.version(), &copy).await
        }
        Err(deposit_store::StoreError::NotFound { .. }) => {
            let mut copy = RepositoryCopy::new(
                copy_id,
                submission.id().clone(),
                repository.id().clone(),
            );
            copy.set_copy_status(status);
            for id in external_ids {
                copy.add_external_id(id.clone());
            }
            store.create_record(&copy).await.map(|_| ())
        }
        Err(e) => Err(e),
    }
}

/// Deterministic repository-copy id for a (submission, repository) pair.
pub(crate) fn repository_copy_id(
    submission: &Submission,
    repository: &Repository,
) -> RepositoryCopyId {
    RepositoryCopyId::new(format!("copy-{}-{}", submission.id(), repository.id()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use deposit_store::{memory::InMemoryStore, RecordStoreExt};
    use deposit_transport::MockPackageTransport;
    use deposit_types::{FileDescriptor, FileSource, SubmissionId};

    use crate::test_utils::{
        context, seeded_store, ScriptedTransport, TransportScript, STATEMENT_URL,
    };

    use super::*;

    fn ids() -> (SubmissionId, DepositId) {
        (
            SubmissionId::new("s1"),
            DepositId::new("dep-s1-r1"),
        )
    }

    async fn seed_deposit(store: &InMemoryStore) -> DepositId {
        let (submission_id, deposit_id) = ids();
        let deposit = Deposit::new(
            deposit_id.clone(),
            submission_id,
            deposit_types::RepositoryId::new("r1"),
        );
        store.create_record(&deposit).await.unwrap();
        deposit_id
    }

    #[tokio::test]
    async fn pending_transport_leaves_the_deposit_submitted_with_a_status_ref() {
        let store = Arc::new(seeded_store("s1", "r1").await);
        let transport = ScriptedTransport::new(TransportScript::Pending);
        let ctx = context(store.clone(), transport.clone());
        let deposit_id = seed_deposit(&store).await;

        let outcome = execute_deposit(&ctx, &deposit_id).await.unwrap();
        assert_eq!(outcome, TaskOutcome::AwaitingStatus(deposit_id.clone()));

        let deposit = store
            .read_record::<Deposit>(deposit_id.as_str())
            .await
            .unwrap();
        assert_eq!(deposit.record().deposit_status(), DepositStatus::Submitted);
        assert_eq!(deposit.record().deposit_status_ref(), Some(STATEMENT_URL));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn acceptance_without_a_status_ref_records_custody() {
        let store = Arc::new(seeded_store("s1", "r1").await);
        let transport = ScriptedTransport::new(TransportScript::Accepted(vec![
            "/var/deposits/pkg.zip".to_owned(),
        ]));
        let ctx = context(store.clone(), transport);
        let deposit_id = seed_deposit(&store).await;

        let outcome = execute_deposit(&ctx, &deposit_id).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Accepted);

        let deposit = store
            .read_record::<Deposit>(deposit_id.as_str())
            .await
            .unwrap();
        assert_eq!(deposit.record().deposit_status(), DepositStatus::Accepted);
        // Acceptance inferred from transport response comes with custody
        // evidence.
        let copy = store
            .read_record::<deposit_types::RepositoryCopy>("copy-s1-r1")
            .await
            .unwrap();
        assert_eq!(copy.record().copy_status(), CopyStatus::Accepted);
        assert_eq!(copy.record().external_ids(), ["/var/deposits/pkg.zip"]);
    }

    #[tokio::test]
    async fn transport_rejection_fails_the_deposit_with_the_message_chain() {
        let store = Arc::new(seeded_store("s1", "r1").await);
        let transport = ScriptedTransport::new(TransportScript::RejectWith(
            "md5 did not match the checksum computed on receipt".to_owned(),
        ));
        let ctx = context(store.clone(), transport);
        let deposit_id = seed_deposit(&store).await;

        let err = execute_deposit(&ctx, &deposit_id).await.unwrap_err();
        assert!(err.message_chain().contains("did not match the checksum"));

        let deposit = store
            .read_record::<Deposit>(deposit_id.as_str())
            .await
            .unwrap();
        assert_eq!(deposit.record().deposit_status(), DepositStatus::Failed);
        assert!(deposit
            .record()
            .status_message()
            .unwrap()
            .contains("did not match the checksum"));
        assert_eq!(deposit.record().deposit_status_ref(), None);
        // No custody evidence was created.
        assert!(store
            .read_record::<deposit_types::RepositoryCopy>("copy-s1-r1")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn missing_declared_file_fails_packaging() {
        let store = Arc::new(seeded_store("s1", "r1").await);
        // Replace the submission's file with one that does not exist.
        let read = store.read_record::<Submission>("s1").await.unwrap();
        let mut broken = crate::test_utils::submission("s1", "r1");
        broken.mark_submitted();
        broken.add_file(FileDescriptor::new(
            "pdf3.pdf",
            "application/pdf",
            FileSource::Path("/nonexistent/pdf3.pdf".into()),
        ));
        store.update_record(read.version(), &broken).await.unwrap();

        let transport = ScriptedTransport::new(TransportScript::Pending);
        let ctx = context(store.clone(), transport);
        let deposit_id = seed_deposit(&store).await;

        let err = execute_deposit(&ctx, &deposit_id).await.unwrap_err();
        assert!(err.message_chain().contains("not included in the zip"));

        let deposit = store
            .read_record::<Deposit>(deposit_id.as_str())
            .await
            .unwrap();
        assert_eq!(deposit.record().deposit_status(), DepositStatus::Failed);
    }

    #[tokio::test]
    async fn unknown_packaging_spec_transmits_nothing() {
        let store = Arc::new(seeded_store("s1", "r1").await);
        let deposit_id = seed_deposit(&store).await;

        // A strict mock: the transport must never be asked to transmit.
        let mut transport = MockPackageTransport::new();
        transport.expect_transmit().times(0);

        let mut repositories = crate::test_utils::repositories_config();
        // Point the repository at a spec nothing can assemble.
        let mut broken = repositories.lookup(crate::test_utils::REPO_KEY).unwrap().clone();
        broken.assembly.spec_uri = "urn:unknown".to_owned();
        repositories = deposit_config::RepositoriesConfig::from_entries([(
            crate::test_utils::REPO_KEY.to_owned(),
            broken,
        )]);

        let ctx = DepositContext::new(
            store.clone(),
            Arc::new(transport),
            Arc::new(deposit_assembler::AssemblerRegistry::with_defaults()),
            Arc::new(repositories),
        );

        let err = execute_deposit(&ctx, &deposit_id).await.unwrap_err();
        assert!(err
            .message_chain()
            .contains("Unacceptable packaging type: urn:unknown"));

        let deposit = store
            .read_record::<Deposit>(deposit_id.as_str())
            .await
            .unwrap();
        assert_eq!(deposit.record().deposit_status(), DepositStatus::Failed);
    }

    #[tokio::test]
    async fn terminal_deposit_is_a_no_op() {
        let store = Arc::new(seeded_store("s1", "r1").await);
        let deposit_id = seed_deposit(&store).await;

        // Drive it to accepted first.
        let read = store
            .read_record::<Deposit>(deposit_id.as_str())
            .await
            .unwrap();
        let mut accepted = read.record().clone();
        accepted.set_deposit_status(DepositStatus::Accepted);
        store.update_record(read.version(), &accepted).await.unwrap();

        let mut transport = MockPackageTransport::new();
        transport.expect_transmit().times(0);
        let ctx = DepositContext::new(
            store.clone(),
            Arc::new(transport),
            Arc::new(deposit_assembler::AssemblerRegistry::with_defaults()),
            Arc::new(crate::test_utils::repositories_config()),
        );

        // Invoking the task twice on a terminal deposit is a no-op both
        // times.
        for _ in 0..2 {
            let outcome = execute_deposit(&ctx, &deposit_id).await.unwrap();
            assert_eq!(outcome, TaskOutcome::Skipped);
        }

        let after = store
            .read_record::<Deposit>(deposit_id.as_str())
            .await
            .unwrap();
        assert_eq!(after.record().deposit_status(), DepositStatus::Accepted);
    }
}
