//! Submission dispatcher: fans a submitted submission out into one
//! deposit per target repository.
//!
//! Deposit ids are deterministic per (submission, repository) pair: a
//! racing dispatcher loses the create and treats it as a no-op, and
//! exactly one deposit record ever exists for a pair.

use deposit_store::{wait_for_indexed, RecordStore, RecordStoreExt, StoreError};
use deposit_types::{
    Deposit, DepositId, DepositStatus, RecordKind, RepositoryId, Submission, SubmissionId,
    SubmissionStatus,
};
use deposit_transport::PackageTransport;
use tracing::{debug, info, warn};

use crate::{ctx::DepositContext, error::ServiceError, pool::DepositPoolHandle};

/// Deterministic deposit id for a (submission, repository) pair.
pub fn deposit_id_for(submission: &SubmissionId, repository: &RepositoryId) -> DepositId {
    DepositId::new(format!("dep-{submission}-{repository}"))
}

/// Reads the submission, creates the missing deposits, and schedules a
/// task for every deposit that is still dispatchable.
///
/// Returns the ids of the deposits scheduled this call.
pub async fn dispatch_submission<S, T>(
    ctx: &DepositContext<S, T>,
    pool: &DepositPoolHandle,
    submission_id: &SubmissionId,
) -> Result<Vec<DepositId>, ServiceError>
where
    S: RecordStore,
    T: PackageTransport,
{
    let store = ctx.store.as_ref();

    let submission: Submission = store
        .read_record(submission_id.as_str())
        .await
        .map_err(|e| {
            ServiceError::submission_caused(submission_id.clone(), "reading submission", e)
        })?
        .into_record();

    if submission.submission_status() != SubmissionStatus::Submitted {
        debug!(submission = %submission_id, status = ?submission.submission_status(),
               "submission not in submitted; nothing to dispatch");
        return Ok(Vec::new());
    }
    if submission.aggregated_deposit_status().is_terminal() {
        debug!(submission = %submission_id, "aggregated status already terminal");
        return Ok(Vec::new());
    }

    let mut scheduled = Vec::new();
    for repository in submission.repositories() {
        let deposit_id = deposit_id_for(submission_id, repository);

        match ensure_deposit(store, &submission, repository, &deposit_id).await {
            Ok(true) => {
                pool.submit(deposit_id.clone()).await.map_err(|e| {
                    ServiceError::submission_caused(
                        submission_id.clone(),
                        "scheduling deposit task",
                        e,
                    )
                })?;
                scheduled.push(deposit_id);
            }
            Ok(false) => {}
            Err(e) => {
                // One broken pair must not starve the other targets.
                warn!(submission = %submission_id, repository = %repository, error = %e,
                      "could not ensure deposit for repository");
            }
        }
    }

    info!(submission = %submission_id, count = scheduled.len(), "dispatched deposits");
    Ok(scheduled)
}

/// Creates the pair's deposit if it does not exist. Returns whether a
/// task should be scheduled (a freshly created or still-dispatchable
/// deposit).
async fn ensure_deposit<S>(
    store: &S,
    submission: &Submission,
    repository: &RepositoryId,
    deposit_id: &DepositId,
) -> Result<bool, StoreError>
where
    S: RecordStore,
{
    match store.read_record::<Deposit>(deposit_id.as_str()).await {
        Ok(existing) => {
            // The pair already has a deposit. Only a not-started one is
            // scheduled again; failed deposits wait for the remediation
            // policy, submitted and terminal ones are left alone.
            Ok(existing.record().deposit_status() == DepositStatus::NotStarted)
        }
        Err(StoreError::NotFound { .. }) => {
            let deposit = Deposit::new(
                deposit_id.clone(),
                submission.id().clone(),
                repository.clone(),
            );
            match store.create_record(&deposit).await {
                Ok(_) => {
                    // The aggregator finds deposits through the secondary
                    // index; do not hand the pair off until the index has
                    // caught up with the create.
                    if let Err(e) = wait_for_indexed(
                        store,
                        RecordKind::Deposit,
                        "submission",
                        submission.id().as_str(),
                        deposit_id.as_str(),
                    )
                    .await
                    {
                        warn!(deposit = %deposit_id, error = %e,
                              "deposit not index-visible yet; scheduling anyway");
                    }
                    Ok(true)
                }
                // A racing dispatcher won the create; its task is already
                // scheduled.
                Err(StoreError::AlreadyExists { .. }) => Ok(false),
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}
