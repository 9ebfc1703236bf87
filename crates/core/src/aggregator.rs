//! Submission status aggregator: a periodic rollup of per-deposit
//! statuses into the submission-level status.
//!
//! At most one sweep runs at a time; a tick that fires while the previous
//! sweep is still working is skipped. The rollup is a pure function of
//! the deposit statuses observed during the sweep; a deposit flipping
//! right after the read is picked up by the next tick.

use std::{sync::Arc, time::Duration};

use deposit_store::{perform_critical, RecordStore, RecordStoreExt, StoreError};
use deposit_types::{
    AggregatedDepositStatus, Deposit, RecordKind, Submission, SubmissionStatus,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::ServiceError;

/// What one sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Submissions examined.
    pub examined: usize,
    /// Submissions whose aggregated status changed.
    pub updated: usize,
}

/// One aggregation sweep over every submitted submission whose rollup is
/// not yet terminal.
pub async fn aggregation_sweep<S>(store: &S) -> Result<SweepStats, ServiceError>
where
    S: RecordStore,
{
    let submission_ids = store
        .find_by_attribute(RecordKind::Submission, "submissionStatus", "submitted")
        .await
        .map_err(|e| ServiceError::other_caused("listing submitted submissions", e))?;

    let mut stats = SweepStats::default();
    for submission_id in submission_ids {
        match aggregate_one(store, &submission_id).await {
            Ok(changed) => {
                stats.examined += 1;
                if changed {
                    stats.updated += 1;
                }
            }
            Err(e) => {
                // One bad submission must not end the sweep.
                warn!(submission = %submission_id, error = %e, "aggregation failed");
            }
        }
    }
    Ok(stats)
}

/// Recomputes one submission's rollup; returns whether it changed.
async fn aggregate_one<S>(store: &S, submission_id: &str) -> Result<bool, StoreError>
where
    S: RecordStore,
{
    let submission: Submission = store.read_record(submission_id).await?.into_record();
    if submission.aggregated_deposit_status().is_terminal() {
        return Ok(false);
    }

    let deposit_ids = store
        .find_by_attribute(RecordKind::Deposit, "submission", submission_id)
        .await?;
    let mut statuses = Vec::with_capacity(deposit_ids.len());
    for deposit_id in &deposit_ids {
        let deposit: Deposit = store.read_record(deposit_id).await?.into_record();
        statuses.push(deposit.deposit_status());
    }

    let computed = AggregatedDepositStatus::aggregate(statuses);
    if computed == submission.aggregated_deposit_status() {
        return Ok(false);
    }
    // An empty deposit list on a submission that already progressed means
    // the deposit index has not caught up; never regress the rollup.
    if computed == AggregatedDepositStatus::NotStarted {
        return Ok(false);
    }

    let result = perform_critical::<Submission, _, _, _, _>(
        store,
        submission_id,
        |s| !s.aggregated_deposit_status().is_terminal(),
        move |mut s| {
            s.set_aggregated_deposit_status(computed);
            if computed == AggregatedDepositStatus::Accepted {
                s.set_submission_status(SubmissionStatus::Complete);
            }
            s
        },
        move |s| s.aggregated_deposit_status() == computed,
    )
    .await;

    if let Some(e) = result.error() {
        warn!(submission = %submission_id, error = %e, "rollup update failed");
        return Ok(false);
    }
    if result.precondition_rejected() {
        return Ok(false);
    }

    debug!(submission = %submission_id, rollup = ?computed, "aggregated status updated");
    Ok(true)
}

/// The periodic aggregator worker. Sweeps run inline on this loop, so at
/// most one is in flight at a time; ticks that land mid-sweep are
/// skipped rather than queued. Exits when the shutdown signal flips.
pub async fn aggregator_task<S>(
    store: Arc<S>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    S: RecordStore,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("aggregator shutting down");
                    return;
                }
                continue;
            }
        }

        match aggregation_sweep(store.as_ref()).await {
            Ok(stats) if stats.updated > 0 => {
                info!(examined = stats.examined, updated = stats.updated, "aggregation sweep");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "aggregation sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use deposit_store::{memory::InMemoryStore, MockRecordStore, RecordStoreExt, StoreError};
    use deposit_types::{DepositId, DepositStatus, RepositoryId, SubmissionId};

    use crate::test_utils::submission;

    use super::*;

    async fn seed(store: &InMemoryStore, statuses: &[DepositStatus]) {
        let mut s = submission("s1", "r1");
        s.mark_submitted();
        store.create_record(&s).await.unwrap();

        for (i, status) in statuses.iter().enumerate() {
            let mut d = Deposit::new(
                DepositId::new(format!("d{i}")),
                SubmissionId::new("s1"),
                RepositoryId::new(format!("r{i}")),
            );
            d.set_deposit_status(*status);
            store.create_record(&d).await.unwrap();
        }
    }

    async fn rollup(store: &InMemoryStore) -> AggregatedDepositStatus {
        store
            .read_record::<Submission>("s1")
            .await
            .unwrap()
            .record()
            .aggregated_deposit_status()
    }

    #[tokio::test]
    async fn all_accepted_rolls_up_and_completes_the_submission() {
        let store = InMemoryStore::new();
        seed(&store, &[DepositStatus::Accepted, DepositStatus::Accepted]).await;

        let stats = aggregation_sweep(&store).await.unwrap();
        assert_eq!(stats.examined, 1);
        assert_eq!(stats.updated, 1);
        assert_eq!(rollup(&store).await, AggregatedDepositStatus::Accepted);

        let s = store.read_record::<Submission>("s1").await.unwrap();
        assert_eq!(s.record().submission_status(), SubmissionStatus::Complete);
    }

    #[tokio::test]
    async fn in_flight_deposits_keep_the_rollup_in_progress() {
        let store = InMemoryStore::new();
        seed(&store, &[DepositStatus::Rejected, DepositStatus::Submitted]).await;

        aggregation_sweep(&store).await.unwrap();
        assert_eq!(rollup(&store).await, AggregatedDepositStatus::InProgress);
    }

    #[tokio::test]
    async fn rejection_settles_once_nothing_is_in_flight() {
        let store = InMemoryStore::new();
        seed(&store, &[DepositStatus::Rejected, DepositStatus::Accepted]).await;

        aggregation_sweep(&store).await.unwrap();
        assert_eq!(rollup(&store).await, AggregatedDepositStatus::Rejected);
    }

    #[tokio::test]
    async fn unchanged_rollups_write_nothing() {
        let store = InMemoryStore::new();
        seed(&store, &[DepositStatus::Submitted]).await;

        let before = store.read_record::<Submission>("s1").await.unwrap().version();
        let stats = aggregation_sweep(&store).await.unwrap();
        assert_eq!(stats.updated, 1); // not-started -> in-progress

        // Second sweep computes the same value and must not write.
        let mid = store.read_record::<Submission>("s1").await.unwrap().version();
        let stats = aggregation_sweep(&store).await.unwrap();
        assert_eq!(stats.updated, 0);
        let after = store.read_record::<Submission>("s1").await.unwrap().version();
        assert_eq!(mid, after);
        assert!(mid > before);
    }

    #[tokio::test]
    async fn store_outage_surfaces_as_a_sweep_error() {
        let mut store = MockRecordStore::new();
        store.expect_find_by_attribute().returning(|_, _, _| {
            Err(StoreError::Unavailable("record store down".to_owned()))
        });

        let err = aggregation_sweep(&store).await.unwrap_err();
        assert!(err.message_chain().contains("record store down"));
    }
}
