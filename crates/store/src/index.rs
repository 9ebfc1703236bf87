use std::time::Duration;

use deposit_retry::RetryPolicy;
use deposit_types::RecordKind;
use tracing::debug;

use crate::{client::RecordStore, error::StoreError};

/// Bound on how long a caller waits for the secondary index to surface a
/// record it knows exists.
const INDEX_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
/// First delay between index probes.
const INDEX_WAIT_DELAY: Duration = Duration::from_secs(1);
/// Geometric growth of the probe delay.
const INDEX_WAIT_FACTOR: f64 = 1.5;

/// Waits until `find_by_attribute(kind, field, value)` surfaces
/// `expected_id`, bounded by the 30 s index-visibility window.
///
/// The store's secondary index is eventually consistent, so a negative
/// lookup right after a write proves nothing. Callers that need the index
/// to reflect their own write go through here; exhausting the wait yields
/// [`StoreError::NotFound`].
pub async fn wait_for_indexed<S>(
    store: &S,
    kind: RecordKind,
    field: &str,
    value: &str,
    expected_id: &str,
) -> Result<(), StoreError>
where
    S: RecordStore + ?Sized,
{
    let policy = RetryPolicy::new()
        .with_initial_delay(INDEX_WAIT_DELAY)
        .with_backoff_factor(INDEX_WAIT_FACTOR)
        .with_timeout(INDEX_WAIT_TIMEOUT);

    let report = deposit_retry::retry_until(
        &policy,
        || store.find_by_attribute(kind, field, value),
        |ids| ids.iter().any(|id| id == expected_id),
    )
    .await;

    if report.is_satisfied() {
        debug!(?kind, field, attempts = report.attempts(), "index caught up");
        return Ok(());
    }

    match report.into_verified() {
        Err(deposit_retry::RetryError::TimedOut {
            last_error: Some(e),
            ..
        })
        | Err(deposit_retry::RetryError::Exhausted {
            last_error: Some(e),
            ..
        }) => Err(e),
        _ => Err(StoreError::NotFound {
            kind,
            id: expected_id.to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use deposit_types::{Deposit, DepositId, RepositoryId, SubmissionId};

    use crate::{client::RecordStoreExt, memory::InMemoryStore};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn waits_out_the_visibility_lag() {
        let store = InMemoryStore::new().with_index_lag(Duration::from_secs(3));
        let d = Deposit::new(
            DepositId::new("d1"),
            SubmissionId::new("s1"),
            RepositoryId::new("r1"),
        );
        store.create_record(&d).await.unwrap();

        wait_for_indexed(&store, RecordKind::Deposit, "submission", "s1", "d1")
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_on_a_record_that_never_appears() {
        let store = InMemoryStore::new();
        let err = wait_for_indexed(&store, RecordKind::Deposit, "submission", "s1", "ghost")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
