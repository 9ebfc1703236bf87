//! The critical repository interaction: an optimistic read-modify-write
//! with pre- and post-conditions.
//!
//! Every persistent mutation in the pipeline (creating a deposit,
//! flipping its status, failing a submission) is expressed as one
//! [`perform_critical`] call. There is no in-process lock anywhere; the
//! store's version check provides entity-level linearizability, and the
//! precondition carries the "at most one non-terminal deposit per pair"
//! guarantee.

use std::time::Duration;

use deposit_types::Record;
use thiserror::Error;
use tokio::time;
use tracing::{debug, warn};

use crate::{
    client::{RecordStore, RecordStoreExt, Versioned},
    error::StoreError,
};

/// Restart budget for version conflicts.
const CONFLICT_ATTEMPTS: u32 = 5;
/// Base delay before a conflicted restart; grows geometrically.
const CONFLICT_BASE_DELAY: Duration = Duration::from_millis(50);
const CONFLICT_BACKOFF_FACTOR: f64 = 1.5;

/// Why a critical section failed outright (as opposed to returning an
/// unsuccessful-but-clean result).
#[derive(Debug, Error)]
pub enum CriticalError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The conflict restart budget ran out; some other writer kept winning.
    #[error("critical section gave up after {attempts} version conflicts")]
    ConflictsExhausted { attempts: u32 },
}

/// Outcome of a critical section.
///
/// `success` is false both for a failed precondition (a normal control
/// signal, `error` is `None`) and for a hard failure (`error` set). The
/// carried record is the precondition-time read in the first case and the
/// post-update read otherwise.
#[derive(Debug)]
pub struct CriticalResult<R> {
    success: bool,
    record: Option<Versioned<R>>,
    error: Option<CriticalError>,
}

impl<R> CriticalResult<R> {
    fn precondition_failed(record: Versioned<R>) -> Self {
        Self {
            success: false,
            record: Some(record),
            error: None,
        }
    }

    fn failed(error: CriticalError) -> Self {
        Self {
            success: false,
            record: None,
            error: Some(error),
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    /// The entity observed at the decisive read (pre- or post-update).
    pub fn record(&self) -> Option<&R> {
        self.record.as_ref().map(Versioned::record)
    }

    /// The versioned entity, when one was read.
    pub fn versioned(&self) -> Option<&Versioned<R>> {
        self.record.as_ref()
    }

    pub fn error(&self) -> Option<&CriticalError> {
        self.error.as_ref()
    }

    /// True when the precondition rejected the entity; no write happened.
    pub fn precondition_rejected(&self) -> bool {
        !self.success && self.error.is_none()
    }

    pub fn into_parts(self) -> (bool, Option<Versioned<R>>, Option<CriticalError>) {
        (self.success, self.record, self.error)
    }
}

/// Performs an optimistic read-modify-write on the record with the given
/// id.
///
/// 1. Read the entity and its version.
/// 2. Precondition false: return unsuccessful carrying the read entity;
///    nothing is written.
/// 3. Apply the mutation and update conditionally at the read version.
///    A version conflict restarts from step 1, up to a bounded number of
///    attempts with jittered backoff.
/// 4. After a successful write, re-read and evaluate the postcondition on
///    the re-read entity. The post-check always runs: a second writer may
///    have interleaved between our update and the read-back.
pub async fn perform_critical<R, S, Pre, Mut, Post>(
    store: &S,
    id: &str,
    precondition: Pre,
    mutation: Mut,
    postcondition: Post,
) -> CriticalResult<R>
where
    R: Record,
    S: RecordStore + ?Sized,
    Pre: Fn(&R) -> bool,
    Mut: Fn(R) -> R,
    Post: Fn(&R) -> bool,
{
    let mut attempts = 0u32;
    let mut delay = CONFLICT_BASE_DELAY;

    loop {
        attempts += 1;

        let read = match store.read_record::<R>(id).await {
            Ok(read) => read,
            Err(e) => return CriticalResult::failed(e.into()),
        };

        if !precondition(read.record()) {
            debug!(id, "critical section precondition rejected");
            return CriticalResult::precondition_failed(read);
        }

        let mutated = mutation(read.record().clone());
        match store.update_record(read.version(), &mutated).await {
            Ok(()) => break,
            Err(e) if e.is_conflict() => {
                if attempts >= CONFLICT_ATTEMPTS {
                    warn!(id, attempts, "critical section conflict budget exhausted");
                    return CriticalResult::failed(CriticalError::ConflictsExhausted { attempts });
                }
                time::sleep(deposit_retry::jittered(delay)).await;
                delay = delay.mul_f64(CONFLICT_BACKOFF_FACTOR);
            }
            Err(e) => return CriticalResult::failed(e.into()),
        }
    }

    // Post-check on a fresh read, never on our in-memory copy.
    match store.read_record::<R>(id).await {
        Ok(post) => {
            let success = postcondition(post.record());
            CriticalResult {
                success,
                record: Some(post),
                error: None,
            }
        }
        Err(e) => CriticalResult::failed(e.into()),
    }
}
