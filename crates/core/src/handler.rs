//! Error handler: routes typed failures to the record they blame.
//!
//! A failure carrying a deposit reference marks that deposit failed; one
//! carrying a submission reference marks the submission failed (and its
//! aggregated status). Anything else is logged and mutates nothing.
//! Wrappers are unwrapped one level to discover a typed cause.

use deposit_store::{perform_critical, RecordStore};
use deposit_types::{AggregatedDepositStatus, Deposit, DepositStatus, Submission, SubmissionStatus};
use tracing::{error, warn};

use crate::error::ServiceError;

/// Classifies an error and marks the affected record failed.
///
/// Unknown error types are logged only; the one-level unwrap lets a
/// wrapped [`ServiceError`] still be routed.
pub async fn handle<S>(store: &S, err: &(dyn std::error::Error + Send + Sync + 'static))
where
    S: RecordStore + ?Sized,
{
    let Some(service_error) = classify(err) else {
        error!(error = %err, "unhandled pipeline error; no record to mark");
        return;
    };

    match service_error {
        ServiceError::Deposit { deposit_id, .. } => {
            let message = service_error.message_chain();
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
                error!(deposit = %deposit_id, error = %e, "failed to mark deposit failed");
            } else if result.precondition_rejected() {
                warn!(deposit = %deposit_id, "deposit already terminal; leaving it alone");
            }
        }

        ServiceError::Submission { submission_id, .. } => {
            let result = perform_critical::<Submission, _, _, _, _>(
                store,
                submission_id.as_str(),
                |s| !s.submission_status().is_terminal(),
                |mut s| {
                    s.set_submission_status(SubmissionStatus::Failed);
                    s.set_aggregated_deposit_status(AggregatedDepositStatus::Failed);
                    s
                },
                |s| s.submission_status() == SubmissionStatus::Failed,
            )
            .await;
            if let Some(e) = result.error() {
                error!(submission = %submission_id, error = %e, "failed to mark submission failed");
            }
        }

        ServiceError::Other { .. } => {
            error!(error = %service_error, "pipeline error without an entity reference");
        }
    }
}

/// A typed service error, either directly or one wrapper level down.
fn classify<'a>(err: &'a (dyn std::error::Error + Send + Sync + 'static)) -> Option<&'a ServiceError> {
    if let Some(service_error) = err.downcast_ref::<ServiceError>() {
        return Some(service_error);
    }
    err.source()?.downcast_ref::<ServiceError>()
}
