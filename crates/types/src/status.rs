//! Status enums for submissions, deposits, and repository copies.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a submission as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubmissionStatus {
    /// Created but not yet committed by the user.
    Unsubmitted,
    /// Committed; eligible for dispatch.
    Submitted,
    /// All downstream deposits reached a terminal state.
    Complete,
    /// Cancelled by the user before completion.
    Cancelled,
    /// Marked failed by the error handler.
    Failed,
}

impl SubmissionStatus {
    /// Terminal statuses are never overwritten.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionStatus::Complete | SubmissionStatus::Cancelled
        )
    }
}

/// Rollup of the per-deposit statuses of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AggregatedDepositStatus {
    /// No deposit has been created yet.
    NotStarted,
    /// At least one deposit is still being worked.
    InProgress,
    /// Every deposit was accepted by its archive.
    Accepted,
    /// At least one archive rejected its deposit and none remain in flight.
    Rejected,
    /// At least one deposit failed and none remain in flight.
    Failed,
}

impl AggregatedDepositStatus {
    /// Terminal statuses are never overwritten.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AggregatedDepositStatus::Accepted | AggregatedDepositStatus::Rejected
        )
    }

    /// Derives the rollup from the multiset of per-deposit statuses.
    ///
    /// Pure function of the inputs:
    /// - accepted iff every deposit is accepted,
    /// - rejected iff any deposit is rejected and none is submitted,
    /// - failed iff any deposit is failed and none is submitted,
    /// - in-progress otherwise (not-started when there are no deposits).
    pub fn aggregate<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = DepositStatus>,
    {
        let mut total = 0usize;
        let mut accepted = 0usize;
        let mut any_rejected = false;
        let mut any_failed = false;
        let mut any_submitted = false;

        for status in statuses {
            total += 1;
            match status {
                DepositStatus::Accepted => accepted += 1,
                DepositStatus::Rejected => any_rejected = true,
                DepositStatus::Failed => any_failed = true,
                DepositStatus::Submitted => any_submitted = true,
                DepositStatus::NotStarted => {}
            }
        }

        if total == 0 {
            return AggregatedDepositStatus::NotStarted;
        }
        if accepted == total {
            return AggregatedDepositStatus::Accepted;
        }
        if any_rejected && !any_submitted {
            return AggregatedDepositStatus::Rejected;
        }
        if any_failed && !any_submitted {
            return AggregatedDepositStatus::Failed;
        }
        AggregatedDepositStatus::InProgress
    }
}

/// Status of one deposit attempt against one archive.
///
/// Terminal: accepted, rejected. Failed is intermediate and may be
/// remediated back to not-started, which re-arms the deposit task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DepositStatus {
    /// No transfer attempted yet (also the remediation target for failed).
    NotStarted,
    /// Package transmitted; archive-side processing outcome unknown.
    Submitted,
    /// Archive accepted custody.
    Accepted,
    /// Archive rejected the package.
    Rejected,
    /// Transfer or packaging failed before the archive decided.
    Failed,
}

impl DepositStatus {
    /// Terminal statuses are never overwritten.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DepositStatus::Accepted | DepositStatus::Rejected)
    }

    /// A deposit task may only start from not-started or failed.
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, DepositStatus::NotStarted | DepositStatus::Failed)
    }
}

/// Status of the archive's copy of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CopyStatus {
    /// The archive is still processing the package.
    InProgress,
    /// The archive accepted custody.
    Accepted,
    /// The archive rejected the package.
    Rejected,
    /// Post-acceptance processing finished.
    Complete,
}

#[cfg(test)]
mod tests {
    use super::*;

    use DepositStatus::*;

    fn agg(statuses: &[DepositStatus]) -> AggregatedDepositStatus {
        AggregatedDepositStatus::aggregate(statuses.iter().copied())
    }

    #[test]
    fn aggregate_empty_is_not_started() {
        assert_eq!(agg(&[]), AggregatedDepositStatus::NotStarted);
    }

    #[test]
    fn aggregate_all_accepted() {
        assert_eq!(agg(&[Accepted, Accepted]), AggregatedDepositStatus::Accepted);
    }

    #[test]
    fn aggregate_rejection_waits_for_in_flight() {
        // A rejected deposit does not decide the rollup while another is
        // still submitted.
        assert_eq!(
            agg(&[Rejected, Submitted]),
            AggregatedDepositStatus::InProgress
        );
        assert_eq!(agg(&[Rejected, Accepted]), AggregatedDepositStatus::Rejected);
    }

    #[test]
    fn aggregate_failed_waits_for_in_flight() {
        assert_eq!(
            agg(&[Failed, Submitted]),
            AggregatedDepositStatus::InProgress
        );
        assert_eq!(agg(&[Failed, Accepted]), AggregatedDepositStatus::Failed);
    }

    #[test]
    fn aggregate_rejected_beats_failed() {
        assert_eq!(agg(&[Rejected, Failed]), AggregatedDepositStatus::Rejected);
    }

    #[test]
    fn aggregate_not_started_is_in_progress() {
        assert_eq!(
            agg(&[NotStarted, Accepted]),
            AggregatedDepositStatus::InProgress
        );
    }

    #[test]
    fn terminality() {
        assert!(Accepted.is_terminal());
        assert!(Rejected.is_terminal());
        assert!(!Failed.is_terminal());
        assert!(!Submitted.is_terminal());
        assert!(NotStarted.is_dispatchable());
        assert!(Failed.is_dispatchable());
        assert!(!Submitted.is_dispatchable());
    }
}
