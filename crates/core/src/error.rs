use deposit_types::{DepositId, SubmissionId};
use thiserror::Error;

type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Typed failure raised by pipeline workers.
///
/// The variants carrying an entity reference are what the error handler
/// acts on: a deposit-scoped failure marks that deposit failed, a
/// submission-scoped failure marks the submission failed. Everything else
/// is logged only.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A failure attributable to one deposit.
    #[error("deposit {deposit_id}: {message}")]
    Deposit {
        deposit_id: DepositId,
        message: String,
        #[source]
        source: Option<Cause>,
    },

    /// A failure attributable to one submission.
    #[error("submission {submission_id}: {message}")]
    Submission {
        submission_id: SubmissionId,
        message: String,
        #[source]
        source: Option<Cause>,
    },

    /// Infrastructure failure with no single record to blame.
    #[error("{message}")]
    Other {
        message: String,
        #[source]
        source: Option<Cause>,
    },
}

impl ServiceError {
    pub fn deposit(deposit_id: DepositId, message: impl Into<String>) -> Self {
        ServiceError::Deposit {
            deposit_id,
            message: message.into(),
            source: None,
        }
    }

    pub fn deposit_caused(
        deposit_id: DepositId,
        message: impl Into<String>,
        source: impl Into<Cause>,
    ) -> Self {
        ServiceError::Deposit {
            deposit_id,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn submission(submission_id: SubmissionId, message: impl Into<String>) -> Self {
        ServiceError::Submission {
            submission_id,
            message: message.into(),
            source: None,
        }
    }

    pub fn submission_caused(
        submission_id: SubmissionId,
        message: impl Into<String>,
        source: impl Into<Cause>,
    ) -> Self {
        ServiceError::Submission {
            submission_id,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        ServiceError::Other {
            message: message.into(),
            source: None,
        }
    }

    pub fn other_caused(message: impl Into<String>, source: impl Into<Cause>) -> Self {
        ServiceError::Other {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// The full cause chain, joined for persistence on a record.
    pub fn message_chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str(": ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_chain_includes_causes() {
        let io = std::io::Error::other("connection reset by peer");
        let err = ServiceError::deposit_caused(DepositId::new("d1"), "transport failed", io);
        let chain = err.message_chain();
        assert!(chain.contains("deposit d1: transport failed"));
        assert!(chain.contains("connection reset by peer"));
    }
}
