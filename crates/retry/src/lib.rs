//! Bounded exponential retry with a verification predicate.
//!
//! One engine drives every re-execution loop in the pipeline: transport
//! connect attempts, the record-store index visibility wait, status-document
//! polling, and the critical section's version-conflict restarts. Each
//! attempt is a fresh invocation of the operation; nothing is cached across
//! attempts. Dropping the returned future aborts the loop at the next await
//! point, which is how host cancellation propagates.

use std::{future::Future, time::Duration};

use rand::Rng;
use thiserror::Error;
use tokio::time::{self, Instant};
use tracing::trace;

mod policy;

pub use policy::RetryPolicy;

/// Why a retry loop stopped without a verified result.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The overall timeout elapsed before any attempt verified.
    #[error("retry timed out after {attempts} attempt(s) in {elapsed:?}")]
    TimedOut {
        /// Attempts started before the deadline.
        attempts: u32,
        /// Time spent in the loop.
        elapsed: Duration,
        /// The last error observed, if the final attempt failed.
        #[source]
        last_error: Option<E>,
    },
    /// The attempt budget ran out before any attempt verified.
    #[error("retry exhausted {attempts} attempt(s)")]
    Exhausted {
        /// Attempts executed.
        attempts: u32,
        /// The last error observed, if the final attempt failed.
        #[source]
        last_error: Option<E>,
    },
}

/// Outcome of a retry loop: the last observed result and whether the
/// verification predicate was satisfied.
#[derive(Debug)]
pub struct RetryReport<T, E> {
    satisfied: bool,
    timed_out: bool,
    attempts: u32,
    elapsed: Duration,
    last: Option<Result<T, E>>,
}

impl<T, E> RetryReport<T, E> {
    /// Whether the verification predicate accepted the final result.
    pub fn is_satisfied(&self) -> bool {
        self.satisfied
    }

    /// Number of attempts executed.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Wall time spent in the loop.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// The last observed result, verified or not.
    pub fn last(&self) -> Option<&Result<T, E>> {
        self.last.as_ref()
    }

    /// Converts the report into the verified value, or the reason the loop
    /// gave up.
    pub fn into_verified(self) -> Result<T, RetryError<E>> {
        let Self {
            satisfied,
            timed_out,
            attempts,
            elapsed,
            last,
        } = self;
        match last {
            Some(Ok(value)) if satisfied => Ok(value),
            other => {
                let last_error = match other {
                    Some(Err(e)) => Some(e),
                    _ => None,
                };
                if timed_out {
                    Err(RetryError::TimedOut {
                        attempts,
                        elapsed,
                        last_error,
                    })
                } else {
                    Err(RetryError::Exhausted {
                        attempts,
                        last_error,
                    })
                }
            }
        }
    }
}

/// Re-runs `operation` until `verify` accepts its success value, the
/// policy's timeout elapses, or its attempt budget (when set) runs out.
///
/// A thrown error counts as an unverified attempt and is retried the same
/// way a verification failure is. Each attempt is bounded by the time
/// remaining on the overall deadline, so a hung attempt cannot overrun the
/// policy timeout.
pub async fn retry_until<T, E, F, Fut, V>(
    policy: &RetryPolicy,
    mut operation: F,
    mut verify: V,
) -> RetryReport<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    V: FnMut(&T) -> bool,
{
    let started = Instant::now();
    let deadline = started + policy.timeout();
    let mut delay = policy.initial_delay();
    let mut attempts = 0u32;
    let mut timed_out = false;
    let mut last: Option<Result<T, E>> = None;

    loop {
        attempts += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            timed_out = true;
            break;
        }

        match time::timeout(remaining, operation()).await {
            Ok(Ok(value)) => {
                let ok = verify(&value);
                last = Some(Ok(value));
                if ok {
                    return RetryReport {
                        satisfied: true,
                        timed_out: false,
                        attempts,
                        elapsed: started.elapsed(),
                        last,
                    };
                }
                trace!(attempts, "retry attempt unverified");
            }
            Ok(Err(e)) => {
                trace!(attempts, "retry attempt failed");
                last = Some(Err(e));
            }
            Err(_elapsed) => {
                timed_out = true;
                break;
            }
        }

        if policy
            .max_attempts()
            .is_some_and(|budget| attempts >= budget)
        {
            break;
        }

        let sleep_for = policy.jittered(delay);
        if Instant::now() + sleep_for >= deadline {
            timed_out = true;
            break;
        }
        time::sleep(sleep_for).await;
        delay = policy.next_delay(delay);
    }

    RetryReport {
        satisfied: false,
        timed_out,
        attempts,
        elapsed: started.elapsed(),
        last,
    }
}

/// Jittered sleep used by callers that schedule their own retry cadence
/// (the status resolver's long-horizon polling).
pub fn jittered(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.85..1.15);
    delay.mul_f64(factor)
}
