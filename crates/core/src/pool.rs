//! Bounded worker pool running deposit tasks.
//!
//! Ordering is unordered; per-pair serialization comes from the deposit
//! task's claim, not from queue discipline. Failures are routed to the
//! error handler; successful submissions with a status reference are
//! handed to the status resolver.

use std::{sync::Arc, time::Duration};

use deposit_store::RecordStore;
use deposit_transport::PackageTransport;
use deposit_types::DepositId;
use thiserror::Error;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    ctx::DepositContext,
    handler,
    resolver::StatusPollHandle,
    task::{self, TaskOutcome},
};

/// Queued jobs beyond the ones workers are executing.
const QUEUE_DEPTH: usize = 64;

/// The pool has shut down; no further tasks are accepted.
#[derive(Debug, Error)]
#[error("deposit pool is shut down")]
pub struct PoolClosed;

/// Submits deposit tasks to the pool.
#[derive(Debug, Clone)]
pub struct DepositPoolHandle {
    tx: mpsc::Sender<DepositId>,
}

impl DepositPoolHandle {
    /// Queues one deposit task, waiting when the pool is saturated.
    pub async fn submit(&self, deposit_id: DepositId) -> Result<(), PoolClosed> {
        self.tx.send(deposit_id).await.map_err(|_| PoolClosed)
    }

    /// A handle backed by a bare channel, for tests that assert on what
    /// gets scheduled without running workers.
    #[cfg(test)]
    pub(crate) fn test_handle(depth: usize) -> (DepositPoolHandle, mpsc::Receiver<DepositId>) {
        let (tx, rx) = mpsc::channel(depth);
        (DepositPoolHandle { tx }, rx)
    }
}

/// The running pool; holds the worker join handles for draining.
#[derive(Debug)]
pub struct DepositPool {
    workers: Vec<JoinHandle<()>>,
}

impl DepositPool {
    /// Spawns `workers` deposit workers sharing one queue.
    pub fn spawn<S, T>(
        ctx: DepositContext<S, T>,
        resolver: StatusPollHandle,
        workers: usize,
    ) -> (DepositPoolHandle, DepositPool)
    where
        S: RecordStore + 'static,
        T: PackageTransport + 'static,
    {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let ctx = ctx.clone();
                let resolver = resolver.clone();
                let rx = rx.clone();
                tokio::spawn(async move {
                    loop {
                        let job = rx.lock().await.recv().await;
                        let Some(deposit_id) = job else {
                            debug!(worker, "deposit queue closed; worker exiting");
                            return;
                        };
                        run_one(&ctx, &resolver, deposit_id).await;
                    }
                })
            })
            .collect();

        (DepositPoolHandle { tx }, DepositPool { workers: handles })
    }

    /// Waits for in-flight tasks to finish, aborting whatever is still
    /// running when the timeout expires. All pool handles must be dropped
    /// first or the workers never observe the closed queue.
    pub async fn drain(self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        for mut worker in self.workers {
            if tokio::time::timeout_at(deadline, &mut worker).await.is_err() {
                warn!("deposit worker did not drain in time; aborting");
                worker.abort();
            }
        }
    }
}

async fn run_one<S, T>(
    ctx: &DepositContext<S, T>,
    resolver: &StatusPollHandle,
    deposit_id: DepositId,
) where
    S: RecordStore,
    T: PackageTransport,
{
    match task::execute_deposit(ctx, &deposit_id).await {
        Ok(TaskOutcome::AwaitingStatus(id)) => resolver.enqueue(id),
        Ok(TaskOutcome::Accepted) => {
            info!(deposit = %deposit_id, "deposit task completed with inferred acceptance");
        }
        Ok(TaskOutcome::Skipped) => {}
        Err(e) => handler::handle(ctx.store.as_ref(), &e).await,
    }
}
