//! Service assembly: builds every worker and supervises shutdown.

use std::{sync::Arc, time::Duration};

use deposit_config::ServiceConfig;
use deposit_store::RecordStore;
use deposit_transport::PackageTransport;
use deposit_types::ChangeEvent;
use tokio::{sync::{broadcast, watch}, task::JoinHandle};
use tracing::info;

use crate::{
    aggregator, ctx::DepositContext, ingress::{self, IngressFilter}, pool::{DepositPool, DepositPoolHandle},
    remediation, resolver::{ResolverSchedule, StatementFetcher, StatusPollHandle, StatusResolverBuilder},
};

/// Builder wiring the pipeline's workers together.
pub struct DepositServiceBuilder<S, T, F> {
    ctx: DepositContext<S, T>,
    fetcher: Arc<F>,
    config: ServiceConfig,
    schedule: ResolverSchedule,
}

impl<S, T, F> DepositServiceBuilder<S, T, F>
where
    S: RecordStore + 'static,
    T: PackageTransport + 'static,
    F: StatementFetcher + 'static,
{
    pub fn new(ctx: DepositContext<S, T>, fetcher: Arc<F>, config: ServiceConfig) -> Self {
        Self {
            ctx,
            fetcher,
            config,
            schedule: ResolverSchedule::default(),
        }
    }

    /// Overrides the status-polling schedule (tests use short horizons).
    pub fn with_resolver_schedule(mut self, schedule: ResolverSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Spawns every worker and returns the running service.
    pub fn spawn(self, events: broadcast::Receiver<ChangeEvent>) -> DepositService {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (resolver_handle, resolver_task) = StatusResolverBuilder::new(
            self.ctx.store.clone(),
            self.ctx.repositories.clone(),
            self.fetcher,
        )
        .with_schedule(self.schedule)
        .build();
        let resolver = tokio::spawn(resolver_task);

        let (pool_handle, pool) = DepositPool::spawn(
            self.ctx.clone(),
            resolver_handle.clone(),
            self.config.deposit_workers,
        );

        let aggregator = tokio::spawn(aggregator::aggregator_task(
            self.ctx.store.clone(),
            self.config.aggregator_interval(),
            shutdown_rx.clone(),
        ));

        let remediation = tokio::spawn(remediation::remediation_task(
            self.ctx.clone(),
            pool_handle.clone(),
            self.config.remediation.clone(),
            shutdown_rx.clone(),
        ));

        let filter = IngressFilter::compile(&self.config.ingress);
        let ingress = tokio::spawn(ingress::ingress_task(
            self.ctx.clone(),
            filter,
            pool_handle.clone(),
            resolver_handle.clone(),
            events,
            shutdown_rx,
        ));

        DepositService {
            shutdown_tx,
            pool_handle: Some(pool_handle),
            pool: Some(pool),
            resolver_handle: Some(resolver_handle),
            workers: vec![ingress, aggregator, remediation],
            resolver: Some(resolver),
            drain_timeout: self.config.drain_timeout(),
        }
    }
}

/// A running deposit service.
pub struct DepositService {
    shutdown_tx: watch::Sender<bool>,
    pool_handle: Option<DepositPoolHandle>,
    pool: Option<DepositPool>,
    resolver_handle: Option<StatusPollHandle>,
    workers: Vec<JoinHandle<()>>,
    resolver: Option<JoinHandle<()>>,
    drain_timeout: Duration,
}

impl DepositService {
    /// Stops the ingress and schedulers, then drains the deposit pool
    /// within the configured timeout. Best effort: pollers still in
    /// flight are aborted.
    pub async fn shutdown(mut self) {
        info!("deposit service shutting down");
        let _ = self.shutdown_tx.send(true);

        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }

        // Closing the queue lets the workers drain what they hold.
        drop(self.pool_handle.take());
        if let Some(pool) = self.pool.take() {
            pool.drain(self.drain_timeout).await;
        }

        // Resolver: drop the handle and give in-flight pollers a bounded
        // window before aborting.
        drop(self.resolver_handle.take());
        if let Some(mut resolver) = self.resolver.take() {
            if tokio::time::timeout(self.drain_timeout, &mut resolver)
                .await
                .is_err()
            {
                info!("status pollers still in flight at shutdown; aborting");
                resolver.abort();
            }
        }
    }
}
