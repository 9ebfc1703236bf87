//! Event ingress: consumes change notifications, policy-filters them,
//! and dispatches the survivors.
//!
//! Submission events go to the dispatcher; deposit modifications that
//! carry a status reference and are still in *submitted* go to the
//! status resolver. Everything else is acknowledged without work.

use std::collections::HashSet;

use deposit_config::IngressPolicy;
use deposit_store::{RecordStore, RecordStoreExt};
use deposit_transport::PackageTransport;
use deposit_types::{ChangeEvent, Deposit, DepositStatus, EventKind, RecordKind, SubmissionId};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::{
    ctx::DepositContext, dispatcher, pool::DepositPoolHandle, resolver::StatusPollHandle,
};

/// Compiled form of the configured ingress policy.
#[derive(Debug, Clone)]
pub struct IngressFilter {
    accepted_types: HashSet<RecordKind>,
    accepted_kinds: HashSet<EventKind>,
}

impl IngressFilter {
    /// Compiles the policy; unknown type or kind names are ignored with a
    /// warning.
    pub fn compile(policy: &IngressPolicy) -> Self {
        let accepted_types = policy
            .accepted_types
            .iter()
            .filter_map(|name| match name.as_str() {
                "submission" => Some(RecordKind::Submission),
                "repository" => Some(RecordKind::Repository),
                "deposit" => Some(RecordKind::Deposit),
                "repository-copy" => Some(RecordKind::RepositoryCopy),
                other => {
                    warn!(entity_type = other, "unknown entity type in ingress policy");
                    None
                }
            })
            .collect();
        let accepted_kinds = policy
            .accepted_kinds
            .iter()
            .filter_map(|name| match name.as_str() {
                "created" => Some(EventKind::Created),
                "modified" => Some(EventKind::Modified),
                other => {
                    warn!(event_kind = other, "unknown event kind in ingress policy");
                    None
                }
            })
            .collect();
        Self {
            accepted_types,
            accepted_kinds,
        }
    }

    /// Whether the event passes the policy.
    pub fn accepts(&self, event: &ChangeEvent) -> bool {
        self.accepted_types.contains(&event.entity_kind())
            && self.accepted_kinds.contains(&event.event_kind())
    }
}

/// The ingress worker: routes accepted events until shutdown.
///
/// Shutting down stops consumption; in-flight deposit tasks drain through
/// the pool's own shutdown. Events published while nobody listens may be
/// redelivered by the source or lost, which the periodic aggregator and
/// remediation sweeps tolerate.
pub async fn ingress_task<S, T>(
    ctx: DepositContext<S, T>,
    filter: IngressFilter,
    pool: DepositPoolHandle,
    resolver: StatusPollHandle,
    mut events: broadcast::Receiver<ChangeEvent>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: RecordStore,
    T: PackageTransport,
{
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("ingress shutting down");
                    return;
                }
                continue;
            }
        };

        let event = match event {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "ingress lagged behind the event stream");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => {
                info!("event stream closed; ingress exiting");
                return;
            }
        };

        if !filter.accepts(&event) {
            debug!(entity = %event.entity_id(), kind = ?event.entity_kind(), "event filtered");
            continue;
        }

        route(&ctx, &pool, &resolver, &event).await;
    }
}

async fn route<S, T>(
    ctx: &DepositContext<S, T>,
    pool: &DepositPoolHandle,
    resolver: &StatusPollHandle,
    event: &ChangeEvent,
) where
    S: RecordStore,
    T: PackageTransport,
{
    match event.entity_kind() {
        RecordKind::Submission => {
            let submission_id = SubmissionId::new(event.entity_id());
            if let Err(e) = dispatcher::dispatch_submission(ctx, pool, &submission_id).await {
                crate::handler::handle(ctx.store.as_ref(), &e).await;
            }
        }
        RecordKind::Deposit if event.event_kind() == EventKind::Modified => {
            match ctx
                .store
                .read_record::<Deposit>(event.entity_id())
                .await
            {
                Ok(deposit)
                    if deposit.record().deposit_status() == DepositStatus::Submitted
                        && deposit.record().deposit_status_ref().is_some() =>
                {
                    resolver.enqueue(deposit.record().id().clone());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(deposit = %event.entity_id(), error = %e, "cannot read deposit for event");
                }
            }
        }
        _ => {}
    }
}
