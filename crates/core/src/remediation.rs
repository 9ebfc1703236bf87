//! Remediation sweep: re-arms failed deposits.
//!
//! Failed is an intermediate status. When the sweep is enabled, deposits
//! that have sat in failed longer than the configured age are flipped
//! back to not-started through the critical section and re-queued on the
//! worker pool. Off by default, which keeps remediation an operator
//! decision.

use chrono::Utc;
use deposit_config::RemediationConfig;
use deposit_store::{perform_critical, RecordStore, RecordStoreExt};
use deposit_transport::PackageTransport;
use deposit_types::{Deposit, DepositId, DepositStatus, RecordKind};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::{ctx::DepositContext, error::ServiceError, pool::DepositPoolHandle};

/// One sweep: re-arms every failed deposit older than `min_age` and
/// returns the re-armed ids.
pub async fn remediation_sweep<S, T>(
    ctx: &DepositContext<S, T>,
    pool: &DepositPoolHandle,
    config: &RemediationConfig,
) -> Result<Vec<DepositId>, ServiceError>
where
    S: RecordStore,
    T: PackageTransport,
{
    let store = ctx.store.as_ref();
    let failed_ids = store
        .find_by_attribute(RecordKind::Deposit, "depositStatus", "failed")
        .await
        .map_err(|e| ServiceError::other_caused("listing failed deposits", e))?;

    let min_age = chrono::Duration::from_std(config.min_age())
        .map_err(|e| ServiceError::other(format!("remediation min-age out of range: {e}")))?;
    let cutoff = Utc::now() - min_age;

    let mut rearmed = Vec::new();
    for id in failed_ids {
        let deposit: Deposit = match store.read_record(&id).await {
            Ok(v) => v.into_record(),
            Err(e) => {
                debug!(deposit = %id, error = %e, "cannot read failed deposit");
                continue;
            }
        };
        if deposit.updated_at() > cutoff {
            continue;
        }

        let result = perform_critical::<Deposit, _, _, _, _>(
            store,
            &id,
            |d| d.deposit_status() == DepositStatus::Failed,
            |mut d| {
                d.set_deposit_status(DepositStatus::NotStarted);
                d.set_status_message(None);
                d.set_deposit_status_ref(None);
                d
            },
            |d| d.deposit_status() == DepositStatus::NotStarted,
        )
        .await;

        if result.success() {
            let deposit_id = DepositId::new(id.clone());
            info!(deposit = %deposit_id, "failed deposit re-armed");
            if pool.submit(deposit_id.clone()).await.is_err() {
                // Pool is gone; the deposit stays not-started and the
                // next dispatch picks it up.
                break;
            }
            rearmed.push(deposit_id);
        }
    }
    Ok(rearmed)
}

/// The periodic remediation worker. Returns immediately when disabled.
pub async fn remediation_task<S, T>(
    ctx: DepositContext<S, T>,
    pool: DepositPoolHandle,
    config: RemediationConfig,
    mut shutdown: watch::Receiver<bool>,
) where
    S: RecordStore,
    T: PackageTransport,
{
    if !config.enabled {
        debug!("remediation disabled");
        return;
    }

    let mut ticker = tokio::time::interval(config.interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("remediation shutting down");
                    return;
                }
                continue;
            }
        }

        match remediation_sweep(&ctx, &pool, &config).await {
            Ok(rearmed) if !rearmed.is_empty() => {
                info!(count = rearmed.len(), "remediation sweep re-armed deposits");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "remediation sweep failed"),
        }
    }
}
