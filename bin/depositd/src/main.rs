//! Deposit service daemon.
//!
//! Loads the repositories configuration, wires the pipeline workers, and
//! runs until interrupted. The record-store backend here is the
//! in-memory dev-mode store; a deployment against the shared record
//! store swaps the store implementation at this seam.

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use deposit_assembler::AssemblerRegistry;
use deposit_config::DepositConfig;
use deposit_core::{resolver::HttpStatementFetcher, DepositContext, DepositServiceBuilder};
use deposit_store::memory::InMemoryStore;
use deposit_transport::Transports;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Watches submissions and drives deposits to their archives.
#[derive(Debug, Parser)]
#[command(name = "depositd", version)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, value_name = "FILE")]
    config: PathBuf,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = DepositConfig::load(&args.config)?;
    let repositories = Arc::new(config.repositories);
    info!(
        repositories = repositories.keys().count(),
        workers = config.service.deposit_workers,
        "starting deposit service"
    );

    let (events_tx, events_rx) = broadcast::channel(1024);
    let store = Arc::new(InMemoryStore::new().with_event_sender(events_tx));

    let ctx = DepositContext::new(
        store,
        Arc::new(Transports::new()),
        Arc::new(AssemblerRegistry::with_defaults()),
        repositories.clone(),
    );
    let fetcher = Arc::new(HttpStatementFetcher::new(repositories)?);

    let service = DepositServiceBuilder::new(ctx, fetcher, config.service).spawn(events_rx);

    tokio::signal::ctrl_c().await?;
    info!("interrupt received; draining");
    service.shutdown().await;
    Ok(())
}
