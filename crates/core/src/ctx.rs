use std::sync::Arc;

use deposit_assembler::AssemblerRegistry;
use deposit_config::RepositoriesConfig;

/// Shared, read-only context every worker captures: the record store, the
/// transport resolver, the assembler registry, and the per-repository
/// configuration snapshot.
#[derive(Debug)]
pub struct DepositContext<S, T> {
    pub store: Arc<S>,
    pub transports: Arc<T>,
    pub assemblers: Arc<AssemblerRegistry>,
    pub repositories: Arc<RepositoriesConfig>,
}

impl<S, T> Clone for DepositContext<S, T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            transports: self.transports.clone(),
            assemblers: self.assemblers.clone(),
            repositories: self.repositories.clone(),
        }
    }
}

impl<S, T> DepositContext<S, T> {
    pub fn new(
        store: Arc<S>,
        transports: Arc<T>,
        assemblers: Arc<AssemblerRegistry>,
        repositories: Arc<RepositoriesConfig>,
    ) -> Self {
        Self {
            store,
            transports,
            assemblers,
            repositories,
        }
    }
}
