//! Configuration for the deposit pipeline.
//!
//! Two layers: [`RepositoriesConfig`], one entry per downstream archive
//! (protocol binding, auth realms, assembly spec, status mapping), and
//! [`ServiceConfig`], the service-wide tuning knobs. Both load from one
//! TOML file and are read-only after startup; in-flight tasks capture
//! immutable snapshots behind an `Arc`.

mod error;
mod repositories;
mod service;

pub use error::ConfigError;
pub use repositories::{
    Archive, AssemblySpec, AuthMech, AuthRealm, ChecksumAlgorithm, Compression, MappedStatus,
    ProtocolBinding, RepositoriesConfig, RepositoryConfig, StatusMapping, TransportConfig,
};
pub use service::{IngressPolicy, RemediationConfig, ServiceConfig};

use std::path::Path;

use serde::Deserialize;

/// Everything `depositd` reads at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DepositConfig {
    /// Service-wide tuning.
    #[serde(default)]
    pub service: ServiceConfig,
    /// Per-archive configuration, keyed by repository key.
    #[serde(flatten)]
    pub repositories: RepositoriesConfig,
}

impl DepositConfig {
    /// Parses a TOML configuration document.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: DepositConfig = toml::from_str(raw)?;
        config.repositories.validate()?;
        Ok(config)
    }

    /// Loads and parses the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml(&raw)
    }
}
