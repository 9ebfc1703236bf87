use std::time::Duration;

use serde::Deserialize;

use deposit_defaults::*;

/// Service-wide tuning knobs. Every field has a default, so a minimal
/// config file can omit the whole table.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct ServiceConfig {
    /// Parallelism of the deposit worker pool.
    pub deposit_workers: usize,
    /// Seconds between submission-status aggregation sweeps.
    pub aggregator_interval_secs: u64,
    /// Seconds the shutdown drain waits for in-flight deposits.
    pub drain_timeout_secs: u64,
    /// Event ingress policy filter.
    pub ingress: IngressPolicy,
    /// Automatic re-arming of failed deposits.
    pub remediation: RemediationConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            deposit_workers: DEFAULT_DEPOSIT_WORKERS,
            aggregator_interval_secs: DEFAULT_AGGREGATOR_INTERVAL_SECS,
            drain_timeout_secs: DEFAULT_DRAIN_TIMEOUT_SECS,
            ingress: IngressPolicy::default(),
            remediation: RemediationConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn aggregator_interval(&self) -> Duration {
        Duration::from_secs(self.aggregator_interval_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Which change events the ingress accepts.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct IngressPolicy {
    /// Accepted entity types, e.g. `["submission", "deposit"]`.
    pub accepted_types: Vec<String>,
    /// Accepted event kinds, e.g. `["created", "modified"]`.
    pub accepted_kinds: Vec<String>,
}

impl Default for IngressPolicy {
    fn default() -> Self {
        Self {
            accepted_types: vec!["submission".to_owned(), "deposit".to_owned()],
            accepted_kinds: vec!["created".to_owned(), "modified".to_owned()],
        }
    }
}

/// Re-arming policy for failed deposits.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct RemediationConfig {
    /// Whether the sweep runs at all.
    pub enabled: bool,
    /// Seconds between sweeps.
    pub interval_secs: u64,
    /// Minimum age of a failed deposit before it is re-armed.
    pub min_age_secs: u64,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: DEFAULT_REMEDIATION_INTERVAL_SECS,
            min_age_secs: DEFAULT_REMEDIATION_MIN_AGE_SECS,
        }
    }
}

impl RemediationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn min_age(&self) -> Duration {
        Duration::from_secs(self.min_age_secs)
    }
}

mod deposit_defaults {
    pub(super) const DEFAULT_DEPOSIT_WORKERS: usize = 4;
    pub(super) const DEFAULT_AGGREGATOR_INTERVAL_SECS: u64 = 600;
    pub(super) const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;
    pub(super) const DEFAULT_REMEDIATION_INTERVAL_SECS: u64 = 3600;
    pub(super) const DEFAULT_REMEDIATION_MIN_AGE_SECS: u64 = 86_400;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_a_service_table() {
        let config: ServiceConfig = toml::from_str("").unwrap();
        assert_eq!(config.deposit_workers, 4);
        assert_eq!(config.aggregator_interval(), Duration::from_secs(600));
        assert!(!config.remediation.enabled);
        assert_eq!(config.ingress.accepted_types, ["submission", "deposit"]);
    }

    #[test]
    fn overrides_parse() {
        let config: ServiceConfig = toml::from_str(
            r#"
            deposit-workers = 8
            aggregator-interval-secs = 60

            [remediation]
            enabled = true
            min-age-secs = 3600
            "#,
        )
        .unwrap();
        assert_eq!(config.deposit_workers, 8);
        assert!(config.remediation.enabled);
        assert_eq!(config.remediation.min_age(), Duration::from_secs(3600));
        // Untouched knobs keep their defaults.
        assert_eq!(config.drain_timeout(), Duration::from_secs(30));
    }
}
