use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config")]
    Parse(#[from] toml::de::Error),

    /// A repository entry is internally inconsistent.
    #[error("repository {key}: {reason}")]
    InvalidRepository { key: String, reason: String },
}
