use std::collections::HashMap;

use serde::Deserialize;

use crate::error::ConfigError;

/// Per-archive configuration, keyed by the repository key carried on
/// repository records.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RepositoriesConfig {
    #[serde(default, rename = "repository")]
    repositories: HashMap<String, RepositoryConfig>,
}

impl RepositoriesConfig {
    /// Builds a configuration from in-memory entries (embedded setups
    /// and tests; files go through the TOML loader).
    pub fn from_entries(entries: impl IntoIterator<Item = (String, RepositoryConfig)>) -> Self {
        Self {
            repositories: entries.into_iter().collect(),
        }
    }

    /// The configuration for a repository key, if one is configured.
    pub fn lookup(&self, repository_key: &str) -> Option<&RepositoryConfig> {
        self.repositories.get(repository_key)
    }

    /// All configured repository keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.repositories.keys().map(String::as_str)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        for (key, repo) in &self.repositories {
            repo.validate(key)?;
        }
        Ok(())
    }
}

/// One archive's runtime configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RepositoryConfig {
    /// The wire protocol and its binding details.
    pub transport: TransportConfig,
    /// How packages for this archive are assembled.
    pub assembly: AssemblySpec,
    /// How archive-side statement terms map to deposit outcomes.
    #[serde(default)]
    pub status_mapping: StatusMapping,
}

impl RepositoryConfig {
    fn validate(&self, key: &str) -> Result<(), ConfigError> {
        if self.assembly.checksums.is_empty() {
            return Err(ConfigError::InvalidRepository {
                key: key.to_owned(),
                reason: "assembly.checksums must name at least one algorithm".to_owned(),
            });
        }
        if matches!(self.transport.protocol, ProtocolBinding::Sword2 { .. })
            && self.status_mapping.map.is_empty()
        {
            return Err(ConfigError::InvalidRepository {
                key: key.to_owned(),
                reason: "sword2 repositories need a status-mapping".to_owned(),
            });
        }
        Ok(())
    }
}

/// Transport binding plus the credentials to present.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TransportConfig {
    pub protocol: ProtocolBinding,
    #[serde(default)]
    pub auth_realms: Vec<AuthRealm>,
}

impl TransportConfig {
    /// The realm whose base URL prefixes `url`, if any.
    pub fn realm_for(&self, url: &str) -> Option<&AuthRealm> {
        self.auth_realms
            .iter()
            .find(|realm| url.starts_with(&realm.base_url))
    }
}

/// The protocol a repository is reached over.
#[derive(Debug, Clone, Deserialize)]
#[serde(
    rename_all = "kebab-case",
    rename_all_fields = "kebab-case",
    tag = "kind",
    deny_unknown_fields
)]
pub enum ProtocolBinding {
    /// SWORD v2 over HTTPS.
    Sword2 {
        /// Collection URL packages are POSTed to.
        collection_url: String,
        /// Optional mediated-deposit user.
        #[serde(default)]
        on_behalf_of: Option<String>,
    },
    /// FTP per RFC 959.
    Ftp {
        host: String,
        #[serde(default = "default_ftp_port")]
        port: u16,
        /// Directory packages are stored under; segments are created
        /// idempotently.
        base_directory: String,
        #[serde(default)]
        use_binary: bool,
    },
    /// Local or mounted filesystem.
    Filesystem {
        base_dir: String,
        #[serde(default)]
        overwrite: bool,
        #[serde(default = "default_true")]
        create_if_missing: bool,
    },
}

fn default_ftp_port() -> u16 {
    21
}

fn default_true() -> bool {
    true
}

/// One authentication realm.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AuthRealm {
    pub mech: AuthMech,
    /// URLs this realm covers (prefix match).
    pub base_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Authentication mechanism for a realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMech {
    /// Username/password credentials.
    Userpass,
    /// Ambient trust (e.g. anonymous FTP, local filesystem).
    Implicit,
    /// Credentials resolved externally by reference.
    Reference,
}

/// How a package for this repository is assembled.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AssemblySpec {
    /// Packaging dialect URI; selects the assembler.
    pub spec_uri: String,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default)]
    pub archive: Archive,
    /// Digests computed over every entry and the whole body.
    pub checksums: Vec<ChecksumAlgorithm>,
}

/// Outer compression applied to the archive stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

/// Container format of the package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Archive {
    #[default]
    Zip,
    Tar,
}

/// Digest algorithms the assembler computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChecksumAlgorithm {
    Md5,
    Sha256,
    Sha512,
}

/// Maps archive statement terms to deposit outcomes.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct StatusMapping {
    /// The category scheme whose terms carry the deposit state.
    #[serde(default = "default_state_scheme")]
    pub scheme: String,
    /// term -> outcome. Unknown terms resolve to in-progress, never to
    /// rejection.
    #[serde(default)]
    pub map: HashMap<String, MappedStatus>,
}

impl Default for StatusMapping {
    fn default() -> Self {
        Self {
            scheme: default_state_scheme(),
            map: HashMap::new(),
        }
    }
}

fn default_state_scheme() -> String {
    "http://purl.org/net/sword/terms/state".to_owned()
}

/// Outcome a statement term maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MappedStatus {
    Accepted,
    Rejected,
    InProgress,
    Failed,
}
