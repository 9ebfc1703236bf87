//! Transport layer: moves an assembled package's bytes to an archive.
//!
//! Three protocol bindings: SWORD v2 over HTTPS, FTP, and the local
//! filesystem. A [`Session`] is a scoped resource: opening one performs
//! authentication and any protocol handshake, closing it tears the
//! connection down. The [`Transports`] resolver picks the binding from a
//! repository's protocol configuration.

use async_trait::async_trait;
use deposit_config::{ProtocolBinding, RepositoryConfig};
use deposit_package::OpenPackage;

mod error;
mod filesystem;
mod ftp;
mod sword2;

pub use error::TransportError;
pub use filesystem::FilesystemSession;
pub use ftp::FtpSession;
pub use sword2::Sword2Session;

/// What a successful transmission established.
#[derive(Debug, Clone, Default)]
pub struct TransportOutcome {
    status_ref: Option<String>,
    external_ids: Vec<String>,
    accepted: bool,
}

impl TransportOutcome {
    /// Success that leaves the deposit in *submitted*: terminal state is
    /// decided later by polling the status reference.
    pub fn pending(status_ref: impl Into<String>, external_ids: Vec<String>) -> Self {
        Self {
            status_ref: Some(status_ref.into()),
            external_ids,
            accepted: false,
        }
    }

    /// Success from a transport with no status document: acceptance is
    /// inferred from the transport response alone.
    pub fn accepted(external_ids: Vec<String>) -> Self {
        Self {
            status_ref: None,
            external_ids,
            accepted: true,
        }
    }

    /// URI of the archive's status document, when the protocol issues
    /// one.
    pub fn status_ref(&self) -> Option<&str> {
        self.status_ref.as_deref()
    }

    /// Archive-side identifiers for the stored package.
    pub fn external_ids(&self) -> &[String] {
        &self.external_ids
    }

    /// Whether transport success alone implies acceptance.
    pub fn is_accepted(&self) -> bool {
        self.accepted
    }
}

/// An authenticated protocol session bound to one archive.
#[async_trait]
pub trait Session: Send {
    /// Streams the package body and interprets the archive's response.
    async fn send(&mut self, package: &mut OpenPackage) -> Result<TransportOutcome, TransportError>;

    /// Tears the session down. Dropping without closing is tolerated but
    /// skips protocol-level goodbyes.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// The seam the deposit task talks to: open the right session for a
/// repository, send one package, close.
#[cfg_attr(feature = "test-utils", mockall::automock)]
#[async_trait]
pub trait PackageTransport: Send + Sync {
    async fn transmit(
        &self,
        config: &RepositoryConfig,
        package: &mut OpenPackage,
    ) -> Result<TransportOutcome, TransportError>;
}

/// Protocol resolver over the three concrete bindings.
#[derive(Debug, Default)]
pub struct Transports;

impl Transports {
    pub fn new() -> Self {
        Self
    }

    /// Opens a session appropriate for the repository's protocol binding.
    pub async fn open(
        &self,
        config: &RepositoryConfig,
    ) -> Result<Box<dyn Session>, TransportError> {
        match &config.transport.protocol {
            ProtocolBinding::Sword2 { .. } => {
                Ok(Box::new(Sword2Session::open(&config.transport).await?))
            }
            ProtocolBinding::Ftp { .. } => Ok(Box::new(FtpSession::open(&config.transport).await?)),
            ProtocolBinding::Filesystem { .. } => {
                Ok(Box::new(FilesystemSession::open(&config.transport).await?))
            }
        }
    }
}

#[async_trait]
impl PackageTransport for Transports {
    async fn transmit(
        &self,
        config: &RepositoryConfig,
        package: &mut OpenPackage,
    ) -> Result<TransportOutcome, TransportError> {
        let mut session = self.open(config).await?;
        let outcome = session.send(package).await;
        // Best-effort teardown either way; the send outcome wins.
        let closed = session.close().await;
        let outcome = outcome?;
        closed?;
        Ok(outcome)
    }
}
