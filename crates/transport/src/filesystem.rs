//! Filesystem binding.
//!
//! Writes the package to `base_dir/name`. Refuses to clobber an existing
//! file unless overwrite is configured. The absolute path of the written
//! file becomes the repository copy's external id; there is no status
//! document to poll.

use std::path::PathBuf;

use deposit_config::{ProtocolBinding, TransportConfig};
use deposit_package::OpenPackage;
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;

use crate::{Session, TransportError, TransportOutcome};

/// A session rooted at the configured base directory.
#[derive(Debug)]
pub struct FilesystemSession {
    base_dir: PathBuf,
    overwrite: bool,
}

impl FilesystemSession {
    /// Verifies (and optionally creates) the base directory.
    pub async fn open(transport: &TransportConfig) -> Result<Self, TransportError> {
        let ProtocolBinding::Filesystem {
            base_dir,
            overwrite,
            create_if_missing,
        } = &transport.protocol
        else {
            unreachable!("resolver dispatched a non-filesystem binding");
        };

        let base_dir = PathBuf::from(base_dir);
        if *create_if_missing {
            fs::create_dir_all(&base_dir).await?;
        } else {
            // Surface a missing directory as a connect-style failure.
            fs::metadata(&base_dir)
                .await
                .map_err(|source| TransportError::Connect {
                    target: base_dir.display().to_string(),
                    source,
                })?;
        }

        Ok(Self {
            base_dir,
            overwrite: *overwrite,
        })
    }
}

#[async_trait::async_trait]
impl Session for FilesystemSession {
    async fn send(&mut self, package: &mut OpenPackage) -> Result<TransportOutcome, TransportError> {
        let name = package.metadata().name;
        let path = self.base_dir.join(&name);

        if !self.overwrite && fs::try_exists(&path).await? {
            return Err(TransportError::FileExists {
                path: path.display().to_string(),
            });
        }

        let mut file = fs::File::create(&path).await?;
        while let Some(chunk) = package.next_chunk().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        let absolute = fs::canonicalize(&path).await.unwrap_or(path);
        debug!(path = %absolute.display(), "package written");
        Ok(TransportOutcome::accepted(vec![absolute
            .display()
            .to_string()]))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}
