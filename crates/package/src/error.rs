use std::path::PathBuf;

use thiserror::Error;

/// Failures raised while assembling or consuming a package.
#[derive(Debug, Error)]
pub enum PackageError {
    /// A declared custodial file could not be found on disk.
    #[error("{name} ({path}) was not included in the {container} package")]
    MissingFile {
        name: String,
        path: PathBuf,
        container: &'static str,
    },

    /// Reading a custodial file's bytes failed partway.
    #[error("reading entry {name}")]
    EntryRead {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The archive or compression layer failed.
    #[error("writing the {container} package")]
    ArchiveWrite {
        container: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The consumer closed the pipe while the writer was still emitting.
    #[error("package consumer closed the stream before EOF")]
    ConsumerGone,

    /// The writer worker disappeared without stashing a cause.
    #[error("package writer terminated abnormally")]
    WriterGone,
}

impl PackageError {
    /// Maps the broken-pipe signal the archive layer sees onto the
    /// consumer-gone variant; everything else stays an archive failure.
    pub(crate) fn from_archive_io(container: &'static str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::BrokenPipe {
            PackageError::ConsumerGone
        } else {
            PackageError::ArchiveWrite { container, source }
        }
    }
}
