use thiserror::Error;

/// Failures moving a package to an archive.
///
/// The transient/permanent split drives retry behavior: transient
/// failures are re-attempted inside the session's connect window,
/// permanent ones fail the deposit immediately.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not reach the archive (refused, reset, DNS, timed out).
    #[error("connecting to {target}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// The archive refused our credentials.
    #[error("authentication rejected by {target}")]
    AuthDenied { target: String },

    /// No credentials are configured for the target.
    #[error("no auth realm covers {target}")]
    MissingRealm { target: String },

    /// The archive answered with a failure status. The body is carried
    /// verbatim so archive-side diagnostics (checksum mismatches and the
    /// like) reach the deposit record.
    #[error("{target} answered {status}: {body}")]
    Http {
        target: String,
        status: u16,
        body: String,
    },

    /// An FTP command failed.
    #[error("ftp {command} failed with {code}: {message}")]
    Ftp {
        command: &'static str,
        code: u16,
        message: String,
    },

    /// The archive's response did not parse as the expected document.
    #[error("malformed response from {target}")]
    MalformedResponse {
        target: String,
        #[source]
        source: deposit_sword::SwordError,
    },

    /// The package stream failed while we were sending it.
    #[error(transparent)]
    Package(#[from] deposit_package::PackageError),

    /// Destination file already exists and overwrite is off.
    #[error("{path} already exists and overwrite is disabled")]
    FileExists { path: String },

    /// Plumbing-level I/O failure mid-session.
    #[error("transport i/o")]
    Io(#[from] std::io::Error),

    /// HTTP client failure (connection, body, protocol).
    #[error("http transport")]
    Reqwest(#[from] reqwest::Error),
}

impl TransportError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Connect { .. } | TransportError::Io(_) => true,
            TransportError::Http { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            TransportError::Reqwest(e) => e.is_timeout() || e.is_connect(),
            // FTP 4yz replies are transient negative completions; 5yz are
            // permanent.
            TransportError::Ftp { code, .. } => (400..500).contains(code),
            TransportError::AuthDenied { .. }
            | TransportError::MissingRealm { .. }
            | TransportError::MalformedResponse { .. }
            | TransportError::Package(_)
            | TransportError::FileExists { .. } => false,
        }
    }

    /// The full cause chain, joined for persistence on a deposit record.
    pub fn message_chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str(": ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }
}
