//! FTP binding (RFC 959, passive mode).
//!
//! The control-channel client is deliberately small: connect with retry,
//! login, create the target directory idempotently, `STOR` the package
//! over a passive data connection. A successful store is terminal
//! acceptance; FTP archives issue no status document.

use std::time::Duration;

use deposit_config::{ProtocolBinding, TransportConfig};
use deposit_package::OpenPackage;
use deposit_retry::RetryPolicy;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufStream},
    net::TcpStream,
};
use tracing::debug;

use crate::{Session, TransportError, TransportOutcome};

/// Window inside which connect attempts (TCP + greeting) are retried.
/// Any failure in that window is treated as retryable.
const CONNECT_WINDOW: Duration = Duration::from_secs(30);
const CONNECT_DELAY: Duration = Duration::from_secs(1);
const CONNECT_BACKOFF: f64 = 1.5;

/// Directory-creation replies meaning "already exists".
const MKD_EXISTS: [u16; 2] = [550, 553];

/// An authenticated FTP session positioned in the target directory.
#[derive(Debug)]
pub struct FtpSession {
    control: BufStream<TcpStream>,
    host: String,
    base_directory: String,
}

impl FtpSession {
    /// Connects (with retry), logs in, sets the transfer type, and walks
    /// into the configured base directory, creating segments as needed.
    pub async fn open(transport: &TransportConfig) -> Result<Self, TransportError> {
        let ProtocolBinding::Ftp {
            host,
            port,
            base_directory,
            use_binary,
        } = &transport.protocol
        else {
            unreachable!("resolver dispatched a non-ftp binding");
        };

        let target = format!("{host}:{port}");
        let policy = RetryPolicy::new()
            .with_initial_delay(CONNECT_DELAY)
            .with_backoff_factor(CONNECT_BACKOFF)
            .with_timeout(CONNECT_WINDOW);

        // TCP connect and server greeting together form one attempt: a
        // server that accepts and immediately hangs up must count as a
        // failed connect.
        let report = deposit_retry::retry_until(
            &policy,
            || async {
                let stream = TcpStream::connect((host.as_str(), *port)).await?;
                let mut control = BufStream::new(stream);
                let (code, message) = read_reply(&mut control).await?;
                if code != 220 {
                    return Err(std::io::Error::other(format!(
                        "unexpected greeting {code}: {message}"
                    )));
                }
                Ok(control)
            },
            |_| true,
        )
        .await;
        let attempts = report.attempts();
        let control = report
            .into_verified()
            .map_err(|e| TransportError::Connect {
                target: target.clone(),
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, e),
            })?;
        debug!(%target, attempts, "ftp control connection established");

        let mut session = Self {
            control,
            host: host.clone(),
            base_directory: base_directory.clone(),
        };

        session.login(transport, host).await?;

        let type_code = if *use_binary { "I" } else { "A" };
        session
            .command(&format!("TYPE {type_code}"), &[200], "TYPE")
            .await?;

        session.enter_base_directory().await?;
        Ok(session)
    }

    async fn login(
        &mut self,
        transport: &TransportConfig,
        host: &str,
    ) -> Result<(), TransportError> {
        let realm_url = format!("ftp://{host}/");
        let (user, password) = match transport.realm_for(&realm_url) {
            Some(realm) => (
                realm.username.clone().unwrap_or_else(|| "anonymous".to_owned()),
                realm.password.clone().unwrap_or_default(),
            ),
            None => ("anonymous".to_owned(), String::new()),
        };

        let (code, message) = self.raw_command(&format!("USER {user}")).await?;
        match code {
            230 => return Ok(()),
            331 | 332 => {}
            _ => {
                return Err(auth_or_ftp_error("USER", code, message, &self.host));
            }
        }
        let (code, message) = self.raw_command(&format!("PASS {password}")).await?;
        if code != 230 {
            return Err(auth_or_ftp_error("PASS", code, message, &self.host));
        }
        Ok(())
    }

    /// `MKD` each segment (550/553 mean it already exists), then `CWD`
    /// into it.
    async fn enter_base_directory(&mut self) -> Result<(), TransportError> {
        let segments: Vec<String> = self
            .base_directory
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();
        for segment in segments {
            let (code, message) = self.raw_command(&format!("MKD {segment}")).await?;
            if code != 257 && !MKD_EXISTS.contains(&code) {
                return Err(TransportError::Ftp {
                    command: "MKD",
                    code,
                    message,
                });
            }
            self.command(&format!("CWD {segment}"), &[250], "CWD").await?;
        }
        Ok(())
    }

    /// Sends one command and enforces the expected reply codes.
    async fn command(
        &mut self,
        line: &str,
        expected: &[u16],
        name: &'static str,
    ) -> Result<(u16, String), TransportError> {
        let (code, message) = self.raw_command(line).await?;
        if !expected.contains(&code) {
            return Err(TransportError::Ftp {
                command: name,
                code,
                message,
            });
        }
        Ok((code, message))
    }

    async fn raw_command(&mut self, line: &str) -> Result<(u16, String), TransportError> {
        self.control.write_all(line.as_bytes()).await?;
        self.control.write_all(b"\r\n").await?;
        self.control.flush().await?;
        Ok(read_reply(&mut self.control).await?)
    }

    /// Destination path recorded as the repository copy's external id.
    fn stored_path(&self, name: &str) -> String {
        let dir = self.base_directory.trim_end_matches('/');
        if dir.is_empty() {
            format!("ftp://{}/{name}", self.host)
        } else if dir.starts_with('/') {
            format!("ftp://{}{dir}/{name}", self.host)
        } else {
            format!("ftp://{}/{dir}/{name}", self.host)
        }
    }
}

#[async_trait::async_trait]
impl Session for FtpSession {
    async fn send(&mut self, package: &mut OpenPackage) -> Result<TransportOutcome, TransportError> {
        let name = package.metadata().name;

        let (_, pasv) = self.command("PASV", &[227], "PASV").await?;
        let (ip, port) = parse_pasv(&pasv).ok_or_else(|| TransportError::Ftp {
            command: "PASV",
            code: 227,
            message: format!("unparseable passive reply: {pasv}"),
        })?;

        let mut data =
            TcpStream::connect((ip.as_str(), port))
                .await
                .map_err(|source| TransportError::Connect {
                    target: format!("{ip}:{port}"),
                    source,
                })?;

        self.command(&format!("STOR {name}"), &[125, 150], "STOR")
            .await?;

        while let Some(chunk) = package.next_chunk().await {
            let chunk = chunk?;
            data.write_all(&chunk).await?;
        }
        data.shutdown().await?;
        drop(data);

        self.read_transfer_completion().await?;
        debug!(name = %name, "ftp store complete");

        Ok(TransportOutcome::accepted(vec![self.stored_path(&name)]))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // Polite teardown; the server closing first is not an error.
        let _ = self.raw_command("QUIT").await;
        Ok(())
    }
}

impl FtpSession {
    async fn read_transfer_completion(&mut self) -> Result<(), TransportError> {
        let (code, message) = read_reply(&mut self.control).await?;
        if code != 226 && code != 250 {
            return Err(TransportError::Ftp {
                command: "STOR",
                code,
                message,
            });
        }
        Ok(())
    }
}

/// 530 means the credentials were refused; anything else unexpected
/// during login is a plain protocol failure.
fn auth_or_ftp_error(
    command: &'static str,
    code: u16,
    message: String,
    host: &str,
) -> TransportError {
    if code == 530 {
        TransportError::AuthDenied {
            target: host.to_owned(),
        }
    } else {
        TransportError::Ftp {
            command,
            code,
            message,
        }
    }
}

/// Reads one (possibly multi-line) FTP reply.
async fn read_reply(control: &mut BufStream<TcpStream>) -> std::io::Result<(u16, String)> {
    let mut line = String::new();
    if control.read_line(&mut line).await? == 0 {
        return Err(std::io::ErrorKind::UnexpectedEof.into());
    }
    let code: u16 = line
        .get(..3)
        .and_then(|c| c.parse().ok())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, line.clone()))?;

    let mut message = line.trim_end().to_string();
    if line.as_bytes().get(3) == Some(&b'-') {
        // Multi-line reply: read until "NNN " terminates it.
        let terminator = format!("{code} ");
        loop {
            let mut next = String::new();
            if control.read_line(&mut next).await? == 0 {
                return Err(std::io::ErrorKind::UnexpectedEof.into());
            }
            message.push('\n');
            message.push_str(next.trim_end());
            if next.starts_with(&terminator) {
                break;
            }
        }
    }
    Ok((code, message))
}

/// Extracts (ip, port) from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`
/// reply.
fn parse_pasv(reply: &str) -> Option<(String, u16)> {
    let start = reply.find('(')? + 1;
    let end = reply[start..].find(')')? + start;
    let mut parts = reply[start..end].split(',').map(str::trim);
    let octets: Vec<&str> = parts.by_ref().take(4).collect();
    if octets.len() != 4 || octets.iter().any(|o| o.parse::<u8>().is_err()) {
        return None;
    }
    let p1: u16 = parts.next()?.parse().ok()?;
    let p2: u16 = parts.next()?.parse().ok()?;
    Some((octets.join("."), p1 * 256 + p2))
}
