//! SWORD v2 binding over HTTPS.
//!
//! One POST of the package body to the collection URL, with the packaging
//! spec, disposition, and MD5 headers the protocol requires. The deposit
//! receipt's statement link becomes the deposit's status reference;
//! terminal acceptance is decided later by the status resolver.

use std::time::Duration;

use base64::Engine as _;
use deposit_config::{ChecksumAlgorithm, ProtocolBinding, TransportConfig};
use deposit_package::OpenPackage;
use deposit_sword::parse_receipt;
use tracing::debug;

use crate::{Session, TransportError, TransportOutcome};

/// Bound on the whole POST round trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// Bound on establishing the TLS connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// An authenticated SWORD v2 session against one collection.
#[derive(Debug)]
pub struct Sword2Session {
    client: reqwest::Client,
    collection_url: String,
    on_behalf_of: Option<String>,
    credentials: Option<(String, Option<String>)>,
}

impl Sword2Session {
    /// Builds the HTTP client and resolves credentials for the
    /// collection URL.
    pub async fn open(transport: &TransportConfig) -> Result<Self, TransportError> {
        let ProtocolBinding::Sword2 {
            collection_url,
            on_behalf_of,
        } = &transport.protocol
        else {
            unreachable!("resolver dispatched a non-sword2 binding");
        };

        let credentials = transport
            .realm_for(collection_url)
            .and_then(|realm| {
                realm
                    .username
                    .as_ref()
                    .map(|user| (user.clone(), realm.password.clone()))
            });

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            collection_url: collection_url.clone(),
            on_behalf_of: on_behalf_of.clone(),
            credentials,
        })
    }
}

#[async_trait::async_trait]
impl Session for Sword2Session {
    async fn send(&mut self, package: &mut OpenPackage) -> Result<TransportOutcome, TransportError> {
        // Drain the stream first: the MD5 header needs the full-body
        // digest, which is only valid at EOF.
        let body = package.read_to_vec().await?;
        let metadata = package.metadata();

        let mut request = self
            .client
            .post(&self.collection_url)
            .header("Packaging", &metadata.spec_uri)
            .header(
                "Content-Disposition",
                format!("attachment; filename=\"{}\"", metadata.name),
            )
            .header("Content-Type", &metadata.mime_type);

        if let Some(md5) = metadata
            .checksums
            .iter()
            .find(|c| c.algorithm() == ChecksumAlgorithm::Md5)
        {
            let encoded = base64::engine::general_purpose::STANDARD.encode(md5.value());
            request = request.header("Content-MD5", encoded);
        }
        if let Some(obo) = &self.on_behalf_of {
            request = request.header("On-Behalf-Of", obo);
        }
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_deref());
        }

        debug!(url = %self.collection_url, bytes = body.len(), "posting sword deposit");
        let response = request.body(body).send().await?;
        let status = response.status();

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(TransportError::AuthDenied {
                target: self.collection_url.clone(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                target: self.collection_url.clone(),
                status: status.as_u16(),
                body,
            });
        }

        let receipt_xml = response.bytes().await?;
        let receipt =
            parse_receipt(&receipt_xml).map_err(|source| TransportError::MalformedResponse {
                target: self.collection_url.clone(),
                source,
            })?;

        let external_ids = receipt
            .alternate()
            .map(|alt| vec![alt.to_owned()])
            .unwrap_or_default();
        Ok(TransportOutcome::pending(receipt.statement(), external_ids))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // HTTP is connectionless at this level; the pool tears down with
        // the client.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use deposit_config::{Archive, AssemblySpec, AuthMech, AuthRealm, Compression};
    use deposit_package::{EntryContent, PackageEntry, PackageStream};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;

    /// One-shot HTTP server: reads a request, answers with the canned
    /// response, returns the request head+body it saw.
    async fn one_shot_http(listener: TcpListener, response: String) -> String {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut seen = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            seen.extend_from_slice(&buf[..n]);
            if n == 0 || request_complete(&seen) {
                break;
            }
        }
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
        String::from_utf8_lossy(&seen).into_owned()
    }

    fn request_complete(seen: &[u8]) -> bool {
        let Some(head_end) = seen.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let head = String::from_utf8_lossy(&seen[..head_end]);
        let content_length = head
            .lines()
            .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(str::trim).map(str::to_owned))
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        seen.len() >= head_end + 4 + content_length
    }

    fn transport_config(url: &str) -> TransportConfig {
        TransportConfig {
            protocol: ProtocolBinding::Sword2 {
                collection_url: url.to_owned(),
                on_behalf_of: Some("depositor".to_owned()),
            },
            auth_realms: vec![AuthRealm {
                mech: AuthMech::Userpass,
                base_url: url.to_owned(),
                username: Some("sword-user".to_owned()),
                password: Some("sword-pass".to_owned()),
            }],
        }
    }

    fn package() -> OpenPackage {
        let spec = AssemblySpec {
            spec_uri: "http://purl.org/net/sword/package/METSDSpaceSIP".to_owned(),
            compression: Compression::None,
            archive: Archive::Zip,
            checksums: vec![ChecksumAlgorithm::Md5],
        };
        PackageStream::new(
            "pkg.zip",
            &spec,
            vec![PackageEntry::new(
                "mets.xml",
                "application/xml",
                EntryContent::Bytes(b"<mets/>".to_vec()),
            )],
        )
        .open()
    }

    const RECEIPT_BODY: &str = r#"<entry xmlns="http://www.w3.org/2005/Atom">
<link rel="alternate" href="http://archive.example.org/item/9"/>
<link rel="http://purl.org/net/sword/terms/statement" type="application/atom+xml;type=feed" href="http://archive.example.org/statement/9"/>
</entry>"#;

    #[tokio::test]
    async fn posts_headers_and_surfaces_the_statement() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/collection", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 201 Created\r\ncontent-type: application/atom+xml\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            RECEIPT_BODY.len(),
            RECEIPT_BODY
        );
        let server = tokio::spawn(one_shot_http(listener, response));

        let mut session = Sword2Session::open(&transport_config(&url)).await.unwrap();
        let outcome = session.send(&mut package()).await.unwrap();

        assert_eq!(
            outcome.status_ref(),
            Some("http://archive.example.org/statement/9")
        );
        assert_eq!(outcome.external_ids(), ["http://archive.example.org/item/9"]);
        assert!(!outcome.is_accepted());

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /collection"));
        let lower = request.to_ascii_lowercase();
        assert!(lower.contains("packaging: http://purl.org/net/sword/package/metsdspacesip"));
        assert!(lower.contains("content-disposition: attachment; filename=\"pkg.zip\""));
        assert!(lower.contains("content-type: application/zip"));
        assert!(lower.contains("content-md5: "));
        assert!(lower.contains("on-behalf-of: depositor"));
        // Basic credentials from the matching realm.
        assert!(lower.contains("authorization: basic "));
    }

    #[tokio::test]
    async fn archive_rejection_carries_the_body_through() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/collection", listener.local_addr().unwrap());
        let body = "package md5 did not match the checksum computed on receipt";
        let response = format!(
            "HTTP/1.1 412 Precondition Failed\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let server = tokio::spawn(one_shot_http(listener, response));

        let mut session = Sword2Session::open(&transport_config(&url)).await.unwrap();
        let err = session.send(&mut package()).await.unwrap_err();
        server.await.unwrap();

        assert!(!err.is_transient());
        assert!(err.to_string().contains("did not match the checksum"));
    }

    #[tokio::test]
    async fn auth_rejection_is_permanent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/collection", listener.local_addr().unwrap());
        let response =
            "HTTP/1.1 401 Unauthorized\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                .to_owned();
        let server = tokio::spawn(one_shot_http(listener, response));

        let mut session = Sword2Session::open(&transport_config(&url)).await.unwrap();
        let err = session.send(&mut package()).await.unwrap_err();
        server.await.unwrap();

        assert!(matches!(err, TransportError::AuthDenied { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/collection", listener.local_addr().unwrap());
        let response =
            "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                .to_owned();
        let server = tokio::spawn(one_shot_http(listener, response));

        let mut session = Sword2Session::open(&transport_config(&url)).await.unwrap();
        let err = session.send(&mut package()).await.unwrap_err();
        server.await.unwrap();

        assert!(err.is_transient());
    }
}
