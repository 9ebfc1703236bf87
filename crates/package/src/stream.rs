use std::{
    io::{self, Cursor, Write},
    path::PathBuf,
    sync::Arc,
};

use bytes::Bytes;
use deposit_config::{Archive, AssemblySpec, ChecksumAlgorithm, Compression};
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{
    archive::ArchiveWriter,
    checksum::{Checksum, ObserverStack},
    error::PackageError,
    pipe::{pipe, PipeReader, PipeWriter, DEFAULT_BUFFER_BYTES},
    zipwrite::ZipMethod,
};

/// Where an entry's bytes come from.
#[derive(Debug, Clone)]
pub enum EntryContent {
    /// Generated control documents (manifest, metadata).
    Bytes(Vec<u8>),
    /// A custodial file on disk.
    File(PathBuf),
}

/// One declared entry of a package, in emission order.
#[derive(Debug, Clone)]
pub struct PackageEntry {
    name: String,
    mime_type: String,
    content: EntryContent,
}

impl PackageEntry {
    pub fn new(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        content: EntryContent,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            content,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Descriptor of the whole package.
///
/// `checksums` digests the full body as it went through the pipe (after
/// compression). It is empty until the consumer has drained the stream to
/// EOF; `metadata()` never blocks waiting for that.
#[derive(Debug, Clone)]
pub struct PackageMetadata {
    pub name: String,
    pub mime_type: String,
    pub spec_uri: String,
    pub archive: Archive,
    pub compression: Compression,
    pub checksums: Vec<Checksum>,
}

/// One completed entry, as observed while it was written.
#[derive(Debug, Clone)]
pub struct PackageResource {
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub checksums: Vec<Checksum>,
}

/// What the writer worker has produced so far.
#[derive(Debug, Default)]
struct WriterOutput {
    resources: Vec<PackageResource>,
    body_checksums: Vec<Checksum>,
    complete: bool,
}

/// An assembled-but-unopened package: the declared entries plus the
/// container, compression, and digest choices from the assembly spec.
#[derive(Debug)]
pub struct PackageStream {
    name: String,
    spec_uri: String,
    archive: Archive,
    compression: Compression,
    algorithms: Vec<ChecksumAlgorithm>,
    entries: Vec<PackageEntry>,
    buffer_bytes: usize,
}

impl PackageStream {
    pub fn new(name: impl Into<String>, spec: &AssemblySpec, entries: Vec<PackageEntry>) -> Self {
        Self {
            name: name.into(),
            spec_uri: spec.spec_uri.clone(),
            archive: spec.archive,
            compression: spec.compression,
            algorithms: spec.checksums.clone(),
            entries,
            buffer_bytes: DEFAULT_BUFFER_BYTES,
        }
    }

    /// Overrides the pipe buffer (default 1 MiB).
    pub fn with_buffer_bytes(mut self, buffer_bytes: usize) -> Self {
        self.buffer_bytes = buffer_bytes;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> &[PackageEntry] {
        &self.entries
    }

    /// Content type of the emitted body.
    pub fn mime_type(&self) -> &'static str {
        match (self.archive, self.compression) {
            (_, Compression::Gzip) => "application/gzip",
            (Archive::Zip, Compression::None) => "application/zip",
            (Archive::Tar, Compression::None) => "application/x-tar",
        }
    }

    /// Spawns the writer worker and returns the readable package.
    ///
    /// The returned reader yields bytes immediately; the worker lives
    /// exactly as long as the reader holds the pipe.
    pub fn open(self) -> OpenPackage {
        let (writer, reader) = pipe(self.buffer_bytes);
        let shared = Arc::new(Mutex::new(WriterOutput::default()));

        let metadata = PackageMetadata {
            name: self.name.clone(),
            mime_type: self.mime_type().to_owned(),
            spec_uri: self.spec_uri.clone(),
            archive: self.archive,
            compression: self.compression,
            checksums: Vec::new(),
        };

        let worker_shared = shared.clone();
        let container = container_name(self.archive);
        let handle = tokio::task::spawn_blocking(move || {
            let failures = writer.failure_handle();
            // Holds the channel open so a failure stashed after the
            // archive stack is dropped still beats end-of-stream.
            let keepalive = writer.keepalive();
            match write_package(
                self.entries,
                self.archive,
                self.compression,
                &self.algorithms,
                writer,
                &worker_shared,
            ) {
                Ok(()) => debug!(container, "package writer finished"),
                Err(e) => {
                    debug!(container, error = %e, "package writer failed");
                    failures.set(e);
                }
            }
            drop(keepalive);
        });

        OpenPackage {
            metadata,
            reader,
            shared,
            handle,
        }
    }
}

fn container_name(archive: Archive) -> &'static str {
    match archive {
        Archive::Zip => "zip",
        Archive::Tar => "tar",
    }
}

/// Tee between the compressor/container stack and the pipe, digesting the
/// full body on the way through.
struct BodyTee {
    pipe: PipeWriter,
    observers: ObserverStack,
}

impl Write for BodyTee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.pipe.write(buf)?;
        self.observers.data(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.pipe.flush()
    }
}

/// The writer worker: emits every entry, finalizes the container, then the
/// compressor, then the pipe, in that order.
fn write_package(
    entries: Vec<PackageEntry>,
    archive: Archive,
    compression: Compression,
    algorithms: &[ChecksumAlgorithm],
    pipe: PipeWriter,
    shared: &Mutex<WriterOutput>,
) -> Result<(), PackageError> {
    let container = container_name(archive);
    let tee = BodyTee {
        pipe,
        observers: ObserverStack::new(algorithms),
    };

    let tee = match compression {
        Compression::None => {
            let writer = ArchiveWriter::new(archive, ZipMethod::Deflated, tee);
            write_entries(writer, &entries, container, algorithms, shared)?
        }
        Compression::Gzip => {
            // Entries are stored when the whole body is gzipped; deflating
            // twice buys nothing.
            let encoder = GzEncoder::new(tee, flate2::Compression::default());
            let writer = ArchiveWriter::new(archive, ZipMethod::Stored, encoder);
            let encoder = write_entries(writer, &entries, container, algorithms, shared)?;
            encoder
                .finish()
                .map_err(|e| PackageError::from_archive_io(container, e))?
        }
    };

    let BodyTee { pipe, observers } = tee;
    let (_, body_checksums) = observers.finished();
    {
        let mut out = shared.lock();
        out.body_checksums = body_checksums;
        out.complete = true;
    }

    pipe.finish()
        .map_err(|e| PackageError::from_archive_io(container, e))
}

/// Streams every entry into the container and finalizes it, handing each
/// completed resource back through the shared state as it is written.
fn write_entries<W: Write>(
    mut writer: ArchiveWriter<W>,
    entries: &[PackageEntry],
    container: &'static str,
    algorithms: &[ChecksumAlgorithm],
    shared: &Mutex<WriterOutput>,
) -> Result<W, PackageError> {
    for entry in entries {
        let mut observers = ObserverStack::new(algorithms);
        match &entry.content {
            EntryContent::Bytes(bytes) => {
                writer
                    .add_entry(
                        &entry.name,
                        bytes.len() as u64,
                        &mut Cursor::new(bytes),
                        &mut observers,
                    )
                    .map_err(|e| PackageError::from_archive_io(container, e))?;
            }
            EntryContent::File(path) => {
                let mut file = open_custodial(&entry.name, path, container)?;
                let size = file
                    .metadata()
                    .map_err(|source| PackageError::EntryRead {
                        name: entry.name.clone(),
                        source,
                    })?
                    .len();
                writer
                    .add_entry(&entry.name, size, &mut file, &mut observers)
                    .map_err(|e| classify_entry_error(&entry.name, container, e))?;
            }
        }

        // The observed length is authoritative: it is what actually went
        // into the archive.
        let (size_bytes, checksums) = observers.finished();
        shared.lock().resources.push(PackageResource {
            name: entry.name.clone(),
            mime_type: entry.mime_type.clone(),
            size_bytes,
            checksums,
        });
    }

    writer
        .finish()
        .map_err(|e| PackageError::from_archive_io(container, e))
}

fn open_custodial(
    name: &str,
    path: &std::path::Path,
    container: &'static str,
) -> Result<std::fs::File, PackageError> {
    std::fs::File::open(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            PackageError::MissingFile {
                name: name.to_owned(),
                path: path.to_owned(),
                container,
            }
        } else {
            PackageError::EntryRead {
                name: name.to_owned(),
                source,
            }
        }
    })
}

fn classify_entry_error(name: &str, container: &'static str, e: io::Error) -> PackageError {
    if e.kind() == io::ErrorKind::BrokenPipe {
        PackageError::ConsumerGone
    } else if e.kind() == io::ErrorKind::InvalidData {
        PackageError::EntryRead {
            name: name.to_owned(),
            source: e,
        }
    } else {
        PackageError::ArchiveWrite {
            container,
            source: e,
        }
    }
}

/// An opened package: the consumer's read end plus the live view of what
/// the writer has produced.
#[derive(Debug)]
pub struct OpenPackage {
    metadata: PackageMetadata,
    reader: PipeReader,
    shared: Arc<Mutex<WriterOutput>>,
    handle: JoinHandle<()>,
}

impl OpenPackage {
    /// Package descriptor. The body `checksums` are only valid once the
    /// stream has been drained to EOF; before that they are empty. This
    /// call never blocks on the writer.
    pub fn metadata(&self) -> PackageMetadata {
        let mut metadata = self.metadata.clone();
        metadata.checksums = self.shared.lock().body_checksums.clone();
        metadata
    }

    /// Completed resources so far (all of them once EOF is reached).
    pub fn resources(&self) -> Vec<PackageResource> {
        self.shared.lock().resources.clone()
    }

    /// Next body chunk, a writer failure, or `None` at EOF.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, PackageError>> {
        match self.reader.next_chunk().await {
            Some(result) => Some(result),
            None => {
                if self.shared.lock().complete {
                    None
                } else {
                    // The worker died without stashing a cause.
                    Some(Err(PackageError::WriterGone))
                }
            }
        }
    }

    /// Drains the body to EOF.
    pub async fn read_to_vec(&mut self) -> Result<Vec<u8>, PackageError> {
        let mut out = Vec::new();
        loop {
            match self.next_chunk().await {
                Some(Ok(chunk)) => out.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(e),
                None => return Ok(out),
            }
        }
    }

    /// Closes the read side, signalling the writer to abort.
    pub fn close(&mut self) {
        self.reader.close();
        self.handle.abort();
    }
}
