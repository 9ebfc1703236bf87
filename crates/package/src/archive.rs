//! Container layer: one push/pull adapter over the ZIP and TAR writers.

use std::io::{self, Read, Write};

use deposit_config::Archive;

use crate::{
    checksum::ObserverStack,
    zipwrite::{ZipMethod, ZipStreamWriter},
};

/// Copy granularity between an entry source and the container.
const COPY_CHUNK: usize = 8 * 1024;

/// `Read` adapter that feeds every byte it yields to an observer stack.
struct ObservingReader<'a, R> {
    inner: R,
    observers: &'a mut ObserverStack,
}

impl<R: Read> Read for ObservingReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.observers.data(&buf[..n]);
        Ok(n)
    }
}

/// A ZIP or TAR archive being written to a sink.
pub(crate) enum ArchiveWriter<W: Write> {
    Zip(ZipStreamWriter<W>, ZipMethod),
    Tar(tar::Builder<W>),
}

impl<W: Write> ArchiveWriter<W> {
    /// `zip_method` picks stored vs deflated entries; it is ignored for
    /// TAR, whose entries are raw and compressed (if at all) by the outer
    /// layer.
    pub(crate) fn new(container: Archive, zip_method: ZipMethod, sink: W) -> Self {
        match container {
            Archive::Zip => ArchiveWriter::Zip(ZipStreamWriter::new(sink), zip_method),
            Archive::Tar => ArchiveWriter::Tar(tar::Builder::new(sink)),
        }
    }

    /// Streams one entry from `source` into the container, observing every
    /// content byte. `size` must be the exact source length; TAR headers
    /// carry it up front.
    pub(crate) fn add_entry(
        &mut self,
        name: &str,
        size: u64,
        source: &mut dyn Read,
        observers: &mut ObserverStack,
    ) -> io::Result<()> {
        match self {
            ArchiveWriter::Zip(zip, method) => {
                zip.start_entry(name, *method)?;
                let mut buf = [0u8; COPY_CHUNK];
                loop {
                    let n = source.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    observers.data(&buf[..n]);
                    zip.write_entry(&buf[..n])?;
                }
                zip.finish_entry()
            }
            ArchiveWriter::Tar(tar) => {
                let mut header = tar::Header::new_ustar();
                header.set_path(name)?;
                header.set_size(size);
                header.set_mode(0o644);
                header.set_cksum();
                let before = observers.length();
                tar.append(
                    &header,
                    ObservingReader {
                        inner: source,
                        observers,
                    },
                )?;
                // The TAR layer pads short reads instead of failing; a
                // source that did not match its declared size must poison
                // the package.
                let copied = observers.length() - before;
                if copied != size {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("entry {name}: declared {size} bytes, source had {copied}"),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Finalizes the container (ZIP central directory, TAR trailer blocks)
    /// and returns the sink.
    pub(crate) fn finish(self) -> io::Result<W> {
        match self {
            ArchiveWriter::Zip(zip, _) => zip.finish(),
            ArchiveWriter::Tar(tar) => tar.into_inner(),
        }
    }
}
