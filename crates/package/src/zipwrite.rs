//! Minimal streaming ZIP writer.
//!
//! The ecosystem ZIP writer needs `Seek` on its sink to patch local
//! headers after the fact, which a pipe cannot offer. This writer stays
//! strictly forward-only by setting the data-descriptor flag: sizes and
//! CRCs trail each entry, and the central directory closes the stream.
//! Entries are deflated (or stored) per the caller's choice; 4-byte sizes
//! bound entries at 4 GiB, far above any package this pipeline emits.

use std::io::{self, Write};

use flate2::{write::DeflateEncoder, Compression};

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const DATA_DESCRIPTOR_SIG: u32 = 0x0807_4b50;
const CENTRAL_DIR_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIR_SIG: u32 = 0x0605_4b50;
/// Bit 3 (sizes in trailing descriptor) + bit 11 (UTF-8 names).
const FLAGS: u16 = 0x0808;
const VERSION: u16 = 20;

/// Entry compression method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ZipMethod {
    Stored,
    Deflated,
}

impl ZipMethod {
    fn code(self) -> u16 {
        match self {
            ZipMethod::Stored => 0,
            ZipMethod::Deflated => 8,
        }
    }
}

struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

enum Sink<W: Write> {
    Raw(CountingWriter<W>),
    Deflate(DeflateEncoder<CountingWriter<W>>),
    /// Transient state while an entry is being opened or closed.
    Empty,
}

struct CentralRecord {
    name: String,
    method: ZipMethod,
    crc: u32,
    compressed: u64,
    uncompressed: u64,
    header_offset: u64,
}

struct OpenEntry {
    name: String,
    method: ZipMethod,
    header_offset: u64,
    data_start: u64,
    crc: crc32fast::Hasher,
    uncompressed: u64,
}

/// Forward-only ZIP writer over any `Write` sink.
pub(crate) struct ZipStreamWriter<W: Write> {
    sink: Sink<W>,
    entries: Vec<CentralRecord>,
    open: Option<OpenEntry>,
}

impl<W: Write> ZipStreamWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        Self {
            sink: Sink::Raw(CountingWriter { inner, count: 0 }),
            entries: Vec::new(),
            open: None,
        }
    }

    fn raw(&mut self) -> &mut CountingWriter<W> {
        match &mut self.sink {
            Sink::Raw(w) => w,
            _ => unreachable!("entry data sink active outside an entry"),
        }
    }

    /// Begins a new entry. Any previous entry must be finished.
    pub(crate) fn start_entry(&mut self, name: &str, method: ZipMethod) -> io::Result<()> {
        assert!(self.open.is_none(), "previous entry still open");

        let header_offset = self.raw().count;
        let name_bytes = name.as_bytes();

        let w = self.raw();
        w.write_all(&LOCAL_HEADER_SIG.to_le_bytes())?;
        w.write_all(&VERSION.to_le_bytes())?;
        w.write_all(&FLAGS.to_le_bytes())?;
        w.write_all(&method.code().to_le_bytes())?;
        // Modification time/date: not meaningful for generated packages.
        w.write_all(&0u16.to_le_bytes())?;
        w.write_all(&0u16.to_le_bytes())?;
        // CRC and sizes live in the trailing descriptor.
        w.write_all(&0u32.to_le_bytes())?;
        w.write_all(&0u32.to_le_bytes())?;
        w.write_all(&0u32.to_le_bytes())?;
        w.write_all(&(name_bytes.len() as u16).to_le_bytes())?;
        w.write_all(&0u16.to_le_bytes())?;
        w.write_all(name_bytes)?;

        let data_start = self.raw().count;
        self.open = Some(OpenEntry {
            name: name.to_owned(),
            method,
            header_offset,
            data_start,
            crc: crc32fast::Hasher::new(),
            uncompressed: 0,
        });

        if method == ZipMethod::Deflated {
            let Sink::Raw(raw) = std::mem::replace(&mut self.sink, Sink::Empty) else {
                unreachable!("raw sink checked above");
            };
            self.sink = Sink::Deflate(DeflateEncoder::new(raw, Compression::default()));
        }
        Ok(())
    }

    /// Appends entry bytes.
    pub(crate) fn write_entry(&mut self, data: &[u8]) -> io::Result<()> {
        let entry = self
            .open
            .as_mut()
            .expect("write_entry outside an open entry");
        entry.crc.update(data);
        entry.uncompressed += data.len() as u64;
        match &mut self.sink {
            Sink::Raw(w) => w.write_all(data),
            Sink::Deflate(w) => w.write_all(data),
            Sink::Empty => unreachable!("sink vacated"),
        }
    }

    /// Closes the current entry and writes its data descriptor.
    pub(crate) fn finish_entry(&mut self) -> io::Result<()> {
        let entry = self.open.take().expect("finish_entry outside an entry");

        if matches!(self.sink, Sink::Deflate(_)) {
            let Sink::Deflate(encoder) = std::mem::replace(&mut self.sink, Sink::Empty) else {
                unreachable!("matched above");
            };
            self.sink = Sink::Raw(encoder.finish()?);
        }

        let compressed = self.raw().count - entry.data_start;
        let crc = entry.crc.finalize();

        let w = self.raw();
        w.write_all(&DATA_DESCRIPTOR_SIG.to_le_bytes())?;
        w.write_all(&crc.to_le_bytes())?;
        w.write_all(&(compressed as u32).to_le_bytes())?;
        w.write_all(&(entry.uncompressed as u32).to_le_bytes())?;

        self.entries.push(CentralRecord {
            name: entry.name,
            method: entry.method,
            crc,
            compressed,
            uncompressed: entry.uncompressed,
            header_offset: entry.header_offset,
        });
        Ok(())
    }

    /// Writes the central directory and returns the underlying sink.
    pub(crate) fn finish(mut self) -> io::Result<W> {
        assert!(self.open.is_none(), "entry still open at finish");

        let cd_start = self.raw().count;
        let count = self.entries.len() as u16;
        let entries = std::mem::take(&mut self.entries);
        for entry in &entries {
            let w = self.raw();
            w.write_all(&CENTRAL_DIR_SIG.to_le_bytes())?;
            w.write_all(&VERSION.to_le_bytes())?; // made by
            w.write_all(&VERSION.to_le_bytes())?; // needed
            w.write_all(&FLAGS.to_le_bytes())?;
            w.write_all(&entry.method.code().to_le_bytes())?;
            w.write_all(&0u16.to_le_bytes())?; // time
            w.write_all(&0u16.to_le_bytes())?; // date
            w.write_all(&entry.crc.to_le_bytes())?;
            w.write_all(&(entry.compressed as u32).to_le_bytes())?;
            w.write_all(&(entry.uncompressed as u32).to_le_bytes())?;
            w.write_all(&(entry.name.len() as u16).to_le_bytes())?;
            w.write_all(&0u16.to_le_bytes())?; // extra
            w.write_all(&0u16.to_le_bytes())?; // comment
            w.write_all(&0u16.to_le_bytes())?; // disk
            w.write_all(&0u16.to_le_bytes())?; // internal attrs
            w.write_all(&0u32.to_le_bytes())?; // external attrs
            w.write_all(&(entry.header_offset as u32).to_le_bytes())?;
            w.write_all(entry.name.as_bytes())?;
        }

        let cd_size = self.raw().count - cd_start;
        let w = self.raw();
        w.write_all(&END_OF_CENTRAL_DIR_SIG.to_le_bytes())?;
        w.write_all(&0u16.to_le_bytes())?; // this disk
        w.write_all(&0u16.to_le_bytes())?; // cd disk
        w.write_all(&count.to_le_bytes())?;
        w.write_all(&count.to_le_bytes())?;
        w.write_all(&(cd_size as u32).to_le_bytes())?;
        w.write_all(&(cd_start as u32).to_le_bytes())?;
        w.write_all(&0u16.to_le_bytes())?; // comment length
        w.flush()?;

        match self.sink {
            Sink::Raw(w) => Ok(w.inner),
            _ => unreachable!("entry data sink active at finish"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    fn build(method: ZipMethod) -> Vec<u8> {
        let mut writer = ZipStreamWriter::new(Vec::new());
        writer.start_entry("manifest.txt", method).unwrap();
        writer.write_entry(b"one two three\n").unwrap();
        writer.finish_entry().unwrap();
        writer.start_entry("data/article.pdf", method).unwrap();
        writer.write_entry(&[0x25, 0x50, 0x44, 0x46]).unwrap();
        writer.write_entry(b" body").unwrap();
        writer.finish_entry().unwrap();
        writer.finish().unwrap()
    }

    fn extract(bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        let mut out = Vec::new();
        for i in 0..archive.len() {
            let mut file = archive.by_index(i).unwrap();
            let mut content = Vec::new();
            file.read_to_end(&mut content).unwrap();
            out.push((file.name().to_owned(), content));
        }
        out
    }

    #[test]
    fn deflated_archive_extracts_with_the_ecosystem_reader() {
        let files = extract(build(ZipMethod::Deflated));
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].0, "manifest.txt");
        assert_eq!(files[0].1, b"one two three\n");
        assert_eq!(files[1].0, "data/article.pdf");
        assert_eq!(files[1].1, b"\x25\x50\x44\x46 body");
    }

    #[test]
    fn stored_archive_extracts_with_the_ecosystem_reader() {
        let files = extract(build(ZipMethod::Stored));
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].1, b"\x25\x50\x44\x46 body");
    }

    #[test]
    fn empty_archive_has_a_valid_central_directory() {
        let writer = ZipStreamWriter::new(Vec::new());
        let bytes = writer.finish().unwrap();
        let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 0);
    }
}
