//! Bounded in-memory pipe between the package writer and its consumer.
//!
//! The write side implements [`std::io::Write`] for the blocking archive
//! stack; the read side is an async stream of [`Bytes`] chunks. Back
//! pressure comes from the bounded chunk channel. A writer failure is
//! stashed in a shared slot and surfaces on the read side before EOF; the
//! reader dropping or closing its end makes the writer's next write fail
//! with `BrokenPipe`, which aborts the archive stack.

use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::PackageError;

/// Size of one chunk sent through the pipe.
pub(crate) const CHUNK_SIZE: usize = 8 * 1024;
/// Default buffered bytes before the writer blocks.
pub(crate) const DEFAULT_BUFFER_BYTES: usize = 1024 * 1024;

type ErrorSlot = Arc<Mutex<Option<PackageError>>>;

/// Creates a pipe buffering roughly `buffer_bytes` before the writer
/// blocks.
pub fn pipe(buffer_bytes: usize) -> (PipeWriter, PipeReader) {
    let capacity = (buffer_bytes / CHUNK_SIZE).max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let slot: ErrorSlot = Arc::new(Mutex::new(None));
    (
        PipeWriter {
            tx: Some(tx),
            buf: Vec::with_capacity(CHUNK_SIZE),
            slot: slot.clone(),
        },
        PipeReader { rx, slot },
    )
}

/// Stashes a writer failure for the reader without needing the writer
/// half itself (which may be buried inside the archive stack when the
/// failure happens).
#[derive(Debug, Clone)]
pub struct FailureHandle(ErrorSlot);

impl FailureHandle {
    pub fn set(&self, error: PackageError) {
        *self.0.lock() = Some(error);
    }
}

/// Keeps the channel open independently of the writer half, so a failure
/// can be stashed after the archive stack (and the writer inside it) has
/// been dropped but before the reader observes end-of-stream.
#[derive(Debug)]
pub struct Keepalive {
    _tx: mpsc::Sender<Bytes>,
}

/// Write half: blocking `io::Write` used by the archive stack.
#[derive(Debug)]
pub struct PipeWriter {
    tx: Option<mpsc::Sender<Bytes>>,
    buf: Vec<u8>,
    slot: ErrorSlot,
}

impl PipeWriter {
    /// A handle that can stash a failure after this writer is gone.
    pub fn failure_handle(&self) -> FailureHandle {
        FailureHandle(self.slot.clone())
    }

    /// A guard that holds the channel open until dropped.
    pub fn keepalive(&self) -> Keepalive {
        Keepalive {
            _tx: self
                .tx
                .clone()
                .expect("keepalive taken from a closed writer"),
        }
    }

    fn send(&mut self, chunk: Bytes) -> io::Result<()> {
        let Some(tx) = &self.tx else {
            return Err(io::ErrorKind::BrokenPipe.into());
        };
        tx.blocking_send(chunk)
            .map_err(|_| io::ErrorKind::BrokenPipe.into())
    }

    fn flush_buf(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            let chunk = Bytes::from(std::mem::take(&mut self.buf));
            self.buf = Vec::with_capacity(CHUNK_SIZE);
            self.send(chunk)?;
        }
        Ok(())
    }

    /// Stashes a failure for the reader and closes the pipe. The reader
    /// observes queued chunks, then the failure, never a clean EOF.
    pub fn fail(mut self, error: PackageError) {
        *self.slot.lock() = Some(error);
        self.tx = None;
    }

    /// Flushes remaining bytes and closes the pipe cleanly.
    pub fn finish(mut self) -> io::Result<()> {
        self.flush_buf()?;
        self.tx = None;
        Ok(())
    }
}

impl io::Write for PipeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut remaining = data;
        while !remaining.is_empty() {
            let room = CHUNK_SIZE - self.buf.len();
            let take = room.min(remaining.len());
            self.buf.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];
            if self.buf.len() == CHUNK_SIZE {
                self.flush_buf()?;
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buf()
    }
}

/// Read half: an async stream of chunks.
#[derive(Debug)]
pub struct PipeReader {
    rx: mpsc::Receiver<Bytes>,
    slot: ErrorSlot,
}

impl PipeReader {
    /// Next chunk, a stashed writer failure, or `None` at clean EOF.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, PackageError>> {
        match self.rx.recv().await {
            Some(chunk) => Some(Ok(chunk)),
            None => self.slot.lock().take().map(Err),
        }
    }

    /// Drains the stream to EOF into one buffer.
    pub async fn read_to_vec(&mut self) -> Result<Vec<u8>, PackageError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    /// Closes the read side; the writer's next write fails with
    /// `BrokenPipe`.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl Stream for PipeReader {
    type Item = Result<Bytes, PackageError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(chunk)) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(None) => Poll::Ready(self.slot.lock().take().map(Err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[tokio::test]
    async fn bytes_round_trip_in_chunks() {
        let (mut writer, mut reader) = pipe(DEFAULT_BUFFER_BYTES);
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let join = tokio::task::spawn_blocking(move || {
            writer.write_all(&payload).unwrap();
            writer.finish().unwrap();
        });

        let read = reader.read_to_vec().await.unwrap();
        join.await.unwrap();
        assert_eq!(read, expected);
    }

    #[tokio::test]
    async fn stashed_error_surfaces_before_eof() {
        let (mut writer, mut reader) = pipe(DEFAULT_BUFFER_BYTES);

        let join = tokio::task::spawn_blocking(move || {
            writer.write_all(b"partial").unwrap();
            writer.flush().unwrap();
            writer.fail(PackageError::MissingFile {
                name: "pdf3.pdf".into(),
                path: "/data/pdf3.pdf".into(),
                container: "zip",
            });
        });
        join.await.unwrap();

        // Queued bytes are still delivered...
        let first = reader.next_chunk().await.unwrap().unwrap();
        assert_eq!(&first[..], b"partial");
        // ...then the failure, never a clean EOF.
        let err = reader.next_chunk().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("not included in the zip"));
        // After the error the stream ends.
        assert!(reader.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn closing_the_reader_breaks_the_writer() {
        let (mut writer, mut reader) = pipe(CHUNK_SIZE);
        reader.close();

        let err = tokio::task::spawn_blocking(move || {
            // Large enough to force a send.
            let data = vec![0u8; CHUNK_SIZE * 2];
            writer.write_all(&data)
        })
        .await
        .unwrap()
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn backpressure_bounds_the_buffer() {
        let (mut writer, mut reader) = pipe(CHUNK_SIZE * 2);

        let join = tokio::task::spawn_blocking(move || {
            let data = vec![7u8; CHUNK_SIZE * 8];
            writer.write_all(&data).unwrap();
            writer.finish().unwrap();
        });

        // The writer cannot finish until we drain: the channel holds two
        // chunks at most. Drain and confirm completion.
        let read = reader.read_to_vec().await.unwrap();
        assert_eq!(read.len(), CHUNK_SIZE * 8);
        join.await.unwrap();
    }
}
