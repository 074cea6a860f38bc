//! In-process byte pipe coupling blocking archive code with async transfers.
//!
//! The archive codec is synchronous while backends are async. A [`pipe`] joins
//! the two: one side runs on a blocking thread (`io::Read`/`io::Write`), the
//! other inside a backend call (`AsyncRead`/`AsyncWrite`). The channel holds a
//! fixed number of chunks, so a fast producer waits for a slow consumer and
//! memory use stays bounded regardless of archive size.

use std::io::{self, Read, Write};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::sync::PollSender;
use tracing::debug;

use crate::error::Result;

/// Number of in-flight chunks between the two ends of a pipe.
pub const DEFAULT_PIPE_CAPACITY: usize = 16;

const MAX_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Default)]
struct Shared {
    error: Mutex<Option<(io::ErrorKind, String)>>,
}

impl Shared {
    fn set(&self, error: &io::Error) {
        let mut slot = self.error.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some((error.kind(), error.to_string()));
        }
    }

    fn get(&self) -> Option<io::Error> {
        let slot = self.error.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref()
            .map(|(kind, message)| io::Error::new(*kind, message.clone()))
    }
}

/// Creates a bounded pipe holding at most `capacity` chunks.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(Shared::default());

    (
        PipeWriter {
            tx: PollSender::new(tx),
            shared: Arc::clone(&shared),
        },
        PipeReader {
            rx,
            chunk: Vec::new(),
            pos: 0,
            shared,
        },
    )
}

/// Writing half of a [`pipe`].
///
/// Dropping the writer signals end of stream. Blocking writes must not be
/// issued from inside an async task.
pub struct PipeWriter {
    tx: PollSender<Vec<u8>>,
    shared: Arc<Shared>,
}

impl PipeWriter {
    /// Closes the pipe so that the reader observes `error` instead of end of stream.
    pub fn close_with_error(mut self, error: &io::Error) {
        self.shared.set(error);
        self.tx.close();
    }

    fn reader_gone(&self) -> io::Error {
        match self.shared.get() {
            Some(cause) => io::Error::new(io::ErrorKind::BrokenPipe, cause.to_string()),
            None => io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed"),
        }
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let n = buf.len().min(MAX_CHUNK_SIZE);
        let sender = self.tx.get_ref().ok_or_else(|| self.reader_gone())?;
        sender
            .blocking_send(buf[..n].to_vec())
            .map_err(|_| self.reader_gone())?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let this = self.get_mut();
        if ready!(this.tx.poll_reserve(cx)).is_err() {
            return Poll::Ready(Err(this.reader_gone()));
        }

        let n = buf.len().min(MAX_CHUNK_SIZE);
        if this.tx.send_item(buf[..n].to_vec()).is_err() {
            return Poll::Ready(Err(this.reader_gone()));
        }
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().tx.close();
        Poll::Ready(Ok(()))
    }
}

/// Reading half of a [`pipe`].
pub struct PipeReader {
    rx: mpsc::Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
    shared: Arc<Shared>,
}

impl PipeReader {
    /// Closes the pipe so that pending and future writes fail with `error` as the cause.
    pub fn close_with_error(mut self, error: &io::Error) {
        self.shared.set(error);
        self.rx.close();
    }

    fn end_of_stream(&self) -> io::Result<()> {
        match self.shared.get() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn buffered(&self) -> &[u8] {
        &self.chunk[self.pos..]
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            if !self.buffered().is_empty() {
                let n = buf.len().min(self.buffered().len());
                buf[..n].copy_from_slice(&self.buffered()[..n]);
                self.pos += n;
                return Ok(n);
            }

            match self.rx.blocking_recv() {
                Some(chunk) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                None => {
                    self.end_of_stream()?;
                    return Ok(0);
                }
            }
        }
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if !this.buffered().is_empty() {
                let n = buf.remaining().min(this.buffered().len());
                buf.put_slice(&this.buffered()[..n]);
                this.pos += n;
                return Poll::Ready(Ok(()));
            }

            match ready!(this.rx.poll_recv(cx)) {
                Some(chunk) => {
                    this.chunk = chunk;
                    this.pos = 0;
                }
                None => return Poll::Ready(this.end_of_stream()),
            }
        }
    }
}

/// Shared handle to the number of bytes that passed through a [`Counting`] reader.
#[derive(Debug, Clone, Default)]
pub struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn add(&self, n: usize) {
        self.0.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// Reader wrapper that counts the bytes read through it.
pub struct Counting<R> {
    inner: R,
    counter: ByteCounter,
}

impl<R> Counting<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            counter: ByteCounter::default(),
        }
    }

    pub fn counter(&self) -> ByteCounter {
        self.counter.clone()
    }
}

impl<R: Read> Read for Counting<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.counter.add(n);
        Ok(n)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for Counting<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        this.counter.add(buf.filled().len() - before);
        Poll::Ready(Ok(()))
    }
}

/// Combines the results of the two ends of a pipeline into one.
///
/// When both ends fail, a broken-pipe error on the producer only reports that
/// the consumer went away, so the consumer's error is primary. Otherwise the
/// producer failed first and the consumer's error is a consequence of it.
pub(crate) fn settle<P, C>(producer: Result<P>, consumer: Result<C>) -> Result<(P, C)> {
    match (producer, consumer) {
        (Ok(p), Ok(c)) => Ok((p, c)),
        (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
        (Err(produced), Err(consumed)) => {
            if produced.is_broken_pipe() {
                debug!(error = %produced, "producer stopped after consumer failed");
                Err(consumed)
            } else {
                debug!(error = %consumed, "consumer stopped after producer failed");
                Err(produced)
            }
        }
    }
}
