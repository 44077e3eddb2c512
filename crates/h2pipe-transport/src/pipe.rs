//! Single-producer, single-consumer byte pipe with backpressure.
//!
//! The writer appends bytes with [`PipeWriter::write`] and publishes them with
//! [`PipeWriter::flush`]. A flush suspends while more than
//! `pause_writer_threshold` bytes are unconsumed and resumes once the reader has
//! consumed enough to bring that below `resume_writer_threshold`.
//!
//! The reader sees every unconsumed byte on [`PipeReader::read`] and releases a
//! prefix with [`PipeReader::advance`]. Bytes that were returned but not
//! consumed count as examined: the next read waits for new data instead of
//! handing back the same partial frame.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use tokio::sync::Notify;

use crate::error::PipeError;

/// Backpressure thresholds for one pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeOptions {
    /// Flushes suspend while more than this many bytes are unconsumed.
    pub pause_writer_threshold: usize,
    /// Suspended flushes resume once fewer than this many bytes are unconsumed.
    pub resume_writer_threshold: usize,
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self {
            pause_writer_threshold: 64 * 1024,
            resume_writer_threshold: 32 * 1024,
        }
    }
}

/// Outcome of [`PipeReader::read`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadResult {
    /// Every unconsumed byte, including any examined by the previous read.
    pub buffer: Bytes,
    /// The writer completed; no more bytes will arrive.
    pub is_completed: bool,
    /// The read was woken by [`PipeReader::cancel_pending_read`].
    pub is_canceled: bool,
}

/// Outcome of [`PipeWriter::flush`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushResult {
    /// The flush was woken by [`PipeWriter::cancel_pending_flush`].
    pub is_canceled: bool,
}

#[derive(Default)]
struct State {
    /// Written but not yet flushed.
    pending: BytesMut,
    /// Flushed, not yet handed to the reader.
    committed: BytesMut,
    /// Handed to the reader, not yet consumed.
    in_flight: Bytes,
    writer_completed: bool,
    writer_error: Option<Arc<io::Error>>,
    reader_completed: bool,
    cancel_read: bool,
    cancel_flush: bool,
}

impl State {
    fn unconsumed(&self) -> usize {
        self.in_flight.len() + self.committed.len()
    }

    fn take_readable(&mut self) -> Bytes {
        if !self.committed.is_empty() {
            let fresh = self.committed.split().freeze();
            self.in_flight = if self.in_flight.is_empty() {
                fresh
            } else {
                let mut merged = BytesMut::with_capacity(self.in_flight.len() + fresh.len());
                merged.extend_from_slice(&self.in_flight);
                merged.extend_from_slice(&fresh);
                merged.freeze()
            };
        }
        self.in_flight.clone()
    }
}

struct Shared {
    options: PipeOptions,
    state: Mutex<State>,
    readable: Notify,
    writable: Notify,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Create a pipe, returning its writing and reading ends.
pub fn pipe(options: PipeOptions) -> (PipeWriter, PipeReader) {
    let shared = Arc::new(Shared {
        options,
        state: Mutex::new(State::default()),
        readable: Notify::new(),
        writable: Notify::new(),
    });
    (
        PipeWriter {
            shared: Arc::clone(&shared),
        },
        PipeReader { shared },
    )
}

/// Writing end of a pipe.
pub struct PipeWriter {
    shared: Arc<Shared>,
}

impl PipeWriter {
    /// Append `data` without publishing it. Never suspends.
    pub fn write(&self, data: &[u8]) -> Result<(), PipeError> {
        let mut state = self.shared.state();
        if state.writer_completed {
            return Err(PipeError::WriterCompleted);
        }
        if state.reader_completed {
            return Err(PipeError::ReaderCompleted);
        }
        state.pending.extend_from_slice(data);
        Ok(())
    }

    /// Publish written bytes, then wait while the reader is behind.
    ///
    /// Returns once unconsumed bytes are at most `pause_writer_threshold`, or
    /// after a suspension once they drop below `resume_writer_threshold`.
    pub async fn flush(&self) -> Result<FlushResult, PipeError> {
        {
            let mut state = self.shared.state();
            if state.reader_completed {
                return Err(PipeError::ReaderCompleted);
            }
            if !state.pending.is_empty() {
                let pending = state.pending.split();
                state.committed.unsplit(pending);
                self.shared.readable.notify_waiters();
            }
            if state.cancel_flush {
                state.cancel_flush = false;
                return Ok(FlushResult { is_canceled: true });
            }
            if state.unconsumed() <= self.shared.options.pause_writer_threshold {
                return Ok(FlushResult::default());
            }
        }

        loop {
            let writable = self.shared.writable.notified();
            tokio::pin!(writable);
            writable.as_mut().enable();
            {
                let mut state = self.shared.state();
                if state.reader_completed {
                    return Err(PipeError::ReaderCompleted);
                }
                if state.cancel_flush {
                    state.cancel_flush = false;
                    return Ok(FlushResult { is_canceled: true });
                }
                if state.unconsumed() < self.shared.options.resume_writer_threshold {
                    return Ok(FlushResult::default());
                }
            }
            writable.await;
        }
    }

    /// [`write`](Self::write) followed by [`flush`](Self::flush).
    pub async fn write_all(&self, data: &[u8]) -> Result<FlushResult, PipeError> {
        self.write(data)?;
        self.flush().await
    }

    /// Bytes flushed but not yet consumed by the reader.
    pub fn unconsumed(&self) -> usize {
        self.shared.state().unconsumed()
    }

    /// Wake a suspended flush, or the next one, with `is_canceled` set.
    pub fn cancel_pending_flush(&self) {
        self.shared.state().cancel_flush = true;
        self.shared.writable.notify_waiters();
    }

    /// Signal that no more bytes will be written, optionally with the error
    /// that ended the writer. Written bytes are still delivered. Idempotent.
    pub fn complete(&self, error: Option<io::Error>) {
        let mut state = self.shared.state();
        if state.writer_completed {
            return;
        }
        state.writer_completed = true;
        state.writer_error = error.map(Arc::new);
        let pending = state.pending.split();
        state.committed.unsplit(pending);
        drop(state);
        self.shared.readable.notify_waiters();
    }

    /// Whether the reader has completed.
    pub fn is_reader_completed(&self) -> bool {
        self.shared.state().reader_completed
    }
}

impl std::fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeWriter")
            .field("unconsumed", &self.unconsumed())
            .finish()
    }
}

/// Reading end of a pipe.
pub struct PipeReader {
    shared: Arc<Shared>,
}

impl PipeReader {
    /// Wait for unexamined bytes, writer completion, or cancellation.
    ///
    /// Once the writer completes, buffered bytes are still returned first. A
    /// writer error surfaces after everything written before it was read.
    pub async fn read(&self) -> Result<ReadResult, PipeError> {
        loop {
            let readable = self.shared.readable.notified();
            tokio::pin!(readable);
            readable.as_mut().enable();
            {
                let mut state = self.shared.state();
                if state.reader_completed {
                    return Err(PipeError::ReaderCompleted);
                }
                if state.cancel_read {
                    state.cancel_read = false;
                    return Ok(ReadResult {
                        buffer: state.take_readable(),
                        is_completed: false,
                        is_canceled: true,
                    });
                }
                if !state.committed.is_empty() {
                    let is_completed = state.writer_completed && state.writer_error.is_none();
                    return Ok(ReadResult {
                        buffer: state.take_readable(),
                        is_completed,
                        is_canceled: false,
                    });
                }
                if state.writer_completed {
                    if let Some(err) = &state.writer_error {
                        return Err(PipeError::Failed(Arc::clone(err)));
                    }
                    return Ok(ReadResult {
                        buffer: state.in_flight.clone(),
                        is_completed: true,
                        is_canceled: false,
                    });
                }
            }
            readable.await;
        }
    }

    /// Consume the first `consumed` bytes returned by the last read.
    ///
    /// The remainder stays buffered and counts as examined.
    pub fn advance(&self, consumed: usize) {
        let mut state = self.shared.state();
        let consumed = consumed.min(state.in_flight.len());
        let _ = state.in_flight.split_to(consumed);
        drop(state);
        if consumed > 0 {
            self.shared.writable.notify_waiters();
        }
    }

    /// Wake a suspended read, or the next one, with `is_canceled` set.
    pub fn cancel_pending_read(&self) {
        self.shared.state().cancel_read = true;
        self.shared.readable.notify_waiters();
    }

    /// Stop reading. Buffered bytes are dropped and the writer's pending and
    /// future flushes fail with [`PipeError::ReaderCompleted`]. Idempotent.
    pub fn complete(&self) {
        let mut state = self.shared.state();
        if state.reader_completed {
            return;
        }
        state.reader_completed = true;
        state.committed.clear();
        state.pending.clear();
        state.in_flight = Bytes::new();
        drop(state);
        self.shared.writable.notify_waiters();
        self.shared.readable.notify_waiters();
    }

    /// Whether the writer has completed.
    pub fn is_writer_completed(&self) -> bool {
        self.shared.state().writer_completed
    }
}

impl std::fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeReader").finish_non_exhaustive()
    }
}

/// Application side of a connection: bytes received from the peer come in on
/// `input`, bytes for the peer go out through `output`.
#[derive(Debug)]
pub struct DuplexPipe {
    pub input: PipeReader,
    pub output: PipeWriter,
}

/// Transport side of a connection, the mirror of [`DuplexPipe`].
#[derive(Debug)]
pub struct TransportPipe {
    pub input: PipeWriter,
    pub output: PipeReader,
}

/// Create the two pipes of a connection, cross-wired into a transport side and
/// an application side.
pub fn duplex_pair(
    input_options: PipeOptions,
    output_options: PipeOptions,
) -> (TransportPipe, DuplexPipe) {
    let (input_writer, input_reader) = pipe(input_options);
    let (output_writer, output_reader) = pipe(output_options);
    (
        TransportPipe {
            input: input_writer,
            output: output_reader,
        },
        DuplexPipe {
            input: input_reader,
            output: output_writer,
        },
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn small_pipe() -> (PipeWriter, PipeReader) {
        pipe(PipeOptions {
            pause_writer_threshold: 16,
            resume_writer_threshold: 8,
        })
    }

    #[tokio::test]
    async fn flushed_bytes_are_readable() {
        let (writer, reader) = pipe(PipeOptions::default());
        writer.write(b"hello ").unwrap();
        writer.write(b"world").unwrap();
        writer.flush().await.unwrap();

        let result = reader.read().await.unwrap();
        assert_eq!(&result.buffer[..], b"hello world");
        assert!(!result.is_completed);
        reader.advance(result.buffer.len());
        assert_eq!(writer.unconsumed(), 0);
    }

    #[tokio::test]
    async fn unflushed_bytes_are_not_visible() {
        let (writer, reader) = pipe(PipeOptions::default());
        writer.write(b"later").unwrap();

        let read = tokio::time::timeout(Duration::from_millis(20), reader.read()).await;
        assert!(read.is_err(), "read should wait for a flush");
    }

    #[tokio::test]
    async fn partial_advance_waits_for_new_bytes() {
        let (writer, reader) = pipe(PipeOptions::default());
        writer.write_all(b"abcdef").await.unwrap();

        let first = reader.read().await.unwrap();
        reader.advance(2);
        assert_eq!(&first.buffer[..], b"abcdef");

        let again = tokio::time::timeout(Duration::from_millis(20), reader.read()).await;
        assert!(again.is_err(), "examined bytes must not wake the reader");

        writer.write_all(b"gh").await.unwrap();
        let second = reader.read().await.unwrap();
        assert_eq!(&second.buffer[..], b"cdefgh");
    }

    #[tokio::test]
    async fn flush_at_high_watermark_does_not_suspend() {
        let (writer, _reader) = small_pipe();
        let result = tokio::time::timeout(Duration::from_millis(20), writer.write_all(&[0; 16]))
            .await
            .expect("flush at exactly the high watermark should not suspend");
        assert!(!result.unwrap().is_canceled);
    }

    #[tokio::test(start_paused = true)]
    async fn backpressure_resumes_below_low_watermark() {
        let (writer, reader) = small_pipe();
        let writer = Arc::new(writer);

        let flushing = {
            let writer = Arc::clone(&writer);
            tokio::spawn(async move { writer.write_all(&[7; 17]).await })
        };

        // A scripted slow reader: consume in small steps with delays.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!flushing.is_finished(), "one byte past the watermark must suspend");

        let chunk = reader.read().await.unwrap();
        assert_eq!(chunk.buffer.len(), 17);
        reader.advance(5);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!flushing.is_finished(), "12 unconsumed is still above resume");

        reader.advance(4);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!flushing.is_finished(), "8 unconsumed is not below resume");

        reader.advance(1);
        let result = flushing.await.unwrap().unwrap();
        assert!(!result.is_canceled);
        assert_eq!(writer.unconsumed(), 7);
    }

    #[tokio::test]
    async fn writer_completion_wakes_reader() {
        let (writer, reader) = pipe(PipeOptions::default());
        let read = tokio::spawn(async move {
            let result = reader.read().await.unwrap();
            (result, reader)
        });

        writer.write(b"tail").unwrap();
        writer.complete(None);
        writer.complete(None);

        let (result, reader) = read.await.unwrap();
        assert_eq!(&result.buffer[..], b"tail");
        assert!(result.is_completed);
        reader.advance(4);

        let last = reader.read().await.unwrap();
        assert!(last.is_completed);
        assert!(last.buffer.is_empty());
        assert!(matches!(writer.write(b"x"), Err(PipeError::WriterCompleted)));
    }

    #[tokio::test]
    async fn writer_error_surfaces_after_data() {
        let (writer, reader) = pipe(PipeOptions::default());
        writer.write(b"ok").unwrap();
        writer.complete(Some(io::Error::from(io::ErrorKind::ConnectionReset)));

        let first = reader.read().await.unwrap();
        assert_eq!(&first.buffer[..], b"ok");
        reader.advance(2);

        match reader.read().await {
            Err(PipeError::Failed(err)) => assert_eq!(err.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("expected writer failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reader_completion_fails_pending_flush() {
        let (writer, reader) = small_pipe();
        let writer = Arc::new(writer);
        let flushing = {
            let writer = Arc::clone(&writer);
            tokio::spawn(async move { writer.write_all(&[1; 32]).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        reader.complete();
        assert!(matches!(
            flushing.await.unwrap(),
            Err(PipeError::ReaderCompleted)
        ));
        assert!(matches!(writer.flush().await, Err(PipeError::ReaderCompleted)));
        assert!(writer.is_reader_completed());
    }

    #[tokio::test]
    async fn cancel_pending_read_is_not_an_error() {
        let (_writer, reader) = pipe(PipeOptions::default());
        let reader = Arc::new(reader);
        let pending = {
            let reader = Arc::clone(&reader);
            tokio::spawn(async move { reader.read().await })
        };
        tokio::task::yield_now().await;

        reader.cancel_pending_read();
        let result = pending.await.unwrap().unwrap();
        assert!(result.is_canceled);
        assert!(!result.is_completed);
    }

    #[tokio::test]
    async fn cancel_before_read_applies_to_next_read() {
        let (_writer, reader) = pipe(PipeOptions::default());
        reader.cancel_pending_read();
        assert!(reader.read().await.unwrap().is_canceled);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_pending_flush_wakes_writer() {
        let (writer, _reader) = small_pipe();
        let writer = Arc::new(writer);
        let flushing = {
            let writer = Arc::clone(&writer);
            tokio::spawn(async move { writer.write_all(&[1; 32]).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        writer.cancel_pending_flush();
        assert!(flushing.await.unwrap().unwrap().is_canceled);
    }

    #[tokio::test]
    async fn duplex_pair_is_cross_wired() {
        let (transport, app) = duplex_pair(PipeOptions::default(), PipeOptions::default());

        transport.input.write_all(b"request").await.unwrap();
        assert_eq!(&app.input.read().await.unwrap().buffer[..], b"request");

        app.output.write_all(b"response").await.unwrap();
        assert_eq!(&transport.output.read().await.unwrap().buffer[..], b"response");
    }
}
