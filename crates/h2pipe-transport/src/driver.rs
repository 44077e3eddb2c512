//! Transport half of a connection: pumps bytes between a physical stream and
//! the connection's duplex pipe.
//!
//! The receive loop copies stream reads into the input pipe; the send loop
//! drains the output pipe into stream writes. When the send loop stops, for
//! any reason, it marks the connection as shutting down and cancels the
//! receive loop's pending read.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn, Instrument};

use crate::error::{is_disposed_error, PipeError};
use crate::pipe::{PipeReader, PipeWriter, TransportPipe};

const READ_BUFFER_SIZE: usize = 16 * 1024;

struct DriverState {
    shutdown_initiated: AtomicBool,
    close_reason: Mutex<Option<Arc<io::Error>>>,
    receive_cancel: CancellationToken,
    send_cancel: CancellationToken,
}

impl DriverState {
    fn is_shutting_down(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    fn begin_shutdown(&self) {
        self.shutdown_initiated.store(true, Ordering::Release);
        self.receive_cancel.cancel();
    }

    fn record(&self, err: &Arc<io::Error>) {
        let mut reason = self
            .close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if reason.is_none() {
            *reason = Some(Arc::clone(err));
        }
    }

    /// Log an I/O error by class and keep it as the close reason when it is
    /// not an expected disposal race.
    fn observe(&self, direction: &'static str, err: io::Error) -> Arc<io::Error> {
        let err = Arc::new(err);
        if is_disposed_error(&err) {
            if self.is_shutting_down() {
                debug!(direction, error = %err, "stream closed during shutdown");
                return err;
            }
            warn!(direction, error = %err, "stream closed unexpectedly");
        } else {
            error!(direction, error = %err, "unexpected transport error");
        }
        self.record(&err);
        err
    }
}

/// Spawns and owns the receive and send loops of one connection.
pub struct DuplexDriver;

impl DuplexDriver {
    /// Start pumping `stream` through `pipe`. Both loops inherit the caller's
    /// tracing span.
    pub fn spawn<S>(stream: S, pipe: TransportPipe) -> DriverHandle
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let state = Arc::new(DriverState {
            shutdown_initiated: AtomicBool::new(false),
            close_reason: Mutex::new(None),
            receive_cancel: CancellationToken::new(),
            send_cancel: CancellationToken::new(),
        });
        let (read_half, write_half) = tokio::io::split(stream);

        let receive = tokio::spawn(
            receive_loop(read_half, pipe.input, Arc::clone(&state)).in_current_span(),
        );
        let send =
            tokio::spawn(send_loop(write_half, pipe.output, Arc::clone(&state)).in_current_span());

        DriverHandle {
            state,
            receive: Some(receive),
            send: Some(send),
        }
    }
}

async fn receive_loop<S: AsyncRead>(
    mut stream: ReadHalf<S>,
    input: PipeWriter,
    state: Arc<DriverState>,
) {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    let mut failure = None;

    loop {
        buf.reserve(READ_BUFFER_SIZE);
        let read = tokio::select! {
            _ = state.receive_cancel.cancelled() => break,
            read = stream.read_buf(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                debug!("peer closed the stream");
                break;
            }
            Ok(n) => {
                trace!(bytes = n, "received");
                if let Err(err) = input.write(&buf[..n]) {
                    debug!(error = %err, "input pipe closed");
                    break;
                }
                buf.clear();
                let flushed = tokio::select! {
                    _ = state.receive_cancel.cancelled() => break,
                    flushed = input.flush() => flushed,
                };
                match flushed {
                    Ok(result) if result.is_canceled => break,
                    Ok(_) => {}
                    Err(PipeError::ReaderCompleted) => break,
                    Err(err) => {
                        debug!(error = %err, "input pipe closed");
                        break;
                    }
                }
            }
            Err(err) => {
                let err = state.observe("receive", err);
                failure = Some(io::Error::new(err.kind(), err.to_string()));
                break;
            }
        }
    }

    input.complete(failure);
}

async fn send_loop<S: AsyncWrite>(
    mut stream: WriteHalf<S>,
    output: PipeReader,
    state: Arc<DriverState>,
) {
    loop {
        let read = tokio::select! {
            _ = state.send_cancel.cancelled() => break,
            read = output.read() => read,
        };
        let result = match read {
            Ok(result) => result,
            Err(err) => {
                debug!(error = %err, "output pipe closed");
                break;
            }
        };

        if !result.buffer.is_empty() {
            let written = tokio::select! {
                _ = state.send_cancel.cancelled() => break,
                written = stream.write_all(&result.buffer) => written,
            };
            if let Err(err) = written {
                state.observe("send", err);
                break;
            }
            trace!(bytes = result.buffer.len(), "sent");
            output.advance(result.buffer.len());
        }

        if result.is_completed || result.is_canceled {
            break;
        }
    }

    state.begin_shutdown();
    if let Err(err) = stream.shutdown().await {
        state.observe("send", err);
    }
    output.complete();
}

/// Control and completion handle for a running driver.
pub struct DriverHandle {
    state: Arc<DriverState>,
    receive: Option<JoinHandle<()>>,
    send: Option<JoinHandle<()>>,
}

impl DriverHandle {
    /// The first unexpected I/O error either loop hit, if any.
    pub fn close_reason(&self) -> Option<Arc<io::Error>> {
        self.state
            .close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the send loop has stopped or an abort was requested.
    pub fn is_shutting_down(&self) -> bool {
        self.state.is_shutting_down()
    }

    /// Stop both loops without waiting for the output pipe to drain.
    pub fn abort(&self) {
        self.state.begin_shutdown();
        self.state.send_cancel.cancel();
    }

    /// Wait for both loops to finish and return the close reason.
    ///
    /// Cancel safe: a join abandoned midway can be retried, for example after
    /// calling [`abort`](Self::abort).
    pub async fn join(&mut self) -> Option<Arc<io::Error>> {
        for (direction, slot) in [("receive", &mut self.receive), ("send", &mut self.send)] {
            let Some(task) = slot.as_mut() else {
                continue;
            };
            let result = task.await;
            *slot = None;
            if let Err(err) = result {
                error!(direction, error = %err, "transport loop panicked");
            }
        }
        self.close_reason()
    }
}
