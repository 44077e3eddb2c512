use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use h2pipe_transport::error::is_transient_accept_error;
use h2pipe_transport::{Endpoint, Transport};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::ListenerOptions;
use crate::connection::Connection;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Accepts connections on a transport with several independent accept loops.
///
/// Each loop keeps one listening handle pending and replaces it before
/// handing an accepted connection over, so a slow consumer never leaves the
/// endpoint without a waiting handle. Accepted connections queue in a
/// channel with one slot per loop.
pub struct ConnectionListener<T: Transport> {
    transport: Arc<T>,
    options: ListenerOptions,
    unbind: CancellationToken,
    started: AtomicBool,
    sender: Mutex<Option<mpsc::Sender<Connection>>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<Connection>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    next_connection_id: Arc<AtomicU64>,
}

impl<T: Transport> ConnectionListener<T> {
    pub fn new(transport: T) -> Self {
        Self::with_options(transport, ListenerOptions::default())
    }

    pub fn with_options(transport: T, options: ListenerOptions) -> Self {
        let options = ListenerOptions {
            accept_loops: options.accept_loops.max(1),
        };
        let (sender, receiver) = mpsc::channel(options.accept_loops);
        Self {
            transport: Arc::new(transport),
            options,
            unbind: CancellationToken::new(),
            started: AtomicBool::new(false),
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
            loops: Mutex::new(Vec::new()),
            next_connection_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.transport.endpoint()
    }

    pub fn options(&self) -> &ListenerOptions {
        &self.options
    }

    /// Spawn the accept loops. Idempotent.
    ///
    /// Every loop's first listening handle is created here, so a transport
    /// that cannot listen fails the call instead of a background task.
    pub fn start(&self) -> h2pipe_transport::Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(sender) = lock(&self.sender).take() else {
            return Ok(());
        };

        let mut handles = Vec::with_capacity(self.options.accept_loops);
        for _ in 0..self.options.accept_loops {
            handles.push(self.transport.create_handle()?);
        }

        let span = info_span!("listener", endpoint = %self.endpoint());
        let mut loops = lock(&self.loops);
        for (loop_index, handle) in handles.into_iter().enumerate() {
            let task = accept_loop(
                Arc::clone(&self.transport),
                handle,
                loop_index,
                sender.clone(),
                self.unbind.clone(),
                Arc::clone(&self.next_connection_id),
            );
            loops.push(tokio::spawn(task.instrument(span.clone())));
        }
        info!(
            endpoint = %self.endpoint(),
            transport = self.transport.transport_name(),
            accept_loops = self.options.accept_loops,
            "listener started"
        );
        Ok(())
    }

    /// Next accepted connection.
    ///
    /// Returns `None` when `cancel` fires or once the listener is unbound and
    /// every queued connection has been taken.
    pub async fn accept(&self, cancel: &CancellationToken) -> Option<Connection> {
        let mut receiver = tokio::select! {
            _ = cancel.cancelled() => return None,
            receiver = self.receiver.lock() => receiver,
        };
        tokio::select! {
            _ = cancel.cancelled() => None,
            connection = receiver.recv() => connection,
        }
    }

    /// Stop the accept loops without waiting for them.
    pub fn stop_accepting(&self) {
        self.unbind.cancel();
        lock(&self.sender).take();
    }

    pub fn is_unbound(&self) -> bool {
        self.unbind.is_cancelled()
    }

    /// Stop the accept loops and wait for them to exit. Connections still
    /// queued are dropped.
    pub async fn unbind(&self) {
        self.stop_accepting();
        let loops = std::mem::take(&mut *lock(&self.loops));
        for task in loops {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    error!(error = %err, "accept loop panicked");
                }
            }
        }

        let mut receiver = self.receiver.lock().await;
        let mut dropped = 0usize;
        while receiver.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "dropped queued connections");
        }
        debug!(endpoint = %self.endpoint(), "listener unbound");
    }
}

async fn accept_loop<T: Transport>(
    transport: Arc<T>,
    mut handle: T::Handle,
    loop_index: usize,
    sender: mpsc::Sender<Connection>,
    unbind: CancellationToken,
    next_connection_id: Arc<AtomicU64>,
) {
    loop {
        let waited = tokio::select! {
            _ = unbind.cancelled() => break,
            waited = transport.wait_for_connection(handle) => waited,
        };
        // Replace the consumed handle before doing anything else.
        let next = transport.create_handle();

        match waited {
            Ok(accepted) => {
                let id = format!(
                    "conn-{}",
                    next_connection_id.fetch_add(1, Ordering::Relaxed)
                );
                debug!(
                    loop_index,
                    connection_id = %id,
                    remote = %accepted.info.remote,
                    "connection accepted"
                );
                let connection = Connection::new(id, accepted);
                let sent = tokio::select! {
                    _ = unbind.cancelled() => break,
                    sent = sender.send(connection) => sent,
                };
                if sent.is_err() {
                    debug!(loop_index, "listener dropped");
                    break;
                }
            }
            Err(err) if unbind.is_cancelled() => {
                debug!(loop_index, error = %err, "accept interrupted by unbind");
                break;
            }
            Err(err) if is_transient_accept_error(&err) => {
                warn!(loop_index, error = %err, "transient accept error, retrying");
            }
            Err(err) => {
                error!(loop_index, error = %err, "accept loop failed");
                break;
            }
        }

        handle = match next {
            Ok(handle) => handle,
            Err(err) => {
                error!(loop_index, error = %err, "cannot create listening handle");
                break;
            }
        };
    }
    debug!(loop_index, "accept loop stopped");
}
