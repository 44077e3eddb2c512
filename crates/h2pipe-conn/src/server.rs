//! Hosting: a listener, the live connections it accepted, and their shutdown.

use std::sync::Arc;

use h2pipe_transport::{Endpoint, Transport};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{ConnectionOptions, ServerOptions};
use crate::connection::{ConnectionControl, ConnectionState};
use crate::handler::Handler;
use crate::listener::ConnectionListener;
use crate::registry::{ConnectionRegistry, RegistryGuard, RegistryKey};
use crate::shutdown::{Drainable, ShutdownCoordinator, ShutdownOutcome};

/// Registry entry for one served connection.
#[derive(Debug, Clone)]
pub struct LiveConnection {
    pub id: String,
    pub control: ConnectionControl,
    task: Option<AbortHandle>,
}

impl LiveConnection {
    pub fn state(&self) -> ConnectionState {
        self.control.state()
    }
}

/// Serves a [`Handler`] on every connection a transport accepts.
pub struct Server<T: Transport> {
    listener: Arc<ConnectionListener<T>>,
    registry: ConnectionRegistry<LiveConnection>,
    stop_accepting: CancellationToken,
    accept_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    options: ServerOptions,
}

impl<T: Transport> Server<T> {
    /// Start listening on `transport` and serving `handler`.
    pub fn start<H: Handler>(
        transport: T,
        handler: H,
        options: ServerOptions,
    ) -> h2pipe_transport::Result<Self> {
        let listener = Arc::new(ConnectionListener::with_options(transport, options.listener));
        listener.start()?;

        let registry = ConnectionRegistry::new();
        let stop_accepting = CancellationToken::new();
        let accept_task = tokio::spawn(accept_connections(
            Arc::clone(&listener),
            Arc::new(handler),
            registry.clone(),
            options.connection,
            stop_accepting.clone(),
        ));
        info!(endpoint = %listener.endpoint(), "server started");

        Ok(Self {
            listener,
            registry,
            stop_accepting,
            accept_task: tokio::sync::Mutex::new(Some(accept_task)),
            options,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.listener.endpoint()
    }

    pub fn transport(&self) -> &T {
        self.listener.transport()
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Connections currently being served.
    pub fn connections(&self) -> Vec<LiveConnection> {
        self.registry.snapshot()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Run the three-phase shutdown with the configured timeout.
    pub async fn shutdown(&self) -> ShutdownOutcome {
        ShutdownCoordinator::new(self.options.shutdown_timeout)
            .stop(self)
            .await
    }
}

async fn accept_connections<T: Transport, H: Handler>(
    listener: Arc<ConnectionListener<T>>,
    handler: Arc<H>,
    registry: ConnectionRegistry<LiveConnection>,
    options: ConnectionOptions,
    stop_accepting: CancellationToken,
) {
    while let Some(connection) = listener.accept(&stop_accepting).await {
        let (control, key) = register(&registry, &stop_accepting, connection.id());
        let guard = RegistryGuard::new(registry.clone(), key);
        let handler = Arc::clone(&handler);
        let task = tokio::spawn(async move {
            let _guard = guard;
            let outcome = connection.serve(handler, options, control).await;
            debug!(
                connection_id = %outcome.id,
                state = %outcome.state,
                graceful = outcome.is_graceful(),
                "connection finished"
            );
        });
        registry.update(key, |entry| entry.task = Some(task.abort_handle()));
    }
    debug!("accept task finished");
}

/// Add a freshly accepted connection to the registry. One that lands after
/// shutdown started missed the drain pass and starts out draining.
fn register(
    registry: &ConnectionRegistry<LiveConnection>,
    stop_accepting: &CancellationToken,
    id: &str,
) -> (ConnectionControl, RegistryKey) {
    let control = ConnectionControl::new();
    let key = registry.insert(LiveConnection {
        id: id.to_string(),
        control: control.clone(),
        task: None,
    });
    if stop_accepting.is_cancelled() {
        debug!(connection_id = id, "accepted during shutdown");
        control.drain();
    }
    (control, key)
}

impl<T: Transport> Drainable for Server<T> {
    fn allow_stop(&self) {
        self.stop_accepting.cancel();
        self.listener.stop_accepting();
        self.registry.for_each(|entry| entry.control.drain());
    }

    fn stop_rude(&self) {
        self.registry.for_each(|entry| entry.control.abort());
    }

    fn stop_immediate(&self) {
        self.registry.for_each(|entry| {
            if let Some(task) = &entry.task {
                task.abort();
            }
        });
    }

    async fn wait_stopped(&self) {
        self.listener.unbind().await;
        {
            let mut accept_task = self.accept_task.lock().await;
            if let Some(task) = accept_task.as_mut() {
                if let Err(err) = task.await {
                    if !err.is_cancelled() {
                        error!(error = %err, "accept task panicked");
                    }
                }
                *accept_task = None;
            }
        }
        self.registry.wait_empty().await;
    }
}

impl<T: Transport> Drop for Server<T> {
    fn drop(&mut self) {
        self.stop_accepting.cancel();
        self.listener.stop_accepting();
        if let Ok(mut accept_task) = self.accept_task.try_lock() {
            if let Some(task) = accept_task.take() {
                task.abort();
            }
        }
    }
}
