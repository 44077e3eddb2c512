//! Deferred work executed on a connection's protocol task.
//!
//! Stream tasks never touch connection state directly. They post closures
//! here and the protocol loop runs them one at a time between frames, so all
//! mutation of that state stays on one task.

use tokio::sync::{mpsc, oneshot};

/// A unit of work against state `T`.
pub type WorkItem<T> = Box<dyn FnOnce(&mut T) + Send>;

/// Create a connected poster and receiver.
pub fn work_queue<T>() -> (WorkPoster<T>, WorkReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (WorkPoster { tx }, WorkReceiver { rx })
}

/// Cloneable handle used by stream tasks to post work.
pub struct WorkPoster<T> {
    tx: mpsc::UnboundedSender<WorkItem<T>>,
}

impl<T> Clone for WorkPoster<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: 'static> WorkPoster<T> {
    /// Queue `work`. Returns false when the owning task has gone away.
    pub fn post<F>(&self, work: F) -> bool
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        self.tx.send(Box::new(work)).is_ok()
    }

    /// Queue `work` and wait for its result.
    ///
    /// Returns `None` when the owning task stopped before running it.
    pub async fn call<F, R>(&self, work: F) -> Option<R>
    where
        F: FnOnce(&mut T) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let posted = self.post(move |state| {
            let _ = done_tx.send(work(state));
        });
        if !posted {
            return None;
        }
        done_rx.await.ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<T> std::fmt::Debug for WorkPoster<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkPoster")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Receiving side, owned by the protocol task.
pub struct WorkReceiver<T> {
    rx: mpsc::UnboundedReceiver<WorkItem<T>>,
}

impl<T> WorkReceiver<T> {
    /// Wait for the next item. Cancel safe.
    pub async fn recv(&mut self) -> Option<WorkItem<T>> {
        self.rx.recv().await
    }

    /// Take an item if one is ready.
    pub fn try_recv(&mut self) -> Option<WorkItem<T>> {
        self.rx.try_recv().ok()
    }

    /// Refuse further posts. Items already queued can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
