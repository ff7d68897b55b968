//! Child watcher
//!
//! Turns raw child notifications for one path into wake signals, and rebuilds
//! the child watch whenever the session enters `CONNECTED` or `RECONNECTED`
//! since events may have been missed while disconnected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::coordination::{ChildListener, ListenerId, SharedClient, WatchId};
use crate::metrics;
use crate::models::{ChildEvent, ConnectionState, Instance};

use super::coalescer::WakeSender;

/// Flag raised by the watcher on every resubscription, consumed by the loop
#[derive(Debug, Clone, Default)]
pub struct ReconnectMarker(Arc<AtomicBool>);

impl ReconnectMarker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clear the flag, returning whether it was raised
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

struct WatcherShared {
    client: SharedClient,
    path: String,
    wake: WakeSender,
    reconnects: ReconnectMarker,
    registration: Mutex<Option<WatchId>>,
    closed: AtomicBool,
}

impl WatcherShared {
    fn registration(&self) -> MutexGuard<'_, Option<WatchId>> {
        self.registration
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn child_listener(&self) -> ChildListener {
        let wake = self.wake.clone();
        let path = self.path.clone();
        Arc::new(move |event: ChildEvent| {
            tracing::debug!(path = %path, child = %event.path, kind = ?event.kind, "Received child event");
            if let Some(hint) = event.hint() {
                wake.offer(hint);
            }
        })
    }

    /// Replace the current child registration with a fresh one
    async fn register(&self) -> bool {
        if let Some(previous) = self.registration().take() {
            self.client.unwatch(previous);
        }

        match self
            .client
            .watch_children(&self.path, self.child_listener())
            .await
        {
            Ok(id) => {
                if self.closed.load(Ordering::SeqCst) {
                    // closed while registering
                    self.client.unwatch(id);
                    return false;
                }
                *self.registration() = Some(id);
                tracing::info!(path = %self.path, watch = %id, "Child watch registered");
                true
            }
            Err(e) => {
                metrics::record_watch_failure(&self.path);
                tracing::error!(path = %self.path, error = %e, "Failed to register child watch");
                false
            }
        }
    }

    async fn on_connection_state(&self, state: ConnectionState) {
        tracing::info!(path = %self.path, state = %state, "Connection state changed");
        metrics::record_connection_state(state);

        if !state.requires_resubscribe() {
            return;
        }

        if self.register().await {
            self.reconnects.mark();
            self.wake.offer(Instance::null());
        }
    }
}

/// Watches the children of one path and posts wakes
pub struct ChildWatcher {
    shared: Arc<WatcherShared>,
    listener_id: ListenerId,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ChildWatcher {
    /// Subscribe to connection states and register the child watch
    ///
    /// A failed registration is logged and retried on the next
    /// `CONNECTED`/`RECONNECTED` transition.
    pub async fn start(
        client: SharedClient,
        path: impl Into<String>,
        wake: WakeSender,
        reconnects: ReconnectMarker,
    ) -> Self {
        let shared = Arc::new(WatcherShared {
            client: client.clone(),
            path: path.into(),
            wake,
            reconnects,
            registration: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let (state_tx, mut state_rx) = mpsc::unbounded_channel();
        let listener_id = client.add_connection_listener(Arc::new(move |state: ConnectionState| {
            let _ = state_tx.send(state);
        }));
        tracing::info!(path = %shared.path, backend = client.name(), "Connection state listener added");

        shared.register().await;

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let task_shared = shared.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    state = state_rx.recv() => match state {
                        Some(state) => task_shared.on_connection_state(state).await,
                        None => break,
                    },
                    _ = shutdown_rx.changed() => break,
                }
            }
            tracing::debug!(path = %task_shared.path, "Child watcher task stopped");
        });

        Self {
            shared,
            listener_id,
            shutdown,
            task: Some(task),
        }
    }

    pub fn path(&self) -> &str {
        &self.shared.path
    }

    /// Whether a child registration is currently active
    pub fn is_registered(&self) -> bool {
        self.shared.registration().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Release the connection listener and the child registration
    ///
    /// Safe to call more than once and from any thread.
    pub fn close(&mut self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.shared
            .client
            .remove_connection_listener(self.listener_id);
        if let Some(id) = self.shared.registration().take() {
            self.shared.client.unwatch(id);
        }
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }

        tracing::info!(path = %self.shared.path, "Child watcher closed");
    }
}

impl Drop for ChildWatcher {
    fn drop(&mut self) {
        self.close();
    }
}
