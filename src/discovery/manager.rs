//! Watch lifecycle
//!
//! [`DiscoveryManager`] owns one [`WatchHandle`] per path over a shared
//! coordination client. A handle owns everything running for its path: the
//! child watcher, the reconciliation task and the event channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

use crate::coordination::SharedClient;
use crate::models::Instance;

use super::coalescer::wake_channel;
use super::reconcile::ReconcileLoop;
use super::stream::{EventPublisher, InstanceEvents, StreamItem};
use super::watcher::{ChildWatcher, ReconnectMarker};
use super::{validate_path, DiscoveryError, DiscoveryOptions};

// ============================================================================
// Watch Handle
// ============================================================================

/// Running watch on one path
pub struct WatchHandle {
    path: String,
    client: SharedClient,
    watcher: ChildWatcher,
    events: broadcast::Receiver<StreamItem>,
    members: watch::Receiver<Vec<Instance>>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    closed: bool,
}

impl WatchHandle {
    /// Start watching `path`
    ///
    /// Returns the handle together with a subscription taken before the first
    /// fetch, so the initial UP announcements are not missed.
    pub async fn start(
        client: SharedClient,
        path: &str,
        options: &DiscoveryOptions,
    ) -> Result<(Self, InstanceEvents), DiscoveryError> {
        validate_path(path)?;

        if options.create_path {
            client
                .ensure_path(path)
                .await
                .map_err(|source| DiscoveryError::Prepare {
                    path: path.to_string(),
                    source,
                })?;
        }

        let (wake_tx, wake_rx) = wake_channel(path);
        let reconnects = ReconnectMarker::new();
        let watcher = ChildWatcher::start(client.clone(), path, wake_tx, reconnects.clone()).await;

        let (publisher, events) = EventPublisher::new(options.event_capacity);
        let first = InstanceEvents::new(events.resubscribe(), path);
        let (members_tx, members) = watch::channel(Vec::new());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let reconcile = ReconcileLoop {
            client: client.clone(),
            path: path.to_string(),
            wakes: wake_rx,
            reconnects,
            policy: options.resync_policy,
            wake_timeout: options.wake_timeout,
            publisher,
            members: members_tx,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(reconcile.run());

        tracing::info!(path = %path, backend = client.name(), "Watch started");

        let handle = Self {
            path: path.to_string(),
            client,
            watcher,
            events,
            members,
            shutdown,
            task: Some(task),
            closed: false,
        };
        Ok((handle, first))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// New subscription, starting at the next event
    pub fn subscribe(&self) -> InstanceEvents {
        InstanceEvents::new(self.events.resubscribe(), &self.path)
    }

    /// Latest reconciled member list
    pub fn members(&self) -> Vec<Instance> {
        self.members.borrow().clone()
    }

    /// Receiver notified whenever the member list is reconciled
    pub fn members_watch(&self) -> watch::Receiver<Vec<Instance>> {
        self.members.clone()
    }

    /// Whether the reconciliation task is still running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the watch
    ///
    /// Closes the child watcher, releases the client's resources for the
    /// path, then signals the reconciliation task and waits for it. Calling
    /// it again does nothing.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.watcher.close();
        self.client.release(&self.path);
        let _ = self.shutdown.send(true);

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::error!(path = %self.path, error = %e, "Reconciliation task failed");
                }
            }
        }

        tracing::info!(path = %self.path, "Watch stopped");
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.watcher.close();
        self.client.release(&self.path);
        let _ = self.shutdown.send(true);
    }
}

// ============================================================================
// Discovery Manager
// ============================================================================

/// Registry of watched paths over one coordination client
pub struct DiscoveryManager {
    client: SharedClient,
    options: DiscoveryOptions,
    watches: Mutex<HashMap<String, WatchHandle>>,
    shut_down: AtomicBool,
}

impl DiscoveryManager {
    pub fn new(client: SharedClient, options: DiscoveryOptions) -> Self {
        Self {
            client,
            options,
            watches: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn client(&self) -> &SharedClient {
        &self.client
    }

    pub fn options(&self) -> &DiscoveryOptions {
        &self.options
    }

    /// Watch `path` and subscribe to its events
    ///
    /// An existing running watch is shared. A watch whose loop has ended
    /// after a fetch error is replaced by a fresh one.
    pub async fn start(&self, path: &str) -> Result<InstanceEvents, DiscoveryError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(DiscoveryError::ShutDown);
        }

        let mut watches = self.watches.lock().await;

        if let Some(existing) = watches.get(path) {
            if existing.is_running() {
                return Ok(existing.subscribe());
            }
            if let Some(mut stale) = watches.remove(path) {
                tracing::info!(path = %path, "Replacing ended watch");
                stale.close().await;
            }
        }

        let (handle, events) = WatchHandle::start(self.client.clone(), path, &self.options).await?;
        watches.insert(path.to_string(), handle);
        Ok(events)
    }

    /// Subscribe to an already watched path
    pub async fn subscribe(&self, path: &str) -> Result<InstanceEvents, DiscoveryError> {
        self.watches
            .lock()
            .await
            .get(path)
            .map(WatchHandle::subscribe)
            .ok_or_else(|| DiscoveryError::NotWatching(path.to_string()))
    }

    /// Latest reconciled members of `path`
    pub async fn members(&self, path: &str) -> Option<Vec<Instance>> {
        self.watches.lock().await.get(path).map(WatchHandle::members)
    }

    pub async fn members_watch(&self, path: &str) -> Option<watch::Receiver<Vec<Instance>>> {
        self.watches
            .lock()
            .await
            .get(path)
            .map(WatchHandle::members_watch)
    }

    /// Whether `path` has a running reconciliation loop
    pub async fn is_running(&self, path: &str) -> bool {
        self.watches
            .lock()
            .await
            .get(path)
            .is_some_and(WatchHandle::is_running)
    }

    pub async fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.watches.lock().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Stop watching `path`, returns whether it was watched
    pub async fn stop(&self, path: &str) -> bool {
        let handle = self.watches.lock().await.remove(path);
        match handle {
            Some(mut handle) => {
                handle.close().await;
                true
            }
            None => false,
        }
    }

    /// Stop every watch and refuse new ones
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let handles: Vec<WatchHandle> = self
            .watches
            .lock()
            .await
            .drain()
            .map(|(_, handle)| handle)
            .collect();

        tracing::info!(watches = handles.len(), "Shutting down discovery");
        for mut handle in handles {
            handle.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{CoordinationError, MemoryCoordinator};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn manager(zk: &MemoryCoordinator) -> DiscoveryManager {
        DiscoveryManager::new(Arc::new(zk.clone()), DiscoveryOptions::default())
    }

    async fn next(events: &mut InstanceEvents) -> Instance {
        timeout(Duration::from_secs(2), events.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("stream failed")
    }

    #[tokio::test]
    async fn test_start_announces_existing_members() {
        let zk = MemoryCoordinator::new();
        zk.create("/service/a:1").unwrap();
        zk.create("/service/b:2").unwrap();

        let manager = manager(&zk);
        let mut events = manager.start("/service").await.unwrap();

        assert_eq!(next(&mut events).await.to_string(), "UP a:1");
        assert_eq!(next(&mut events).await.to_string(), "UP b:2");
    }

    #[tokio::test]
    async fn test_start_twice_shares_watch() {
        let zk = MemoryCoordinator::new();
        zk.create("/service").unwrap();

        let manager = manager(&zk);
        let mut first = manager.start("/service").await.unwrap();
        let mut second = manager.start("/service").await.unwrap();
        assert_eq!(zk.watch_count("/service"), 1);

        zk.create("/service/a:1").unwrap();
        assert_eq!(next(&mut first).await, Instance::up("a:1"));
        assert_eq!(next(&mut second).await, Instance::up("a:1"));
    }

    #[tokio::test]
    async fn test_invalid_path_rejected() {
        let manager = manager(&MemoryCoordinator::new());
        assert!(matches!(
            manager.start("service").await,
            Err(DiscoveryError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_create_path_option() {
        let zk = MemoryCoordinator::new();
        let options = DiscoveryOptions {
            create_path: true,
            ..Default::default()
        };
        let manager = DiscoveryManager::new(Arc::new(zk.clone()), options);

        let mut events = manager.start("/services/stream").await.unwrap();
        zk.create("/services/stream/a:1").unwrap();
        assert_eq!(next(&mut events).await, Instance::up("a:1"));
    }

    #[tokio::test]
    async fn test_stop_releases_and_ends_streams() {
        let zk = MemoryCoordinator::new();
        zk.create("/service").unwrap();
        let manager = manager(&zk);
        let mut events = manager.start("/service").await.unwrap();

        assert!(manager.stop("/service").await);
        assert!(!manager.stop("/service").await);

        assert_eq!(zk.watch_count("/service"), 0);
        assert_eq!(zk.connection_listener_count(), 0);
        assert_eq!(zk.released_paths(), vec!["/service"]);
        assert!(timeout(Duration::from_secs(2), events.next())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_failed_watch_is_replaced_on_start() {
        let zk = MemoryCoordinator::new();
        zk.fail_next_list(CoordinationError::SessionExpired);
        let manager = manager(&zk);

        let mut events = manager.start("/service").await.unwrap();
        let failure = timeout(Duration::from_secs(2), events.next()).await.unwrap();
        assert!(matches!(failure, Some(Err(DiscoveryError::Fetch { .. }))));
        assert!(timeout(Duration::from_secs(2), events.next())
            .await
            .unwrap()
            .is_none());
        // let the failed task finish
        tokio::time::sleep(Duration::from_millis(50)).await;

        zk.create("/service/a:1").unwrap();
        let mut events = manager.start("/service").await.unwrap();
        assert_eq!(next(&mut events).await, Instance::up("a:1"));
    }

    #[tokio::test]
    async fn test_members_view() {
        let zk = MemoryCoordinator::new();
        zk.create("/service/a:1").unwrap();
        let manager = manager(&zk);
        let mut events = manager.start("/service").await.unwrap();
        next(&mut events).await;

        assert_eq!(manager.members("/service").await, Some(vec![Instance::up("a:1")]));
        assert_eq!(manager.members("/other").await, None);
        assert_eq!(manager.paths().await, vec!["/service"]);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_watches() {
        let zk = MemoryCoordinator::new();
        let manager = manager(&zk);
        manager.start("/a").await.unwrap();
        manager.start("/b").await.unwrap();

        manager.shutdown().await;
        manager.shutdown().await;

        assert!(manager.paths().await.is_empty());
        assert!(matches!(
            manager.start("/c").await,
            Err(DiscoveryError::ShutDown)
        ));
        assert_eq!(zk.released_paths().len(), 2);
    }
}
