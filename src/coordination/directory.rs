//! Directory-backed coordination backend
//!
//! A local directory stands in for the coordination hierarchy: the path
//! `/service` maps to `<root>/service` and every directory entry below it is
//! one child. Changes are detected by polling, and the session is reported
//! `LOST` while the root directory is missing and `RECONNECTED` once it
//! reappears. Pollers stay silent during the outage, and listings wait for
//! the root with exponential backoff before giving up with `ConnectionLoss`.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::models::ConnectionState;

use super::{
    child_changes, ChildListener, CoordinationClient, CoordinationError, CoordinationResult,
    ConnectionListener, ListenerId, WatchId,
};

/// Default interval between directory scans
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Listing retries while the root is missing, starting at the poll interval
pub const RECONNECT_RETRIES: u32 = 5;

struct WatchTask {
    path: String,
    handle: JoinHandle<()>,
}

struct DirectoryState {
    watches: HashMap<WatchId, WatchTask>,
    connection_listeners: HashMap<ListenerId, ConnectionListener>,
    state: ConnectionState,
}

/// Coordination client over a local directory tree
pub struct DirectoryCoordinator {
    root: PathBuf,
    poll_interval: Duration,
    inner: Arc<Mutex<DirectoryState>>,
    monitor: Option<JoinHandle<()>>,
}

impl DirectoryCoordinator {
    /// Open `root` (created if missing) with the default poll interval
    pub async fn connect(root: impl Into<PathBuf>) -> CoordinationResult<Self> {
        Self::connect_with_interval(root, DEFAULT_POLL_INTERVAL).await
    }

    /// Open `root` (created if missing), scanning every `poll_interval`
    pub async fn connect_with_interval(
        root: impl Into<PathBuf>,
        poll_interval: Duration,
    ) -> CoordinationResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| CoordinationError::io("connect", e))?;

        let inner = Arc::new(Mutex::new(DirectoryState {
            watches: HashMap::new(),
            connection_listeners: HashMap::new(),
            state: ConnectionState::Connected,
        }));

        let monitor = tokio::spawn(monitor_root(root.clone(), poll_interval, inner.clone()));

        tracing::debug!(root = %root.display(), "Directory coordinator connected");

        Ok(Self {
            root,
            poll_interval,
            inner,
            monitor: Some(monitor),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> MutexGuard<'_, DirectoryState> {
        lock_state(&self.inner)
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl Drop for DirectoryCoordinator {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
        for (_, task) in self.lock().watches.drain() {
            task.handle.abort();
        }
    }
}

fn lock_state(inner: &Mutex<DirectoryState>) -> MutexGuard<'_, DirectoryState> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn list_dir(dir: &Path, path: &str) -> CoordinationResult<Vec<String>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(CoordinationError::NoNode(path.to_string()))
        }
        Err(e) => return Err(CoordinationError::io("list_children", e)),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| CoordinationError::io("list_children", e))?
    {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

async fn root_present(root: &Path) -> bool {
    tokio::fs::metadata(root).await.is_ok()
}

async fn scan(dir: &Path, path: &str) -> Option<BTreeSet<String>> {
    list_dir(dir, path)
        .await
        .ok()
        .map(|names| names.into_iter().collect())
}

struct Poller {
    root: PathBuf,
    dir: PathBuf,
    path: String,
    poll_interval: Duration,
    inner: Arc<Mutex<DirectoryState>>,
}

impl Poller {
    fn disconnected(&self) -> bool {
        lock_state(&self.inner).state == ConnectionState::Lost
    }

    async fn run(self, listener: ChildListener) {
        let mut known = scan(&self.dir, &self.path).await.unwrap_or_default();

        loop {
            tokio::time::sleep(self.poll_interval).await;
            // silent while disconnected, RECONNECTED drives the resync
            if self.disconnected() || !root_present(&self.root).await {
                continue;
            }
            let Some(current) = scan(&self.dir, &self.path).await else {
                continue;
            };

            for event in child_changes(&self.path, &known, &current) {
                listener(event);
            }

            known = current;
        }
    }
}

async fn monitor_root(root: PathBuf, poll_interval: Duration, inner: Arc<Mutex<DirectoryState>>) {
    loop {
        tokio::time::sleep(poll_interval).await;
        let present = root_present(&root).await;

        let transition = {
            let mut state = lock_state(&inner);
            let next = match (state.state, present) {
                (ConnectionState::Lost, true) => Some(ConnectionState::Reconnected),
                (ConnectionState::Lost, false) => None,
                (_, false) => Some(ConnectionState::Lost),
                (_, true) => None,
            };
            next.map(|next| {
                state.state = next;
                let listeners: Vec<ConnectionListener> =
                    state.connection_listeners.values().cloned().collect();
                (next, listeners)
            })
        };

        if let Some((next, listeners)) = transition {
            tracing::info!(root = %root.display(), state = %next, "Directory session state changed");
            for listener in listeners {
                listener(next);
            }
        }
    }
}

#[async_trait]
impl CoordinationClient for DirectoryCoordinator {
    fn name(&self) -> &str {
        "directory"
    }

    fn state(&self) -> ConnectionState {
        self.lock().state
    }

    async fn list_children(&self, path: &str) -> CoordinationResult<Vec<String>> {
        let dir = self.resolve(path);
        let mut delay = self.poll_interval;

        for attempt in 0..=RECONNECT_RETRIES {
            match list_dir(&dir, path).await {
                Err(CoordinationError::NoNode(_)) if !root_present(&self.root).await => {
                    if attempt == RECONNECT_RETRIES {
                        break;
                    }
                    tracing::debug!(
                        root = %self.root.display(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Root missing, waiting before listing again"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                result => return result,
            }
        }

        tracing::warn!(root = %self.root.display(), path, "Root still missing, giving up");
        Err(CoordinationError::ConnectionLoss)
    }

    async fn ensure_path(&self, path: &str) -> CoordinationResult<()> {
        tokio::fs::create_dir_all(self.resolve(path))
            .await
            .map_err(|e| CoordinationError::io("ensure_path", e))
    }

    async fn watch_children(
        &self,
        path: &str,
        listener: ChildListener,
    ) -> CoordinationResult<WatchId> {
        let id = WatchId::new();
        let poller = Poller {
            root: self.root.clone(),
            dir: self.resolve(path),
            path: path.to_string(),
            poll_interval: self.poll_interval,
            inner: self.inner.clone(),
        };
        let handle = tokio::spawn(poller.run(listener));

        self.lock().watches.insert(
            id,
            WatchTask {
                path: path.to_string(),
                handle,
            },
        );
        Ok(id)
    }

    fn unwatch(&self, id: WatchId) {
        if let Some(task) = self.lock().watches.remove(&id) {
            task.handle.abort();
        }
    }

    fn add_connection_listener(&self, listener: ConnectionListener) -> ListenerId {
        let id = ListenerId::new();
        self.lock().connection_listeners.insert(id, listener);
        id
    }

    fn remove_connection_listener(&self, id: ListenerId) {
        self.lock().connection_listeners.remove(&id);
    }

    fn release(&self, path: &str) {
        let mut state = self.lock();
        let released: Vec<WatchId> = state
            .watches
            .iter()
            .filter(|(_, task)| task.path == path)
            .map(|(id, _)| *id)
            .collect();

        for id in released {
            if let Some(task) = state.watches.remove(&id) {
                task.handle.abort();
            }
        }
    }
}
