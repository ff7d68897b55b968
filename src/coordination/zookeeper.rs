//! ZooKeeper ensemble backend
//!
//! Selected for `host:port[,host:port...][/chroot]` connection strings.
//! Children are observed with one-shot watches re-armed after every
//! notification, and each listing is diffed against the previous one so
//! listeners receive per-child added/removed events.
//!
//! Session states map onto [`ConnectionState`]:
//!
//! | ZooKeeper                        | memberwatch                 |
//! |----------------------------------|-----------------------------|
//! | `Disconnected`                   | `SUSPENDED`                 |
//! | `SyncConnected` after an outage  | `RECONNECTED`               |
//! | `Expired`                        | `LOST`, then a new session  |
//! | `AuthFailed`, `Closed`           | `LOST`                      |
//!
//! Connecting, and replacing an expired session, is retried with exponential
//! backoff starting at [`RETRY_BASE`] for up to [`MAX_RETRIES`] retries.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use zookeeper_client as zk;

use crate::models::ConnectionState;

use super::{
    child_changes, ChildListener, CoordinationClient, CoordinationError, CoordinationResult,
    ConnectionListener, ListenerId, WatchId,
};

/// First delay between attempts, doubled after every failure
pub const RETRY_BASE: Duration = Duration::from_secs(1);

/// Attempts after the first before giving up
pub const MAX_RETRIES: u32 = 5;

/// Upper bound for a single connection attempt
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Pause before a failed children listing is re-armed
const WATCH_RETRY: Duration = Duration::from_secs(1);

/// Whether `connection_string` names a ZooKeeper ensemble
pub fn is_ensemble(connection_string: &str) -> bool {
    let servers = connection_string.split('/').next().unwrap_or_default();
    !servers.is_empty()
        && servers.split(',').all(|server| match server.rsplit_once(':') {
            Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
            None => false,
        })
}

/// Next state after the session reports `session`, `None` if unchanged
///
/// `Expired` is reported as `LOST`; the caller opens a replacement session.
fn session_transition(
    previous: ConnectionState,
    session: zk::SessionState,
) -> Option<ConnectionState> {
    match session {
        zk::SessionState::SyncConnected | zk::SessionState::ConnectedReadOnly => match previous {
            ConnectionState::Suspended | ConnectionState::Lost => {
                Some(ConnectionState::Reconnected)
            }
            _ => None,
        },
        zk::SessionState::Disconnected => Some(ConnectionState::Suspended),
        _ => Some(ConnectionState::Lost),
    }
}

fn map_error(path: &str, err: zk::Error) -> CoordinationError {
    match err {
        zk::Error::NoNode => CoordinationError::NoNode(path.to_string()),
        zk::Error::NodeExists => CoordinationError::NodeExists(path.to_string()),
        zk::Error::ConnectionLoss => CoordinationError::ConnectionLoss,
        zk::Error::SessionExpired => CoordinationError::SessionExpired,
        zk::Error::ClientClosed => CoordinationError::Closed,
        other => CoordinationError::Io {
            operation: format!("zookeeper {path}"),
            reason: other.to_string(),
        },
    }
}

async fn connect_with_retry(cluster: &str) -> CoordinationResult<zk::Client> {
    let mut delay = RETRY_BASE;
    let mut attempt = 0;

    loop {
        let error = match tokio::time::timeout(CONNECT_TIMEOUT, zk::Client::connect(cluster)).await
        {
            Ok(Ok(client)) => return Ok(client),
            Ok(Err(e)) => map_error("/", e),
            Err(_) => CoordinationError::ConnectionLoss,
        };

        if attempt == MAX_RETRIES {
            return Err(error);
        }
        attempt += 1;
        tracing::warn!(
            cluster,
            attempt,
            error = %error,
            delay_ms = delay.as_millis() as u64,
            "ZooKeeper connection failed, retrying"
        );
        tokio::time::sleep(delay).await;
        delay = delay.saturating_mul(2);
    }
}

struct WatchTask {
    path: String,
    handle: JoinHandle<()>,
}

struct SessionInner {
    state: ConnectionState,
    watches: HashMap<WatchId, WatchTask>,
    connection_listeners: HashMap<ListenerId, ConnectionListener>,
}

struct Session {
    cluster: String,
    client: RwLock<zk::Client>,
    inner: Mutex<SessionInner>,
}

impl Session {
    fn client(&self) -> zk::Client {
        self.client
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn replace_client(&self, client: zk::Client) {
        *self
            .client
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = client;
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, next: ConnectionState) {
        let listeners: Vec<ConnectionListener> = {
            let mut inner = self.lock();
            if inner.state == next {
                return;
            }
            inner.state = next;
            inner.connection_listeners.values().cloned().collect()
        };

        tracing::info!(cluster = %self.cluster, state = %next, "ZooKeeper session state changed");
        for listener in listeners {
            listener(next);
        }
    }

    /// Run `op` against the current client, waiting out connection loss
    async fn with_retry<T, F, Fut>(&self, path: &str, op: F) -> CoordinationResult<T>
    where
        F: Fn(zk::Client) -> Fut,
        Fut: std::future::Future<Output = Result<T, zk::Error>>,
    {
        let mut delay = RETRY_BASE;
        let mut attempt = 0;

        loop {
            match op(self.client()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let error = map_error(path, e);
                    let retryable = matches!(
                        error,
                        CoordinationError::ConnectionLoss | CoordinationError::SessionExpired
                    );
                    if !retryable || attempt == MAX_RETRIES {
                        return Err(error);
                    }
                    attempt += 1;
                    tracing::debug!(path, attempt, error = %error, "ZooKeeper request failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }
}

async fn monitor_session(session: Arc<Session>) {
    let mut states = session.client().state_watcher();

    loop {
        let reported = states.changed().await;
        let previous = session.lock().state;

        match reported {
            zk::SessionState::Expired => {
                session.transition(ConnectionState::Lost);
                match connect_with_retry(&session.cluster).await {
                    Ok(client) => {
                        states = client.state_watcher();
                        session.replace_client(client);
                        session.transition(ConnectionState::Reconnected);
                    }
                    Err(e) => {
                        tracing::error!(cluster = %session.cluster, error = %e, "Could not replace expired ZooKeeper session");
                        return;
                    }
                }
            }
            zk::SessionState::AuthFailed | zk::SessionState::Closed => {
                session.transition(ConnectionState::Lost);
                return;
            }
            other => {
                if let Some(next) = session_transition(previous, other) {
                    session.transition(next);
                }
            }
        }
    }
}

async fn watch_children_task(session: Arc<Session>, path: String, listener: ChildListener) {
    let mut known: Option<BTreeSet<String>> = None;

    loop {
        let client = session.client();
        match client.list_and_watch_children(&path).await {
            Ok((children, watcher)) => {
                let current: BTreeSet<String> = children.into_iter().collect();
                if let Some(known) = &known {
                    for event in child_changes(&path, known, &current) {
                        listener(event);
                    }
                }
                known = Some(current);

                let event = watcher.changed().await;
                if event.event_type == zk::EventType::Session {
                    tracing::debug!(path = %path, state = ?event.session_state, "Children watch ended with its session");
                    return;
                }
            }
            Err(zk::Error::NoNode) => match client.check_and_watch_stat(&path).await {
                Ok((Some(_), _)) => {}
                Ok((None, watcher)) => {
                    let event = watcher.changed().await;
                    if event.event_type == zk::EventType::Session {
                        return;
                    }
                }
                Err(e) => {
                    tracing::debug!(path = %path, error = %e, "Existence watch failed");
                    tokio::time::sleep(WATCH_RETRY).await;
                }
            },
            Err(e) => {
                tracing::debug!(path = %path, error = %e, "Children listing failed, re-arming");
                tokio::time::sleep(WATCH_RETRY).await;
            }
        }
    }
}

/// Coordination client over a ZooKeeper ensemble
pub struct ZookeeperCoordinator {
    session: Arc<Session>,
    monitor: Option<JoinHandle<()>>,
}

impl ZookeeperCoordinator {
    /// Open a session against `cluster`, retrying with backoff
    pub async fn connect(cluster: &str) -> CoordinationResult<Self> {
        let client = connect_with_retry(cluster).await?;

        let session = Arc::new(Session {
            cluster: cluster.to_string(),
            client: RwLock::new(client),
            inner: Mutex::new(SessionInner {
                state: ConnectionState::Connected,
                watches: HashMap::new(),
                connection_listeners: HashMap::new(),
            }),
        });
        let monitor = tokio::spawn(monitor_session(session.clone()));

        tracing::info!(cluster, "ZooKeeper session established");

        Ok(Self {
            session,
            monitor: Some(monitor),
        })
    }

    pub fn cluster(&self) -> &str {
        &self.session.cluster
    }
}

impl Drop for ZookeeperCoordinator {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
        for (_, task) in self.session.lock().watches.drain() {
            task.handle.abort();
        }
    }
}

#[async_trait]
impl CoordinationClient for ZookeeperCoordinator {
    fn name(&self) -> &str {
        "zookeeper"
    }

    fn state(&self) -> ConnectionState {
        self.session.lock().state
    }

    async fn list_children(&self, path: &str) -> CoordinationResult<Vec<String>> {
        let owned = path.to_string();
        let mut children = self
            .session
            .with_retry(path, |client| {
                let path = owned.clone();
                async move { client.list_children(&path).await }
            })
            .await?;
        children.sort();
        Ok(children)
    }

    async fn ensure_path(&self, path: &str) -> CoordinationResult<()> {
        let mut prefix = String::new();

        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            prefix.push('/');
            prefix.push_str(segment);

            let node = prefix.clone();
            let created = self
                .session
                .with_retry(&prefix, |client| {
                    let node = node.clone();
                    async move {
                        let options = zk::CreateMode::Persistent.with_acls(zk::Acls::anyone_all());
                        match client.create(&node, &[], &options).await {
                            Ok(_) | Err(zk::Error::NodeExists) => Ok(()),
                            Err(e) => Err(e),
                        }
                    }
                })
                .await;
            created?;
        }
        Ok(())
    }

    async fn watch_children(
        &self,
        path: &str,
        listener: ChildListener,
    ) -> CoordinationResult<WatchId> {
        let id = WatchId::new();
        let handle = tokio::spawn(watch_children_task(
            self.session.clone(),
            path.to_string(),
            listener,
        ));

        self.session.lock().watches.insert(
            id,
            WatchTask {
                path: path.to_string(),
                handle,
            },
        );
        Ok(id)
    }

    fn unwatch(&self, id: WatchId) {
        if let Some(task) = self.session.lock().watches.remove(&id) {
            task.handle.abort();
        }
    }

    fn add_connection_listener(&self, listener: ConnectionListener) -> ListenerId {
        let id = ListenerId::new();
        self.session.lock().connection_listeners.insert(id, listener);
        id
    }

    fn remove_connection_listener(&self, id: ListenerId) {
        self.session.lock().connection_listeners.remove(&id);
    }

    fn release(&self, path: &str) {
        let mut inner = self.session.lock();
        let released: Vec<WatchId> = inner
            .watches
            .iter()
            .filter(|(_, task)| task.path == path)
            .map(|(id, _)| *id)
            .collect();

        for id in released {
            if let Some(task) = inner.watches.remove(&id) {
                task.handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_ensemble() {
        assert!(is_ensemble("127.0.0.1:2181"));
        assert!(is_ensemble("zk1:2181,zk2:2181,zk3:2181"));
        assert!(is_ensemble("zk1:2181,zk2:2181/turbine"));

        assert!(!is_ensemble("memory://"));
        assert!(!is_ensemble("file:///var/lib/memberwatch"));
        assert!(!is_ensemble("zk1"));
        assert!(!is_ensemble("zk1:2181,"));
        assert!(!is_ensemble(":2181"));
        assert!(!is_ensemble(""));
    }

    #[test]
    fn test_session_transitions() {
        use zk::SessionState as Zk;

        assert_eq!(
            session_transition(ConnectionState::Connected, Zk::Disconnected),
            Some(ConnectionState::Suspended)
        );
        assert_eq!(
            session_transition(ConnectionState::Suspended, Zk::SyncConnected),
            Some(ConnectionState::Reconnected)
        );
        assert_eq!(
            session_transition(ConnectionState::Lost, Zk::SyncConnected),
            Some(ConnectionState::Reconnected)
        );
        assert_eq!(session_transition(ConnectionState::Connected, Zk::SyncConnected), None);
        assert_eq!(
            session_transition(ConnectionState::Connected, Zk::Expired),
            Some(ConnectionState::Lost)
        );
        assert_eq!(
            session_transition(ConnectionState::Reconnected, Zk::Closed),
            Some(ConnectionState::Lost)
        );
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            map_error("/service", zk::Error::NoNode),
            CoordinationError::NoNode("/service".to_string())
        );
        assert_eq!(
            map_error("/service", zk::Error::NodeExists),
            CoordinationError::NodeExists("/service".to_string())
        );
        assert_eq!(
            map_error("/service", zk::Error::ConnectionLoss),
            CoordinationError::ConnectionLoss
        );
        assert_eq!(
            map_error("/service", zk::Error::SessionExpired),
            CoordinationError::SessionExpired
        );
        assert!(map_error("/service", zk::Error::ConnectionLoss).is_transient());
    }
}
