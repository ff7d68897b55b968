//! Coordination-service client boundary
//!
//! The reconciliation engine only needs three things from a coordination
//! service: list the children of a path, deliver callbacks when children are
//! added or removed, and report session state transitions. [`CoordinationClient`]
//! captures exactly that. Connection handling and retry policy live behind the
//! trait.
//!
//! Backends shipped with the crate:
//!
//! - [`MemoryCoordinator`] - in-process tree, used by tests and `memory://`
//! - [`DirectoryCoordinator`] - a local directory stands in for the hierarchy,
//!   selected with `file://`
//! - [`ZookeeperCoordinator`] - a ZooKeeper ensemble, selected with
//!   `host:port[,host:port...][/chroot]`

pub mod directory;
pub mod memory;
pub mod zookeeper;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{ChildEvent, ChildEventKind, ConnectionState};

pub use directory::DirectoryCoordinator;
pub use memory::MemoryCoordinator;
pub use zookeeper::ZookeeperCoordinator;

/// Result type for coordination operations
pub type CoordinationResult<T> = Result<T, CoordinationError>;

/// Callback invoked for every raw child event of a watched path
pub type ChildListener = Arc<dyn Fn(ChildEvent) + Send + Sync>;

/// Callback invoked on every connection state transition
pub type ConnectionListener = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Errors reported by a coordination client
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinationError {
    /// Path does not exist
    #[error("Node does not exist: {0}")]
    NoNode(String),

    /// Path already exists
    #[error("Node already exists: {0}")]
    NodeExists(String),

    /// Connection to the service is down and retries were exhausted
    #[error("Connection lost")]
    ConnectionLoss,

    /// Session expired
    #[error("Session expired")]
    SessionExpired,

    /// Client was closed
    #[error("Client closed")]
    Closed,

    /// Backend I/O failure
    #[error("I/O error during '{operation}': {reason}")]
    Io { operation: String, reason: String },

    /// Connection string names a backend this build cannot reach
    #[error("Unsupported connection string: {0}")]
    UnsupportedConnection(String),
}

impl CoordinationError {
    pub fn io(operation: impl Into<String>, err: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            reason: err.to_string(),
        }
    }

    /// Check if the client may recover on its own
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionLoss | Self::Io { .. })
    }
}

/// Handle for a child-watch registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(Uuid);

impl WatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch-{}", self.0)
    }
}

/// Handle for a connection-state listener registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Client for a hierarchical coordination service
///
/// Implementations deliver callbacks from their own execution context and
/// must not hold internal locks while doing so.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Current session state
    fn state(&self) -> ConnectionState;

    /// List the children of `path`
    async fn list_children(&self, path: &str) -> CoordinationResult<Vec<String>>;

    /// Create `path` and any missing parents
    async fn ensure_path(&self, path: &str) -> CoordinationResult<()>;

    /// Register `listener` for child events under `path`
    async fn watch_children(
        &self,
        path: &str,
        listener: ChildListener,
    ) -> CoordinationResult<WatchId>;

    /// Drop a child-watch registration. Unknown ids are ignored.
    fn unwatch(&self, id: WatchId);

    /// Register a connection-state listener
    fn add_connection_listener(&self, listener: ConnectionListener) -> ListenerId;

    /// Drop a connection-state listener. Unknown ids are ignored.
    fn remove_connection_listener(&self, id: ListenerId);

    /// Release every path-level resource held for `path`
    fn release(&self, path: &str);
}

/// Shared coordination client
pub type SharedClient = Arc<dyn CoordinationClient>;

/// Build a client from a connection string
///
/// - `127.0.0.1:2181,10.0.0.2:2181/chroot` - ZooKeeper ensemble
/// - `memory://` - fresh in-memory tree
/// - `file:///some/dir` - directory-backed hierarchy
pub async fn connect(connection_string: &str) -> CoordinationResult<SharedClient> {
    if zookeeper::is_ensemble(connection_string) {
        tracing::info!(cluster = %connection_string, "Using ZooKeeper coordination backend");
        let client = ZookeeperCoordinator::connect(connection_string).await?;
        return Ok(Arc::new(client));
    }

    if connection_string == "memory://" || connection_string == "memory" {
        tracing::info!("Using in-memory coordination backend");
        return Ok(Arc::new(MemoryCoordinator::new()));
    }

    if let Some(root) = connection_string.strip_prefix("file://") {
        if root.is_empty() {
            return Err(CoordinationError::UnsupportedConnection(
                connection_string.to_string(),
            ));
        }
        tracing::info!(root = %root, "Using directory coordination backend");
        let client = DirectoryCoordinator::connect(root).await?;
        return Ok(Arc::new(client));
    }

    Err(CoordinationError::UnsupportedConnection(
        connection_string.to_string(),
    ))
}

/// Join a parent path and a child name
pub fn join_path(parent: &str, child: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Per-child events turning the `known` listing into `current`
pub(crate) fn child_changes(
    path: &str,
    known: &BTreeSet<String>,
    current: &BTreeSet<String>,
) -> Vec<ChildEvent> {
    let added = current
        .difference(known)
        .map(|child| ChildEvent::new(ChildEventKind::Added, join_path(path, child)));
    let removed = known
        .difference(current)
        .map(|child| ChildEvent::new(ChildEventKind::Removed, join_path(path, child)));
    added.chain(removed).collect()
}

/// Parent of `path`, `None` for the root
pub fn parent_path(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&trimmed[..idx]),
        None => None,
    }
}
