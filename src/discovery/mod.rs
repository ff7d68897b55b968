//! Membership discovery for coordination-service paths
//!
//! One watched path runs this pipeline:
//!
//! ```text
//! CoordinationClient -> ChildWatcher -> wake slot -> ReconcileLoop -> InstanceEvents
//!      (callbacks)       (hints)         (1 slot)     (fetch + diff)   (broadcast)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use memberwatch::coordination::MemoryCoordinator;
//! use memberwatch::discovery::{DiscoveryManager, DiscoveryOptions};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = DiscoveryManager::new(Arc::new(MemoryCoordinator::new()), DiscoveryOptions::default());
//! let mut events = manager.start("/services/stream").await?;
//! while let Some(event) = events.next().await {
//!     println!("{}", event?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod coalescer;
pub mod manager;
pub mod reconcile;
pub mod stream;
pub mod watcher;

use std::time::Duration;

use crate::coordination::CoordinationError;

pub use coalescer::{wake_channel, Wake, WakeReceiver, WakeSender, DEFAULT_WAKE_TIMEOUT};
pub use manager::{DiscoveryManager, WatchHandle};
pub use reconcile::{diff, ResyncPolicy, Snapshot, SnapshotWindow};
pub use stream::InstanceEvents;
pub use watcher::{ChildWatcher, ReconnectMarker};

/// Default broadcast buffer per watched path
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Discovery errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum DiscoveryError {
    /// Listing children failed; the path's stream is over
    #[error("Failed to fetch children of {path}: {source}")]
    Fetch {
        path: String,
        #[source]
        source: CoordinationError,
    },

    /// Subscriber fell behind the broadcast buffer
    #[error("Subscriber for {path} lagged behind by {skipped} events")]
    Lagged { path: String, skipped: u64 },

    /// Path could not be created before watching
    #[error("Failed to prepare {path}: {source}")]
    Prepare {
        path: String,
        #[source]
        source: CoordinationError,
    },

    #[error("Invalid watch path: '{0}'")]
    InvalidPath(String),

    #[error("Path is not watched: {0}")]
    NotWatching(String),

    #[error("Discovery manager is shut down")]
    ShutDown,
}

impl DiscoveryError {
    /// Path the error relates to, if any
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Fetch { path, .. }
            | Self::Lagged { path, .. }
            | Self::Prepare { path, .. }
            | Self::NotWatching(path)
            | Self::InvalidPath(path) => Some(path),
            Self::ShutDown => None,
        }
    }
}

/// Per-path discovery settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// Longest wait between fetches when no wake arrives
    pub wake_timeout: Duration,
    /// Broadcast buffer size per path
    pub event_capacity: usize,
    /// Baseline handling after a reconnect
    pub resync_policy: ResyncPolicy,
    /// Create the watched path before the first fetch
    pub create_path: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            wake_timeout: DEFAULT_WAKE_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            resync_policy: ResyncPolicy::default(),
            create_path: false,
        }
    }
}

/// Check that `path` is an absolute coordination path
pub fn validate_path(path: &str) -> Result<(), DiscoveryError> {
    let valid = path.starts_with('/')
        && (path == "/" || !path.ends_with('/'))
        && !path.contains("//");
    if valid {
        Ok(())
    } else {
        Err(DiscoveryError::InvalidPath(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_path() {
        assert!(validate_path("/").is_ok());
        assert!(validate_path("/services/stream").is_ok());
        assert!(validate_path("").is_err());
        assert!(validate_path("services").is_err());
        assert!(validate_path("/services/").is_err());
        assert!(validate_path("/a//b").is_err());
    }

    #[test]
    fn test_error_path() {
        let err = DiscoveryError::Fetch {
            path: "/service".to_string(),
            source: CoordinationError::ConnectionLoss,
        };
        assert_eq!(err.path(), Some("/service"));
        assert!(err.to_string().contains("Connection lost"));
        assert_eq!(DiscoveryError::ShutDown.path(), None);
    }
}
