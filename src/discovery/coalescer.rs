//! Single-slot wake hand-off between the child watcher and the reconciliation loop
//!
//! The producer side never blocks: a wake offered while another is still
//! pending is coalesced into it. The consumer waits with a long timeout so a
//! lost wake still leads to a resync.

use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::metrics;
use crate::models::Instance;

/// Default wait before a periodic safety resync
pub const DEFAULT_WAKE_TIMEOUT: Duration = Duration::from_secs(600);

/// Outcome of waiting for a wake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wake {
    /// A producer posted a wake with an advisory hint
    Signal(Instance),
    /// Nothing arrived before the timeout
    Timeout,
    /// Every producer is gone; treated as a null wake
    Interrupted,
}

impl Wake {
    /// The hint carried by this wake, the null instance for timeouts and interruptions
    pub fn hint(&self) -> Instance {
        match self {
            Self::Signal(hint) => hint.clone(),
            Self::Timeout | Self::Interrupted => Instance::null(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Signal(hint) if hint.is_null() => "resync",
            Self::Signal(_) => "child",
            Self::Timeout => "timeout",
            Self::Interrupted => "interrupted",
        }
    }
}

/// Producer half
#[derive(Debug, Clone)]
pub struct WakeSender {
    tx: mpsc::Sender<Instance>,
}

impl WakeSender {
    /// Offer a wake without blocking
    ///
    /// Returns `false` when a wake is already pending (the offer is coalesced)
    /// or the consumer is gone.
    pub fn offer(&self, hint: Instance) -> bool {
        match self.tx.try_send(hint) {
            Ok(()) => true,
            Err(TrySendError::Full(hint)) => {
                tracing::trace!(hint = %hint, "Wake coalesced into pending wake");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Consumer half
#[derive(Debug)]
pub struct WakeReceiver {
    rx: mpsc::Receiver<Instance>,
    path: String,
    closed: bool,
}

impl WakeReceiver {
    /// Wait for the next wake, at most `timeout`
    pub async fn wait(&mut self, timeout: Duration) -> Wake {
        if self.closed {
            // no producer left: fall back to plain periodic polling
            tokio::time::sleep(timeout).await;
            return self.record(Wake::Timeout);
        }

        let wake = match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(hint)) => Wake::Signal(hint),
            Ok(None) => {
                self.closed = true;
                tracing::warn!(path = %self.path, "Waiting for wake interrupted, forcing resync");
                Wake::Interrupted
            }
            Err(_) => {
                tracing::debug!(path = %self.path, timeout_secs = timeout.as_secs(), "No wake before timeout, resyncing");
                Wake::Timeout
            }
        };

        self.record(wake)
    }

    fn record(&self, wake: Wake) -> Wake {
        metrics::record_wake(&self.path, wake.kind());
        wake
    }
}

/// Create a path-scoped coalescer
pub fn wake_channel(path: impl Into<String>) -> (WakeSender, WakeReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (
        WakeSender { tx },
        WakeReceiver {
            rx,
            path: path.into(),
            closed: false,
        },
    )
}
