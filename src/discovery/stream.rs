//! Instance event broadcast
//!
//! Every subscriber sees the same ordered sequence from the moment it
//! subscribed. Nothing is replayed. A fetch failure is delivered once to every
//! live subscriber and ends their streams, as does falling behind the buffer.

use futures::stream::{self, Stream};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::models::Instance;

use super::DiscoveryError;

/// Item carried on the broadcast channel
#[derive(Debug, Clone)]
pub(crate) enum StreamItem {
    Event(Instance),
    Failed(DiscoveryError),
}

/// Sending half, owned by the reconciliation loop
///
/// The channel closes when the publisher is dropped, which ends every
/// subscriber's stream.
#[derive(Debug)]
pub(crate) struct EventPublisher {
    tx: broadcast::Sender<StreamItem>,
}

impl EventPublisher {
    /// Create a publisher plus a template receiver used only for resubscribing
    pub(crate) fn new(capacity: usize) -> (Self, broadcast::Receiver<StreamItem>) {
        let (tx, rx) = broadcast::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Deliver one event, returns the number of receivers it reached
    pub(crate) fn publish(&self, instance: Instance) -> usize {
        self.tx.send(StreamItem::Event(instance)).unwrap_or(0)
    }

    /// Deliver a terminal error
    pub(crate) fn fail(&self, error: DiscoveryError) {
        let _ = self.tx.send(StreamItem::Failed(error));
    }
}

/// Subscriber view of a path's instance events
#[derive(Debug)]
pub struct InstanceEvents {
    rx: broadcast::Receiver<StreamItem>,
    path: String,
    finished: bool,
}

impl InstanceEvents {
    pub(crate) fn new(rx: broadcast::Receiver<StreamItem>, path: impl Into<String>) -> Self {
        Self {
            rx,
            path: path.into(),
            finished: false,
        }
    }

    /// Path whose events this stream carries
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Receive the next event
    ///
    /// Returns `None` once the stream has ended. An `Err` is always the last
    /// item before the end.
    pub async fn next(&mut self) -> Option<Result<Instance, DiscoveryError>> {
        if self.finished {
            return None;
        }

        match self.rx.recv().await {
            Ok(StreamItem::Event(instance)) => Some(Ok(instance)),
            Ok(StreamItem::Failed(error)) => {
                self.finished = true;
                Some(Err(error))
            }
            Err(RecvError::Closed) => {
                self.finished = true;
                None
            }
            Err(RecvError::Lagged(skipped)) => {
                self.finished = true;
                tracing::warn!(path = %self.path, skipped, "Subscriber lagged behind, ending stream");
                Some(Err(DiscoveryError::Lagged {
                    path: self.path.clone(),
                    skipped,
                }))
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Adapt into a [`Stream`]
    pub fn into_stream(self) -> impl Stream<Item = Result<Instance, DiscoveryError>> + Send {
        stream::unfold(self, |mut events| async move {
            events.next().await.map(|item| (item, events))
        })
    }
}
