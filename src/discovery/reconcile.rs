//! Reconciliation loop
//!
//! Child notifications are lossy and may be coalesced, so they only ever
//! trigger a fetch. Membership is computed by diffing consecutive full child
//! listings:
//!
//! ```text
//! added   = S_cur \ S_prev   -> UP,   in fetch order
//! removed = S_prev \ S_cur   -> DOWN, in previous-snapshot order
//! ```
//!
//! The first cycle diffs against an empty snapshot, so every member present at
//! start is announced as UP.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::watch;

use crate::coordination::SharedClient;
use crate::metrics;
use crate::models::Instance;

use super::coalescer::WakeReceiver;
use super::stream::EventPublisher;
use super::watcher::ReconnectMarker;
use super::DiscoveryError;

/// Baseline handling after the session is re-established
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResyncPolicy {
    /// Keep the last snapshot; only real changes are emitted
    #[default]
    PreserveBaseline,
    /// Forget the last snapshot; every current member is re-announced as UP
    ResetBaseline,
}

impl std::str::FromStr for ResyncPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "preserve_baseline" | "preserve" => Ok(Self::PreserveBaseline),
            "reset_baseline" | "reset" => Ok(Self::ResetBaseline),
            other => Err(format!("unknown resync policy '{other}'")),
        }
    }
}

// ============================================================================
// Snapshot diff
// ============================================================================

/// Members of a path from one child listing, deduplicated, in listing order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    members: Vec<Instance>,
}

impl Snapshot {
    /// Build from raw child names; duplicates and empty names are dropped
    pub fn from_children<I, S>(children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let members = children
            .into_iter()
            .map(Into::into)
            .filter(|name: &String| !name.is_empty())
            .filter(|name| seen.insert(name.clone()))
            .map(Instance::up)
            .collect();

        Self { members }
    }

    pub fn members(&self) -> &[Instance] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Events that turn `previous` into `current`
///
/// Additions come first in `current` order as UP, then removals in
/// `previous` order as DOWN. Identity is the address, so members present in
/// both produce nothing regardless of status.
pub fn diff(previous: &[Instance], current: &[Instance]) -> Vec<Instance> {
    let before: HashSet<&Instance> = previous.iter().collect();
    let after: HashSet<&Instance> = current.iter().collect();

    let mut emitted: HashSet<&str> = HashSet::new();
    let mut events = Vec::new();

    for instance in current {
        if !before.contains(instance) && emitted.insert(instance.address()) {
            events.push(Instance::up(instance.address()));
        }
    }
    for instance in previous {
        if !after.contains(instance) && emitted.insert(instance.address()) {
            events.push(instance.to_down());
        }
    }

    events
}

/// Two-slot sliding window over consecutive snapshots
#[derive(Debug, Default)]
pub struct SnapshotWindow {
    previous: Snapshot,
}

impl SnapshotWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff `current` against the previous snapshot and slide the window
    pub fn advance(&mut self, current: Snapshot) -> Vec<Instance> {
        let events = diff(self.previous.members(), current.members());
        self.previous = current;
        events
    }

    /// Forget the previous snapshot so the next cycle starts a new epoch
    pub fn reset(&mut self) {
        self.previous = Snapshot::default();
    }

    pub fn current(&self) -> &Snapshot {
        &self.previous
    }
}

// ============================================================================
// Loop
// ============================================================================

/// Per-path reconciliation task state
pub(crate) struct ReconcileLoop {
    pub(crate) client: SharedClient,
    pub(crate) path: String,
    pub(crate) wakes: WakeReceiver,
    pub(crate) reconnects: ReconnectMarker,
    pub(crate) policy: ResyncPolicy,
    pub(crate) wake_timeout: Duration,
    pub(crate) publisher: EventPublisher,
    pub(crate) members: watch::Sender<Vec<Instance>>,
    pub(crate) shutdown: watch::Receiver<bool>,
}

impl ReconcileLoop {
    /// Run until shutdown or the first fetch error
    pub(crate) async fn run(mut self) {
        let mut window = SnapshotWindow::new();
        let mut cycle: u64 = 0;

        tracing::info!(path = %self.path, policy = ?self.policy, "Reconciliation loop started");

        loop {
            if self.reconnects.take() && self.policy == ResyncPolicy::ResetBaseline {
                tracing::info!(path = %self.path, "Session re-established, resetting baseline");
                window.reset();
            }

            let listing = {
                let _timer = metrics::start_fetch_timer(&self.path);
                tokio::select! {
                    result = self.client.list_children(&self.path) => result,
                    _ = self.shutdown.changed() => break,
                }
            };

            let children = match listing {
                Ok(children) => children,
                Err(source) => {
                    metrics::record_fetch_error(&self.path);
                    tracing::error!(path = %self.path, error = %source, "Failed to fetch children, stopping");
                    self.publisher.fail(DiscoveryError::Fetch {
                        path: self.path.clone(),
                        source,
                    });
                    break;
                }
            };

            cycle += 1;
            self.apply(&mut window, Snapshot::from_children(children), cycle);

            tokio::select! {
                wake = self.wakes.wait(self.wake_timeout) => {
                    tracing::debug!(path = %self.path, kind = wake.kind(), hint = %wake.hint(), "Woken");
                }
                _ = self.shutdown.changed() => break,
            }
        }

        tracing::info!(path = %self.path, cycles = cycle, "Reconciliation loop stopped");
    }

    fn apply(&self, window: &mut SnapshotWindow, snapshot: Snapshot, cycle: u64) {
        let members = snapshot.members().to_vec();
        let events = window.advance(snapshot);

        metrics::record_cycle(&self.path);
        metrics::set_members(&self.path, members.len());
        self.members.send_replace(members);

        if events.is_empty() {
            tracing::debug!(path = %self.path, cycle, "No membership change");
            return;
        }

        let added = events.iter().filter(|event| event.is_up()).count();
        let removed = events.len() - added;
        tracing::info!(path = %self.path, cycle, added, removed, members = window.current().len(), "Membership changed");

        for event in events {
            metrics::record_instance_event(&self.path, event.status());
            tracing::debug!(path = %self.path, instance = %event, "Instance event");
            self.publisher.publish(event);
        }
    }
}
