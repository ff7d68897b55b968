//! In-memory coordination backend
//!
//! Holds a tree of paths in process memory and delivers child and connection
//! callbacks synchronously on the caller of the mutating method. Besides the
//! [`CoordinationClient`] operations it exposes node creation and deletion,
//! connection-state injection and list-failure injection.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::{ChildEvent, ChildEventKind, ConnectionState};

use super::{
    join_path, parent_path, ChildListener, CoordinationClient, CoordinationError,
    CoordinationResult, ConnectionListener, ListenerId, WatchId,
};

#[derive(Default)]
struct MemoryState {
    /// Path to its children, in creation order
    nodes: BTreeMap<String, Vec<String>>,
    watches: HashMap<WatchId, (String, ChildListener)>,
    connection_listeners: HashMap<ListenerId, ConnectionListener>,
    state: Option<ConnectionState>,
    pending_list_failure: Option<CoordinationError>,
    list_calls: usize,
    released: Vec<String>,
}

/// In-memory coordination tree
#[derive(Clone)]
pub struct MemoryCoordinator {
    inner: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCoordinator {
    /// Create an empty, connected tree containing only `/`
    pub fn new() -> Self {
        let mut state = MemoryState::default();
        state.nodes.insert("/".to_string(), Vec::new());
        state.state = Some(ConnectionState::Connected);

        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create a node, creating missing parents
    ///
    /// Returns [`CoordinationError::NodeExists`] if the node is already present.
    pub fn create(&self, path: &str) -> CoordinationResult<()> {
        let events = {
            let mut state = self.lock();
            if state.nodes.contains_key(path) {
                return Err(CoordinationError::NodeExists(path.to_string()));
            }
            let mut created = Vec::new();
            Self::create_recursive(&mut state, path, &mut created);
            Self::collect_events(&state, &created, ChildEventKind::Added)
        };

        Self::dispatch(events);
        Ok(())
    }

    fn create_recursive(state: &mut MemoryState, path: &str, created: &mut Vec<String>) {
        if state.nodes.contains_key(path) {
            return;
        }
        if let Some(parent) = parent_path(path) {
            Self::create_recursive(state, parent, created);
            let name = path.rsplit('/').next().unwrap_or(path).to_string();
            if let Some(children) = state.nodes.get_mut(parent) {
                children.push(name);
            }
        }
        state.nodes.insert(path.to_string(), Vec::new());
        created.push(path.to_string());
    }

    /// Delete a node and its subtree
    pub fn delete(&self, path: &str) -> CoordinationResult<()> {
        let events = {
            let mut state = self.lock();
            if !state.nodes.contains_key(path) {
                return Err(CoordinationError::NoNode(path.to_string()));
            }

            let prefix = join_path(path, "");
            state
                .nodes
                .retain(|candidate, _| candidate != path && !candidate.starts_with(&prefix));

            if let Some(parent) = parent_path(path) {
                let name = path.rsplit('/').next().unwrap_or(path);
                if let Some(children) = state.nodes.get_mut(parent) {
                    children.retain(|child| child != name);
                }
            }

            Self::collect_events(&state, &[path.to_string()], ChildEventKind::Removed)
        };

        Self::dispatch(events);
        Ok(())
    }

    /// Transition the session and notify connection listeners
    pub fn set_state(&self, new_state: ConnectionState) {
        let listeners: Vec<ConnectionListener> = {
            let mut state = self.lock();
            state.state = Some(new_state);
            state.connection_listeners.values().cloned().collect()
        };

        for listener in listeners {
            listener(new_state);
        }
    }

    /// Make the next `list_children` call fail with `error`
    pub fn fail_next_list(&self, error: CoordinationError) {
        self.lock().pending_list_failure = Some(error);
    }

    /// Number of `list_children` calls served so far
    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    /// Number of live child-watch registrations for `path`
    pub fn watch_count(&self, path: &str) -> usize {
        self.lock()
            .watches
            .values()
            .filter(|(watched, _)| watched == path)
            .count()
    }

    /// Number of registered connection listeners
    pub fn connection_listener_count(&self) -> usize {
        self.lock().connection_listeners.len()
    }

    /// Paths passed to `release`, in call order
    pub fn released_paths(&self) -> Vec<String> {
        self.lock().released.clone()
    }

    /// Pair each changed node with the listeners watching its parent
    fn collect_events(
        state: &MemoryState,
        paths: &[String],
        kind: ChildEventKind,
    ) -> Vec<(ChildListener, ChildEvent)> {
        let mut events = Vec::new();
        for path in paths {
            let Some(parent) = parent_path(path) else {
                continue;
            };
            for (watched, listener) in state.watches.values() {
                if watched == parent {
                    events.push((listener.clone(), ChildEvent::new(kind, path.clone())));
                }
            }
        }
        events
    }

    fn dispatch(events: Vec<(ChildListener, ChildEvent)>) {
        for (listener, event) in events {
            listener(event);
        }
    }
}

#[async_trait]
impl CoordinationClient for MemoryCoordinator {
    fn name(&self) -> &str {
        "memory"
    }

    fn state(&self) -> ConnectionState {
        self.lock().state.unwrap_or(ConnectionState::Connected)
    }

    async fn list_children(&self, path: &str) -> CoordinationResult<Vec<String>> {
        let mut state = self.lock();
        state.list_calls += 1;

        if let Some(error) = state.pending_list_failure.take() {
            return Err(error);
        }

        state
            .nodes
            .get(path)
            .cloned()
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))
    }

    async fn ensure_path(&self, path: &str) -> CoordinationResult<()> {
        match self.create(path) {
            Ok(()) | Err(CoordinationError::NodeExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn watch_children(
        &self,
        path: &str,
        listener: ChildListener,
    ) -> CoordinationResult<WatchId> {
        let id = WatchId::new();
        self.lock().watches.insert(id, (path.to_string(), listener));
        Ok(id)
    }

    fn unwatch(&self, id: WatchId) {
        self.lock().watches.remove(&id);
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
        state.watches.retain(|_, (watched, _)| watched != path);
        state.released.push(path.to_string());
    }
}
