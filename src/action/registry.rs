//! Endpoint registry
//!
//! Set of stream endpoints currently monitored. Actions are applied
//! idempotently: adding a known URI or removing an unknown one changes
//! nothing, which absorbs the re-announcements at every epoch start.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::metrics;
use crate::models::{ActionType, StreamAction};

use super::ActionStream;

/// Capacity of the applied-action broadcast
const CHANGE_CAPACITY: usize = 256;

// ============================================================================
// Endpoint Entry
// ============================================================================

/// One monitored endpoint
#[derive(Debug, Clone, Serialize)]
pub struct EndpointEntry {
    pub uri: String,

    /// When the endpoint was added
    pub added_at: DateTime<Utc>,
}

// ============================================================================
// Endpoint Registry
// ============================================================================

/// Monitored stream endpoints
#[derive(Clone)]
pub struct EndpointRegistry {
    endpoints: Arc<RwLock<HashMap<String, EndpointEntry>>>,
    changes: broadcast::Sender<StreamAction>,
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointRegistry {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            endpoints: Arc::new(RwLock::new(HashMap::new())),
            changes,
        }
    }

    /// Apply one action, returns whether the endpoint set changed
    ///
    /// Changing actions are re-broadcast to subscribers.
    pub async fn apply(&self, action: &StreamAction) -> bool {
        let key = action.uri.clone();
        let changed = {
            let mut endpoints = self.endpoints.write().await;
            let changed = match action.action_type {
                ActionType::Add => {
                    if endpoints.contains_key(&key) {
                        false
                    } else {
                        endpoints.insert(
                            key,
                            EndpointEntry {
                                uri: action.uri.clone(),
                                added_at: Utc::now(),
                            },
                        );
                        true
                    }
                }
                ActionType::Remove => endpoints.remove(&key).is_some(),
            };
            metrics::set_endpoints(endpoints.len());
            changed
        };

        if changed {
            tracing::info!(action = %action, "Endpoint set updated");
            let _ = self.changes.send(action.clone());
        } else {
            tracing::debug!(action = %action, "Action did not change endpoint set");
        }
        changed
    }

    /// Monitored endpoints ordered by URI
    pub async fn endpoints(&self) -> Vec<EndpointEntry> {
        let mut entries: Vec<EndpointEntry> = self.endpoints.read().await.values().cloned().collect();
        entries.sort_by(|a, b| a.uri.cmp(&b.uri));
        entries
    }

    pub async fn contains(&self, uri: &str) -> bool {
        self.endpoints.read().await.contains_key(uri)
    }

    pub async fn len(&self) -> usize {
        self.endpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.endpoints.read().await.is_empty()
    }

    /// Receive every action that changes the endpoint set from now on
    pub fn subscribe(&self) -> broadcast::Receiver<StreamAction> {
        self.changes.subscribe()
    }

    /// Drain `actions` into the registry until the stream ends
    ///
    /// Returns the number of actions that changed the endpoint set.
    pub async fn follow(&self, mut actions: ActionStream) -> usize {
        let mut applied = 0;
        while let Some(item) = actions.next().await {
            match item {
                Ok(action) => {
                    if self.apply(&action).await {
                        applied += 1;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Action stream failed");
                }
            }
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(action_type: ActionType, uri: &str) -> StreamAction {
        StreamAction::new(action_type, uri)
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let registry = EndpointRegistry::new();
        let add = action(ActionType::Add, "http://a:1/stream");

        assert!(registry.apply(&add).await);
        assert!(!registry.apply(&add).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_unknown_is_noop() {
        let registry = EndpointRegistry::new();
        assert!(!registry.apply(&action(ActionType::Remove, "http://a:1/stream")).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_add_then_remove() {
        let registry = EndpointRegistry::new();
        registry.apply(&action(ActionType::Add, "http://b:2/stream")).await;
        registry.apply(&action(ActionType::Add, "http://a:1/stream")).await;
        registry.apply(&action(ActionType::Remove, "http://b:2/stream")).await;

        let endpoints = registry.endpoints().await;
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].uri.as_str(), "http://a:1/stream");
        assert!(registry.contains("http://a:1/stream").await);
    }

    #[tokio::test]
    async fn test_only_changes_are_broadcast() {
        let registry = EndpointRegistry::new();
        let mut changes = registry.subscribe();
        let add = action(ActionType::Add, "http://a:1/stream");

        registry.apply(&add).await;
        registry.apply(&add).await;
        registry.apply(&action(ActionType::Remove, "http://a:1/stream")).await;

        assert_eq!(changes.recv().await.unwrap(), add);
        assert_eq!(changes.recv().await.unwrap().action_type, ActionType::Remove);
        assert!(changes.try_recv().is_err());
    }
}
