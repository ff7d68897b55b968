//! Common test utilities

use std::sync::Arc;
use std::time::Duration;

use memberwatch::coordination::MemoryCoordinator;
use memberwatch::discovery::{DiscoveryManager, DiscoveryOptions, InstanceEvents};
use memberwatch::Instance;

/// How long a test waits for an event before failing
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Manager over `zk` with default options
pub fn manager(zk: &MemoryCoordinator) -> DiscoveryManager {
    manager_with(zk, DiscoveryOptions::default())
}

pub fn manager_with(zk: &MemoryCoordinator, options: DiscoveryOptions) -> DiscoveryManager {
    DiscoveryManager::new(Arc::new(zk.clone()), options)
}

/// Memory tree with `members` registered under `path`
pub fn tree_with(path: &str, members: &[&str]) -> MemoryCoordinator {
    let zk = MemoryCoordinator::new();
    zk.create(path).unwrap();
    for member in members {
        zk.create(&format!("{path}/{member}")).unwrap();
    }
    zk
}

/// Next event, panicking on timeout, end of stream or error
pub async fn next_event(events: &mut InstanceEvents) -> Instance {
    tokio::time::timeout(EVENT_TIMEOUT, events.next())
        .await
        .expect("timed out waiting for event")
        .expect("stream ended")
        .expect("stream failed")
}

/// Next `count` events rendered as `UP addr` / `DOWN addr`
#[allow(dead_code)]
pub async fn next_events(events: &mut InstanceEvents, count: usize) -> Vec<String> {
    let mut rendered = Vec::with_capacity(count);
    for _ in 0..count {
        rendered.push(next_event(events).await.to_string());
    }
    rendered
}

/// Assert nothing arrives within `window`
#[allow(dead_code)]
pub async fn assert_quiet(events: &mut InstanceEvents, window: Duration) {
    if let Ok(item) = tokio::time::timeout(window, events.next()).await {
        panic!("expected no event, got {item:?}");
    }
}
