//! End-to-end pipeline tests
//!
//! membership changes -> instance events -> stream actions -> endpoint registry

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{manager, tree_with};
use memberwatch::action::{ActionStream, EndpointRegistry, InvalidUriPolicy, UrlTemplate};
use memberwatch::coordination::{CoordinationClient, DirectoryCoordinator};
use memberwatch::discovery::{DiscoveryManager, DiscoveryOptions};
use memberwatch::models::ConnectionState;
use memberwatch::{ActionType, StreamAction};
use tokio::time::timeout;

fn template() -> Arc<UrlTemplate> {
    Arc::new(UrlTemplate::new("http://{HOSTNAME}/turbine.stream").unwrap())
}

async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_registry_follows_membership() {
    let zk = tree_with("/discovery/stream", &["10.0.0.1:8080", "bad host:1"]);
    let manager = manager(&zk);
    let events = manager.start("/discovery/stream").await.unwrap();
    let actions = ActionStream::new(events, template(), InvalidUriPolicy::Skip);

    let registry = EndpointRegistry::new();
    let follower = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.follow(actions).await })
    };

    let first = "http://10.0.0.1:8080/turbine.stream";
    let second = "http://10.0.0.2:8080/turbine.stream";

    let reg = &registry;
    wait_for(move || async move { reg.contains(first).await }).await;

    zk.create("/discovery/stream/10.0.0.2:8080").unwrap();
    zk.delete("/discovery/stream/10.0.0.1:8080").unwrap();
    wait_for(move || async move {
        reg.contains(second).await && !reg.contains(first).await
    })
    .await;

    // the invalid member never reached the registry
    assert_eq!(registry.len().await, 1);

    manager.shutdown().await;
    let applied = timeout(Duration::from_secs(2), follower)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(applied, 3);
}

#[tokio::test]
async fn test_registry_changes_are_broadcast() {
    let zk = tree_with("/service", &[]);
    let manager = manager(&zk);
    let events = manager.start("/service").await.unwrap();
    let actions = ActionStream::new(events, template(), InvalidUriPolicy::Skip);

    let registry = EndpointRegistry::new();
    let mut changes = registry.subscribe();
    tokio::spawn({
        let registry = registry.clone();
        async move { registry.follow(actions).await }
    });

    zk.create("/service/a:1").unwrap();
    let change = timeout(Duration::from_secs(2), changes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        change,
        StreamAction::new(ActionType::Add, "http://a:1/turbine.stream")
    );

    zk.delete("/service/a:1").unwrap();
    let change = timeout(Duration::from_secs(2), changes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(change.action_type, ActionType::Remove);
}

#[tokio::test]
async fn test_directory_backend_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let client = DirectoryCoordinator::connect_with_interval(dir.path(), Duration::from_millis(20))
        .await
        .unwrap();
    std::fs::create_dir_all(dir.path().join("services/stream")).unwrap();
    std::fs::write(dir.path().join("services/stream/10.0.0.1:8080"), b"").unwrap();

    let manager = DiscoveryManager::new(Arc::new(client), DiscoveryOptions::default());
    let mut events = manager.start("/services/stream").await.unwrap();

    let first = timeout(Duration::from_secs(2), events.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(first.to_string(), "UP 10.0.0.1:8080");

    // give the poller its baseline scan
    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::remove_file(dir.path().join("services/stream/10.0.0.1:8080")).unwrap();

    let gone = timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(gone.to_string(), "DOWN 10.0.0.1:8080");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_directory_stream_survives_root_outage() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("zk");
    let staging = dir.path().join("staging");
    let client = Arc::new(
        DirectoryCoordinator::connect_with_interval(&root, Duration::from_millis(20))
            .await
            .unwrap(),
    );
    std::fs::create_dir_all(root.join("service")).unwrap();
    std::fs::write(root.join("service/a:1"), b"").unwrap();

    let manager = DiscoveryManager::new(client.clone(), DiscoveryOptions::default());
    let mut events = manager.start("/service").await.unwrap();
    let first = timeout(Duration::from_secs(2), events.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(first.to_string(), "UP a:1");

    std::fs::rename(&root, dir.path().join("gone")).unwrap();
    let session = &client;
    wait_for(move || async move { session.state() == ConnectionState::Lost }).await;

    // the tree comes back in one step with a new member
    std::fs::create_dir_all(staging.join("service")).unwrap();
    std::fs::write(staging.join("service/a:1"), b"").unwrap();
    std::fs::write(staging.join("service/b:2"), b"").unwrap();
    std::fs::rename(&staging, &root).unwrap();

    loop {
        let event = timeout(Duration::from_secs(5), events.next())
            .await
            .expect("no resync after the root returned")
            .expect("stream ended")
            .expect("stream failed during the outage");
        if event.to_string() == "UP b:2" {
            break;
        }
    }

    let mut members: Vec<String> = manager
        .members("/service")
        .await
        .unwrap()
        .iter()
        .map(|member| member.address().to_string())
        .collect();
    members.sort();
    assert_eq!(members, vec!["a:1", "b:2"]);

    manager.shutdown().await;
}
