//! End-to-end tests for shards running on the in-process consensus engine.
//!
//! Covers membership reconciliation, eviction of unreachable peers,
//! shutdown, and the broker service read and write surface.

use std::sync::Arc;
use std::time::Duration;

use jetlog::cluster::raft::{
    CommandEntry, ConfiguredMember, ConsensusEngine, KeyValue, LocalEngine, OperationCode,
    WriteOperation,
};
use jetlog::cluster::{BrokerService, ClusterDirectory, EvictionState, Shard, ShardConfig};
use jetlog::error::{ErrorClass, JetError};
use tokio::time::Instant;

fn config(node_id: &str, shard_id: &str) -> ShardConfig {
    ShardConfig {
        node_id: node_id.to_string(),
        node_address: format!("{}.local:7000", node_id),
        shard_id: shard_id.to_string(),
        ..Default::default()
    }
}

async fn wait_for<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..400 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

async fn leader_shard(node_id: &str, shard_id: &str) -> (Arc<Shard>, Arc<LocalEngine>) {
    let (shard, engine) = Shard::open_local(&config(node_id, shard_id)).await.unwrap();
    engine.become_leader();
    let shard = Arc::new(shard);
    let watched = shard.clone();
    let node = node_id.to_string();
    wait_for(move || {
        let shard = watched.clone();
        let node = node.clone();
        async move { shard.state_machine().contains_member(&node).await }
    })
    .await;
    (shard, engine)
}

fn committed(engine: &LocalEngine, code: OperationCode) -> Vec<WriteOperation> {
    engine
        .log_entries()
        .iter()
        .filter_map(|(index, data)| CommandEntry::decode(*index, data).ok())
        .filter(|entry| entry.code == code)
        .map(|entry| entry.operation)
        .collect()
}

// ============================================================================
// Membership reconciliation
// ============================================================================

#[tokio::test]
async fn test_joined_voters_become_members() {
    let (shard, engine) = leader_shard("n1", "s0").await;

    engine.add_voter(ConfiguredMember::new("n2", "n2.local:7000"));
    engine.add_voter(ConfiguredMember::new("n3", "n3.local:7000"));
    // Re-adding an existing voter is not a new join.
    engine.add_voter(ConfiguredMember::new("n2", "n2.local:7000"));

    wait_for(|| async { shard.shard_info().await.members.len() == 3 }).await;

    let info = shard.shard_info().await;
    assert_eq!(info.leader_id.as_deref(), Some("n1"));
    assert_eq!(info.members["n3"].address, "n3.local:7000");
    assert!(!info.members["n2"].is_leader);
    assert_eq!(committed(&engine, OperationCode::AddMember).len(), 3);

    shard.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_readdressed_voter_is_updated() {
    let (shard, engine) = leader_shard("n1", "s0").await;

    engine.add_voter(ConfiguredMember::new("n2", "n2.local:7000"));
    wait_for(|| async { shard.state_machine().contains_member("n2").await }).await;

    engine.add_voter(ConfiguredMember::new("n2", "n2.other:7001"));
    wait_for(|| async { shard.shard_info().await.members["n2"].address == "n2.other:7001" })
        .await;

    shard.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_leader_change_updates_read_surface() {
    let (shard, engine) = leader_shard("n1", "s0").await;
    engine.add_voter(ConfiguredMember::new("n2", "n2.local:7000"));
    wait_for(|| async { shard.state_machine().contains_member("n2").await }).await;

    engine.step_down(Some(ConfiguredMember::new("n2", "n2.local:7000")));
    wait_for(|| async { shard.leader_id().as_deref() == Some("n2") }).await;

    let info = shard.shard_info().await;
    assert!(info.members["n2"].is_leader);
    assert!(!info.members["n1"].is_leader);
    assert!(!shard.is_leader());

    let err = shard
        .submit(WriteOperation::CreateTopic {
            topic: "orders".to_string(),
            partitions: 1,
        })
        .await
        .unwrap_err();
    assert!(err.is_not_leader());
    assert_eq!(err.leader_hint(), Some("n2"));

    shard.shutdown().await.unwrap();
}

// ============================================================================
// Failure detection
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_unreachable_peer_is_evicted_exactly_once() {
    let (shard, engine) = leader_shard("n1", "s0").await;
    engine.add_voter(ConfiguredMember::new("n2", "n2.local:7000"));
    engine.add_voter(ConfiguredMember::new("n3", "n3.local:7000"));
    wait_for(|| async { shard.shard_info().await.members.len() == 3 }).await;

    let last_contact = Instant::now();
    tokio::time::advance(Duration::from_secs(11)).await;
    engine.report_failed_heartbeat("n3", last_contact);
    engine.report_failed_heartbeat("n3", last_contact);

    wait_for(|| async { !shard.state_machine().contains_member("n3").await }).await;

    let configuration = engine.current_configuration().await.unwrap();
    assert!(configuration.get("n3").is_none());
    assert!(configuration.get("n2").is_some());

    assert_eq!(
        committed(&engine, OperationCode::RemoveMember),
        vec![WriteOperation::RemoveMember {
            node_id: "n3".to_string()
        }]
    );
    assert_eq!(
        shard.failure_detector().eviction_state("n3"),
        Some(EvictionState::Completed)
    );

    let info = shard.shard_info().await;
    assert_eq!(
        info.members.keys().cloned().collect::<Vec<_>>(),
        vec!["n1", "n2"]
    );

    shard.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_recently_reached_peer_is_kept() {
    let (shard, engine) = leader_shard("n1", "s0").await;
    engine.add_voter(ConfiguredMember::new("n2", "n2.local:7000"));
    wait_for(|| async { shard.state_machine().contains_member("n2").await }).await;

    let last_contact = Instant::now();
    tokio::time::advance(Duration::from_secs(3)).await;
    engine.report_failed_heartbeat("n2", last_contact);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(shard.state_machine().contains_member("n2").await);
    assert!(committed(&engine, OperationCode::RemoveMember).is_empty());
    assert_eq!(shard.failure_detector().eviction_state("n2"), None);

    shard.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_follower_never_evicts() {
    let (shard, engine) = Shard::open_local(&config("n1", "s0")).await.unwrap();
    engine.add_voter(ConfiguredMember::new("n2", "n2.local:7000"));
    engine.step_down(Some(ConfiguredMember::new("n2", "n2.local:7000")));

    let last_contact = Instant::now();
    tokio::time::advance(Duration::from_secs(30)).await;
    engine.report_failed_heartbeat("n2", last_contact);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(engine.current_configuration().await.unwrap().get("n2").is_some());
    assert!(engine.log_entries().is_empty());

    shard.shutdown().await.unwrap();
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_releases_observer_and_rejects_work() {
    let (shard, engine) = leader_shard("n1", "s0").await;
    assert_eq!(engine.observer_count(), 1);

    shard.shutdown().await.unwrap();

    assert_eq!(engine.observer_count(), 0);
    assert!(shard.health().await.tasks.is_empty());

    let err = shard
        .submit(WriteOperation::Publish {
            topic: "orders".to_string(),
            messages: vec![KeyValue::new("k", "v")],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, JetError::Shutdown));
    assert_eq!(err.class(), ErrorClass::Shutdown);

    // A second shutdown is harmless.
    shard.shutdown().await.unwrap();
}

// ============================================================================
// Broker service
// ============================================================================

#[tokio::test]
async fn test_publish_through_service() {
    let (shard, _engine) = leader_shard("n1", "s0").await;
    let directory = Arc::new(ClusterDirectory::new());
    directory.add_local(shard.clone());
    let service = BrokerService::new(shard.clone(), directory);

    let created = service.create_topic("orders", 4).await.unwrap();
    assert_eq!(created.storage_nodes, vec![Some("n1".to_string()); 4]);

    let first = service
        .publish_messages("orders", vec![KeyValue::new("customer-1", "created")])
        .await
        .unwrap();
    let second = service
        .publish_messages("orders", vec![KeyValue::new("customer-1", "paid")])
        .await
        .unwrap();
    assert_eq!(first[0].partition, second[0].partition);
    assert_eq!(second[0].offset, first[0].offset + 1);
    assert_eq!(&second[0].value[..], b"paid");

    let err = service
        .publish_messages("missing", vec![KeyValue::new("k", "v")])
        .await
        .unwrap_err();
    assert!(matches!(err, JetError::UnknownTopic(_)));

    shard.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cluster_info_lists_every_shard() {
    let (s0, _e0) = leader_shard("n1", "s0").await;
    let (s1, _e1) = Shard::open_local(&config("n1", "s1")).await.unwrap();
    let s1 = Arc::new(s1);

    let directory = Arc::new(ClusterDirectory::new());
    directory.add_local(s0.clone());
    directory.add_local(s1.clone());
    let service = BrokerService::new(s0.clone(), directory);

    let cluster = service.get_cluster_info().await;
    assert_eq!(cluster.keys().cloned().collect::<Vec<_>>(), vec!["s0", "s1"]);
    assert_eq!(cluster["s0"].leader_id.as_deref(), Some("n1"));
    assert_eq!(cluster["s1"].leader_id, None);
    assert_eq!(service.get_shard_info().await, cluster["s0"]);

    s0.shutdown().await.unwrap();
    s1.shutdown().await.unwrap();
}
