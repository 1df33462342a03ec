//! A shard hosted on this node.
//!
//! `Shard` ties together one consensus engine, the state machine it drives,
//! the local leader view and the background tasks (the membership
//! reconciler). It is the unit the service layer talks to.
//!
//! ```text
//!   BrokerService ──► Shard::submit ──► ConsensusEngine ──► ShardStateMachine
//!                        │                    │
//!                        │ shard_info()       │ observe()
//!                        ▼                    ▼
//!                  leader view ◄──── MembershipReconciler
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cluster::background_tasks::{SharedTaskRegistry, TaskStatus};
use crate::cluster::config::ShardConfig;
use crate::cluster::failure_detector::{FailureDetector, FailureDetectorConfig};
use crate::cluster::metrics;
use crate::cluster::object_store::create_object_store;
use crate::cluster::raft::{
    CommandEntry, CommandResponse, ConfiguredMember, ConsensusEngine, LocalEngine,
    LocalEngineOptions, ShardStateMachine, SnapshotStore, StateMachine, WriteOperation,
};
use crate::cluster::reconciler::MembershipReconciler;
use crate::cluster::retry;
use crate::cluster::topic_storage::ObjectStoreTopicStorage;
use crate::error::{JetError, JetResult};

const RECONCILER_TASK: &str = "membership_reconciler";

/// A member of a shard as reported to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberInfo {
    pub node_id: String,
    pub address: String,
    /// Derived from the local leader view when the info is read.
    pub is_leader: bool,
}

/// Membership of one shard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShardInfo {
    pub shard_id: String,
    pub leader_id: Option<String>,
    pub members: BTreeMap<String, MemberInfo>,
}

/// Health of a shard.
#[derive(Debug, Clone)]
pub struct ShardHealth {
    pub shard_id: String,
    pub is_leader: bool,
    pub applied_index: u64,
    /// Why the shard stopped applying, if it did.
    pub halted: Option<String>,
    pub tasks: Vec<(&'static str, TaskStatus)>,
}

impl ShardHealth {
    /// A shard is healthy while it applies and its tasks run.
    pub fn is_healthy(&self) -> bool {
        self.halted.is_none() && self.tasks.iter().all(|(_, status)| status.is_healthy())
    }
}

/// Encode and submit an operation, reporting policy rejections as errors.
pub(crate) async fn submit_operation(
    engine: &dyn ConsensusEngine,
    operation: WriteOperation,
    timeout: Duration,
) -> JetResult<CommandResponse> {
    let code = operation.code();
    let entry = CommandEntry::new(operation).encode()?;
    let result = engine
        .submit(entry, timeout)
        .await
        .and_then(CommandResponse::into_result);

    let status = match &result {
        Ok(_) => "ok",
        Err(e) => e.class().as_metric_label(),
    };
    metrics::record_submission(code.as_str(), status);
    result
}

/// One shard hosted on this node.
pub struct Shard {
    shard_id: String,
    node_id: String,
    engine: Arc<dyn ConsensusEngine>,
    state_machine: Arc<ShardStateMachine>,
    leader_rx: watch::Receiver<Option<String>>,
    detector: Arc<FailureDetector>,
    tasks: SharedTaskRegistry,
    snapshot_store: Option<SnapshotStore>,
    submit_timeout: Duration,
    shutdown_timeout: Duration,
}

impl Shard {
    /// Start a shard on an engine that already drives `state_machine`.
    ///
    /// Registers on the engine's observation stream and spawns the
    /// membership reconciler.
    pub async fn start(
        config: &ShardConfig,
        engine: Arc<dyn ConsensusEngine>,
        state_machine: Arc<ShardStateMachine>,
        snapshot_store: Option<SnapshotStore>,
    ) -> Self {
        let (leader_tx, leader_rx) = watch::channel(engine.leader().map(|l| l.node_id));
        let detector = Arc::new(FailureDetector::new(FailureDetectorConfig::with_threshold(
            config.failure_detection_threshold,
        )));

        let observations = engine.observe();
        let reconciler = MembershipReconciler::new(
            config.shard_id.clone(),
            engine.clone(),
            state_machine.clone(),
            leader_tx,
            detector.clone(),
            config.submit_timeout,
        );

        let tasks = SharedTaskRegistry::new();
        tasks
            .spawn_cooperative(RECONCILER_TASK, move |shutdown| {
                reconciler.run(observations, shutdown)
            })
            .await;

        info!(
            shard_id = %config.shard_id,
            node_id = %engine.node_id(),
            "Shard started"
        );

        Self {
            shard_id: config.shard_id.clone(),
            node_id: engine.node_id().to_string(),
            engine,
            state_machine,
            leader_rx,
            detector,
            tasks,
            snapshot_store,
            submit_timeout: config.submit_timeout,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    /// Open a shard backed by an in-process [`LocalEngine`].
    ///
    /// Creates the object store from `config`, restores the last persisted
    /// snapshot (if any) and starts the shard. The engine handle is returned
    /// so the caller can drive leadership and configuration.
    pub async fn open_local(config: &ShardConfig) -> JetResult<(Self, Arc<LocalEngine>)> {
        config
            .validate()
            .map_err(|errors| JetError::Config(errors.join("; ")))?;

        let object_store = create_object_store(config)?;
        let storage = Arc::new(ObjectStoreTopicStorage::new(
            object_store.clone(),
            shard_prefix(config),
        ));
        let state_machine = Arc::new(ShardStateMachine::new(config.shard_id.clone(), storage));
        let engine = Arc::new(LocalEngine::start(
            config.shard_id.clone(),
            ConfiguredMember::new(config.node_id.clone(), config.node_address.clone()),
            state_machine.clone(),
            LocalEngineOptions {
                observation_capacity: config.observation_channel_capacity,
                proposal_queue_capacity: config.proposal_queue_capacity,
            },
        ));

        let snapshot_store =
            SnapshotStore::new(object_store, &config.storage_prefix, &config.shard_id);
        if let Some(snapshot) = snapshot_store.load().await? {
            let index = engine.install_snapshot(snapshot).await?;
            info!(shard_id = %config.shard_id, index, "Restored shard from persisted snapshot");
        }

        let shard = Self::start(config, engine.clone(), state_machine, Some(snapshot_store)).await;
        Ok((shard, engine))
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn engine(&self) -> &Arc<dyn ConsensusEngine> {
        &self.engine
    }

    pub fn state_machine(&self) -> &Arc<ShardStateMachine> {
        &self.state_machine
    }

    pub fn failure_detector(&self) -> &FailureDetector {
        &self.detector
    }

    /// Current leader according to the local leader view.
    pub fn leader_id(&self) -> Option<String> {
        self.leader_rx.borrow().clone()
    }

    /// Check if the local node leads this shard.
    pub fn is_leader(&self) -> bool {
        self.leader_rx.borrow().as_deref() == Some(self.node_id.as_str())
    }

    /// Submit an operation and wait for it to be committed and applied.
    ///
    /// Rejections (existing topic, unknown topic, ...) come back as errors.
    pub async fn submit(&self, operation: WriteOperation) -> JetResult<CommandResponse> {
        submit_operation(self.engine.as_ref(), operation, self.submit_timeout).await
    }

    /// Copy of the shard's membership with leader flags filled in.
    pub async fn shard_info(&self) -> ShardInfo {
        let leader_id = self.leader_id();
        let members = self
            .state_machine
            .members()
            .await
            .into_values()
            .map(|record| {
                let is_leader = leader_id.as_deref() == Some(record.node_id.as_str());
                (
                    record.node_id.clone(),
                    MemberInfo {
                        node_id: record.node_id,
                        address: record.address,
                        is_leader,
                    },
                )
            })
            .collect();

        ShardInfo {
            shard_id: self.shard_id.clone(),
            leader_id,
            members,
        }
    }

    /// Health of the shard and its background tasks.
    pub async fn health(&self) -> ShardHealth {
        ShardHealth {
            shard_id: self.shard_id.clone(),
            is_leader: self.is_leader(),
            applied_index: self.state_machine.last_applied_index().await,
            halted: self.state_machine.halted(),
            tasks: self.tasks.health_check().await,
        }
    }

    /// Write the current state to the snapshot store.
    ///
    /// Returns the index the snapshot covers.
    pub async fn persist_snapshot(&self) -> JetResult<u64> {
        let store = self.snapshot_store.as_ref().ok_or_else(|| {
            JetError::Config(format!("shard '{}' has no snapshot store", self.shard_id))
        })?;

        let (index, snapshot) = self.state_machine.snapshot_with_index().await?;
        retry::with_storage_policy(|| store.persist(index, snapshot.clone())).await?;
        Ok(index)
    }

    /// Stop the reconciler, then the engine.
    ///
    /// The reconciler exits and drops its observer registration before the
    /// engine stops; submissions still in flight fail with `Shutdown`.
    pub async fn shutdown(&self) -> JetResult<()> {
        info!(shard_id = %self.shard_id, "Shutting down shard");
        self.tasks
            .shutdown_all_with_timeout(self.shutdown_timeout)
            .await;

        if let Err(e) = self.engine.shutdown().await {
            warn!(shard_id = %self.shard_id, error = %e, "Engine shutdown failed");
            return Err(e);
        }
        metrics::set_leader(&self.shard_id, false);
        Ok(())
    }
}

/// Object store prefix of a shard's topic storage.
fn shard_prefix(config: &ShardConfig) -> String {
    if config.storage_prefix.is_empty() {
        format!("shard-{}", config.shard_id)
    } else {
        format!("{}/shard-{}", config.storage_prefix, config.shard_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::raft::KeyValue;

    fn config(node_id: &str) -> ShardConfig {
        ShardConfig {
            node_id: node_id.to_string(),
            node_address: format!("{}.local:7000", node_id),
            shard_id: "s0".to_string(),
            ..Default::default()
        }
    }

    async fn wait_for<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_leader_backfills_itself() {
        let (shard, engine) = Shard::open_local(&config("n1")).await.unwrap();
        engine.become_leader();

        wait_for(|| async { shard.shard_info().await.members.contains_key("n1") }).await;

        let info = shard.shard_info().await;
        assert_eq!(info.leader_id.as_deref(), Some("n1"));
        assert!(info.members["n1"].is_leader);
        assert_eq!(info.members["n1"].address, "n1.local:7000");
        assert!(shard.is_leader());

        shard.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_follower_rejects_submit_with_hint() {
        let (shard, engine) = Shard::open_local(&config("n1")).await.unwrap();
        engine.step_down(Some(ConfiguredMember::new("n2", "n2.local:7000")));

        let err = shard
            .submit(WriteOperation::CreateTopic {
                topic: "orders".to_string(),
                partitions: 3,
            })
            .await
            .unwrap_err();
        assert!(err.is_retriable());
        assert_eq!(err.leader_hint(), Some("n2"));

        shard.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_reports_rejections() {
        let (shard, engine) = Shard::open_local(&config("n1")).await.unwrap();
        engine.become_leader();

        let err = shard
            .submit(WriteOperation::Publish {
                topic: "missing".to_string(),
                messages: vec![KeyValue::new("k", "v")],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, JetError::UnknownTopic(_)));

        shard.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_health_reports_reconciler() {
        let (shard, _engine) = Shard::open_local(&config("n1")).await.unwrap();

        let health = shard.health().await;
        assert!(health.is_healthy());
        assert_eq!(health.tasks, vec![(RECONCILER_TASK, TaskStatus::Running)]);

        shard.shutdown().await.unwrap();
        assert!(shard.health().await.tasks.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = ShardConfig {
            data_path: Some(dir.path().to_path_buf()),
            ..config("n1")
        };

        {
            let (shard, engine) = Shard::open_local(&config).await.unwrap();
            engine.become_leader();
            shard
                .submit(WriteOperation::CreateTopic {
                    topic: "orders".to_string(),
                    partitions: 2,
                })
                .await
                .unwrap();
            assert!(shard.persist_snapshot().await.unwrap() >= 1);
            shard.shutdown().await.unwrap();
        }

        let (shard, _engine) = Shard::open_local(&config).await.unwrap();
        let topic = shard.state_machine().topic("orders").await.unwrap();
        assert_eq!(topic.partition_count(), 2);
        shard.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_local_rejects_invalid_config() {
        let config = ShardConfig {
            node_id: String::new(),
            ..config("n1")
        };
        assert!(matches!(
            Shard::open_local(&config).await,
            Err(JetError::Config(_))
        ));
    }
}
