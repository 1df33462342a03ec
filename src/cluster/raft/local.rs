//! In-process consensus engine.
//!
//! `LocalEngine` is a single-writer replicated log for one node: proposals and
//! snapshot installs are queued on one `mpsc` channel, a single apply task
//! assigns strictly increasing indexes and drives the [`StateMachine`], and
//! each caller is answered through a `oneshot`. It keeps a voter configuration and publishes
//! observations exactly like a networked engine would, which makes it the
//! engine for standalone nodes and for tests of everything above the engine
//! boundary.
//!
//! Leadership is operator-controlled through [`LocalEngine::become_leader`]
//! and [`LocalEngine::step_down`]; configuration changes take effect
//! immediately.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_OBSERVATION_CHANNEL_CAPACITY, DEFAULT_PROPOSAL_QUEUE_CAPACITY};
use crate::error::{JetError, JetResult};

use super::commands::CommandResponse;
use super::engine::{
    Configuration, ConfiguredMember, ConsensusEngine, Observation, ObserverRegistration,
    RaftRole, StateMachine,
};

/// Tuning knobs for a [`LocalEngine`].
#[derive(Debug, Clone)]
pub struct LocalEngineOptions {
    /// Capacity of the observation broadcast channel.
    pub observation_capacity: usize,
    /// Maximum number of proposals waiting for the apply task.
    pub proposal_queue_capacity: usize,
}

impl Default for LocalEngineOptions {
    fn default() -> Self {
        Self {
            observation_capacity: DEFAULT_OBSERVATION_CHANNEL_CAPACITY,
            proposal_queue_capacity: DEFAULT_PROPOSAL_QUEUE_CAPACITY,
        }
    }
}

/// Work for the apply task.
enum Work {
    Propose {
        data: Bytes,
        reply: oneshot::Sender<JetResult<CommandResponse>>,
    },
    Install {
        snapshot: Bytes,
        reply: oneshot::Sender<JetResult<u64>>,
    },
}

impl Work {
    fn reject(self, err: JetError) {
        match self {
            Work::Propose { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Work::Install { reply, .. } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

/// Mutable engine state shared between the handle and the apply task.
struct EngineView {
    configuration: Configuration,
    leader: Option<ConfiguredMember>,
    role: RaftRole,
    /// Committed entries not yet compacted into a snapshot.
    log: BTreeMap<u64, Bytes>,
    /// Dropped on shutdown so that observers see the stream close.
    observations: Option<broadcast::Sender<Observation>>,
    #[cfg(any(test, feature = "test-utilities"))]
    faults: Faults,
}

#[cfg(any(test, feature = "test-utilities"))]
#[derive(Default)]
struct Faults {
    failing_submits: u32,
    failing_removes: u32,
}

impl EngineView {
    fn emit(&self, observation: Observation) {
        if let Some(tx) = &self.observations {
            // No receivers is fine: nobody is watching.
            let _ = tx.send(observation);
        }
    }
}

struct EngineInner {
    shard_id: String,
    local: ConfiguredMember,
    state_machine: Arc<dyn StateMachine>,
    last_index: AtomicU64,
    view: Mutex<EngineView>,
}

impl EngineInner {
    fn view(&self) -> MutexGuard<'_, EngineView> {
        // A panic while holding the lock cannot leave the view half-updated:
        // every critical section is a handful of plain assignments.
        self.view.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn halted_error(&self, reason: String) -> JetError {
        JetError::ShardHalted {
            shard_id: self.shard_id.clone(),
            reason,
        }
    }
}

/// In-process consensus engine for one shard.
pub struct LocalEngine {
    inner: Arc<EngineInner>,
    work: mpsc::Sender<Work>,
    shutdown_tx: watch::Sender<bool>,
    apply_task: Mutex<Option<JoinHandle<()>>>,
}

impl LocalEngine {
    /// Start an engine whose configuration contains only `local`.
    ///
    /// The node starts as a follower with no known leader.
    pub fn start(
        shard_id: impl Into<String>,
        local: ConfiguredMember,
        state_machine: Arc<dyn StateMachine>,
        options: LocalEngineOptions,
    ) -> Self {
        let (observations, _) = broadcast::channel(options.observation_capacity.max(1));
        let (work, work_rx) = mpsc::channel(options.proposal_queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(EngineInner {
            shard_id: shard_id.into(),
            local: local.clone(),
            state_machine,
            last_index: AtomicU64::new(0),
            view: Mutex::new(EngineView {
                configuration: Configuration {
                    index: 0,
                    members: vec![local],
                },
                leader: None,
                role: RaftRole::Follower,
                log: BTreeMap::new(),
                observations: Some(observations),
                #[cfg(any(test, feature = "test-utilities"))]
                faults: Faults::default(),
            }),
        });

        let apply_task = tokio::spawn(run_apply_loop(inner.clone(), work_rx, shutdown_rx));

        info!(
            shard_id = %inner.shard_id,
            node_id = %inner.local.node_id,
            "Started local consensus engine"
        );

        Self {
            inner,
            work,
            shutdown_tx,
            apply_task: Mutex::new(Some(apply_task)),
        }
    }

    /// The local node as a configuration member.
    pub fn local_member(&self) -> &ConfiguredMember {
        &self.inner.local
    }

    /// Current role of the local node.
    pub fn role(&self) -> RaftRole {
        self.inner.view().role
    }

    /// Check if the local node is the leader.
    pub fn is_leader(&self) -> bool {
        self.role() == RaftRole::Leader
    }

    /// Make the local node the leader.
    pub fn become_leader(&self) {
        let mut view = self.inner.view();
        if view.role == RaftRole::Shutdown {
            return;
        }
        view.role = RaftRole::Leader;
        view.leader = Some(self.inner.local.clone());
        view.emit(Observation::RoleChanged(RaftRole::Leader));
        view.emit(Observation::LeaderChanged {
            leader_id: Some(self.inner.local.node_id.clone()),
            leader_address: Some(self.inner.local.address.clone()),
        });
        info!(shard_id = %self.inner.shard_id, node_id = %self.inner.local.node_id, "Became leader");
    }

    /// Step down to follower, recording `new_leader` as the leader (if known).
    pub fn step_down(&self, new_leader: Option<ConfiguredMember>) {
        let mut view = self.inner.view();
        if view.role == RaftRole::Shutdown {
            return;
        }
        view.role = RaftRole::Follower;
        view.leader = new_leader.clone();
        view.emit(Observation::RoleChanged(RaftRole::Follower));
        view.emit(Observation::LeaderChanged {
            leader_id: new_leader.as_ref().map(|l| l.node_id.clone()),
            leader_address: new_leader.map(|l| l.address),
        });
        info!(shard_id = %self.inner.shard_id, "Stepped down to follower");
    }

    /// Add a voter to the configuration.
    ///
    /// Re-adding an existing voter with the same address is a no-op.
    pub fn add_voter(&self, member: ConfiguredMember) {
        let mut view = self.inner.view();
        if view.role == RaftRole::Shutdown {
            return;
        }
        if let Some(existing) = view
            .configuration
            .members
            .iter_mut()
            .find(|m| m.node_id == member.node_id)
        {
            if existing.address == member.address {
                return;
            }
            existing.address = member.address.clone();
        } else {
            view.configuration.members.push(member.clone());
        }
        view.configuration.index = self.inner.last_index.load(Ordering::SeqCst);
        view.emit(Observation::PeerJoined(member.clone()));
        info!(shard_id = %self.inner.shard_id, peer_id = %member.node_id, "Voter added");
    }

    /// Report a failed heartbeat to `peer_id`.
    pub fn report_failed_heartbeat(&self, peer_id: impl Into<String>, last_contact: Instant) {
        self.inner.view().emit(Observation::FailedHeartbeat {
            peer_id: peer_id.into(),
            last_contact,
        });
    }

    /// Report a vote request from `candidate_id`.
    pub fn report_vote_request(&self, candidate_id: impl Into<String>, term: u64) {
        self.inner.view().emit(Observation::VoteRequested {
            candidate_id: candidate_id.into(),
            term,
        });
    }

    /// Snapshot the state machine and compact the log up to the snapshot.
    ///
    /// Returns the snapshot's last applied index and its bytes.
    pub async fn take_snapshot(&self) -> JetResult<(u64, Bytes)> {
        let index = self.inner.state_machine.last_applied_index().await;
        let snapshot = self.inner.state_machine.snapshot().await?;
        let mut view = self.inner.view();
        view.log = view.log.split_off(&(index + 1));
        debug!(shard_id = %self.inner.shard_id, index, "Compacted log into snapshot");
        Ok((index, snapshot))
    }

    /// Replace the state machine's state with a snapshot, e.g. one received
    /// from a leader or loaded at startup. Entries it covers are dropped.
    ///
    /// The install is queued behind pending proposals and runs on the apply
    /// task, never concurrently with an apply.
    pub async fn install_snapshot(&self, snapshot: impl Into<Bytes>) -> JetResult<u64> {
        let (reply, response) = oneshot::channel();
        self.work
            .send(Work::Install {
                snapshot: snapshot.into(),
                reply,
            })
            .await
            .map_err(|_| JetError::Shutdown)?;
        response.await.map_err(|_| JetError::Shutdown)?
    }

    /// Committed entries still held in the log, in index order.
    pub fn log_entries(&self) -> Vec<(u64, Bytes)> {
        self.inner
            .view()
            .log
            .iter()
            .map(|(index, data)| (*index, data.clone()))
            .collect()
    }

    /// Number of live observer registrations.
    pub fn observer_count(&self) -> usize {
        self.inner
            .view()
            .observations
            .as_ref()
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Make the next `count` submissions fail with `Unavailable`.
    #[cfg(any(test, feature = "test-utilities"))]
    pub fn fail_next_submit(&self, count: u32) {
        self.inner.view().faults.failing_submits = count;
    }

    /// Make the next `count` member removals fail with `Unavailable`.
    #[cfg(any(test, feature = "test-utilities"))]
    pub fn fail_next_remove(&self, count: u32) {
        self.inner.view().faults.failing_removes = count;
    }

    #[cfg(any(test, feature = "test-utilities"))]
    fn injected_submit_fault(&self) -> Option<JetError> {
        let mut view = self.inner.view();
        if view.faults.failing_submits > 0 {
            view.faults.failing_submits -= 1;
            return Some(JetError::Unavailable("injected submit fault".to_string()));
        }
        None
    }

    #[cfg(not(any(test, feature = "test-utilities")))]
    fn injected_submit_fault(&self) -> Option<JetError> {
        None
    }

    #[cfg(any(test, feature = "test-utilities"))]
    fn injected_remove_fault(&self) -> Option<JetError> {
        let mut view = self.inner.view();
        if view.faults.failing_removes > 0 {
            view.faults.failing_removes -= 1;
            return Some(JetError::Unavailable("injected remove fault".to_string()));
        }
        None
    }

    #[cfg(not(any(test, feature = "test-utilities")))]
    fn injected_remove_fault(&self) -> Option<JetError> {
        None
    }

    /// Reject work unless the local node leads.
    fn ensure_leader(&self) -> JetResult<()> {
        let view = self.inner.view();
        match view.role {
            RaftRole::Leader => Ok(()),
            RaftRole::Shutdown => Err(JetError::Shutdown),
            RaftRole::Follower | RaftRole::Candidate => Err(JetError::NotLeader {
                leader: view.leader.as_ref().map(|l| l.node_id.clone()),
            }),
        }
    }
}

#[async_trait]
impl ConsensusEngine for LocalEngine {
    fn node_id(&self) -> &str {
        &self.inner.local.node_id
    }

    async fn submit(&self, entry: Bytes, timeout: Duration) -> JetResult<CommandResponse> {
        self.ensure_leader()?;
        if let Some(err) = self.injected_submit_fault() {
            return Err(err);
        }

        let (reply, response) = oneshot::channel();
        let proposal = Work::Propose { data: entry, reply };

        let commit = async {
            self.work
                .send(proposal)
                .await
                .map_err(|_| JetError::Shutdown)?;
            // The apply task drops the reply sender only when it stops.
            response.await.map_err(|_| JetError::Shutdown)?
        };

        match tokio::time::timeout(timeout, commit).await {
            Ok(result) => result,
            Err(_) => {
                warn!(shard_id = %self.inner.shard_id, ?timeout, "Submission timed out");
                Err(JetError::Timeout(timeout))
            }
        }
    }

    fn observe(&self) -> ObserverRegistration {
        match &self.inner.view().observations {
            Some(tx) => ObserverRegistration::new(tx.subscribe()),
            None => {
                let (tx, rx) = broadcast::channel(1);
                drop(tx);
                ObserverRegistration::new(rx)
            }
        }
    }

    async fn current_configuration(&self) -> JetResult<Configuration> {
        let view = self.inner.view();
        if view.role == RaftRole::Shutdown {
            return Err(JetError::Shutdown);
        }
        Ok(view.configuration.clone())
    }

    async fn remove_member(
        &self,
        node_id: &str,
        prev_index: u64,
        _timeout: Duration,
    ) -> JetResult<()> {
        self.ensure_leader()?;
        if let Some(err) = self.injected_remove_fault() {
            return Err(err);
        }

        let mut view = self.inner.view();
        if prev_index != 0 && prev_index != view.configuration.index {
            return Err(JetError::ConfigurationChanged {
                expected_index: prev_index,
                current_index: view.configuration.index,
            });
        }

        let Some(position) = view
            .configuration
            .members
            .iter()
            .position(|m| m.node_id == node_id)
        else {
            debug!(shard_id = %self.inner.shard_id, peer_id = node_id, "Voter already absent");
            return Ok(());
        };

        let removed = view.configuration.members.remove(position);
        view.configuration.index = self.inner.last_index.load(Ordering::SeqCst);
        view.emit(Observation::PeerRemoved(removed));
        info!(shard_id = %self.inner.shard_id, peer_id = node_id, "Voter removed");
        Ok(())
    }

    fn last_index(&self) -> u64 {
        self.inner.last_index.load(Ordering::SeqCst)
    }

    fn leader(&self) -> Option<ConfiguredMember> {
        self.inner.view().leader.clone()
    }

    async fn shutdown(&self) -> JetResult<()> {
        {
            let mut view = self.inner.view();
            if view.role == RaftRole::Shutdown {
                return Ok(());
            }
            view.emit(Observation::RoleChanged(RaftRole::Shutdown));
            view.role = RaftRole::Shutdown;
            view.leader = None;
            view.observations = None;
        }

        let _ = self.shutdown_tx.send(true);
        let handle = self
            .apply_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(shard_id = %self.inner.shard_id, error = %e, "Apply task ended abnormally");
            }
        }

        info!(shard_id = %self.inner.shard_id, "Local consensus engine stopped");
        Ok(())
    }
}

impl Drop for LocalEngine {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Apply proposals and snapshot installs one at a time, in arrival order.
async fn run_apply_loop(
    inner: Arc<EngineInner>,
    mut work: mpsc::Receiver<Work>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = work.recv() => match next {
                Some(next) => next,
                None => break,
            },
        };

        if let Some(reason) = inner.state_machine.halted() {
            next.reject(inner.halted_error(reason));
            continue;
        }

        match next {
            Work::Propose { data, reply } => {
                let index = inner.last_index.load(Ordering::SeqCst) + 1;
                inner.view().log.insert(index, data.clone());
                inner.last_index.store(index, Ordering::SeqCst);

                let result = inner.state_machine.apply(index, &data).await;
                let _ = reply.send(result);
            }
            Work::Install { snapshot, reply } => {
                let result = install(&inner, &snapshot).await;
                let _ = reply.send(result);
            }
        }
    }

    work.close();
    while let Ok(pending) = work.try_recv() {
        pending.reject(JetError::Shutdown);
    }
    debug!(shard_id = %inner.shard_id, "Apply loop stopped");
}

async fn install(inner: &EngineInner, snapshot: &[u8]) -> JetResult<u64> {
    let index = inner.state_machine.restore(snapshot).await?;
    let mut view = inner.view();
    view.log = view.log.split_off(&(index + 1));
    inner.last_index.fetch_max(index, Ordering::SeqCst);
    info!(shard_id = %inner.shard_id, index, "Installed snapshot");
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::raft::commands::{CommandEntry, WriteOperation};
    use crate::cluster::raft::engine::Received;
    use crate::cluster::raft::state_machine::ShardStateMachine;
    use crate::cluster::topic_storage::{ObjectStoreTopicStorage, TopicStorage};
    use object_store::memory::InMemory;

    fn start_engine() -> (LocalEngine, Arc<ShardStateMachine>) {
        let storage = Arc::new(ObjectStoreTopicStorage::new(Arc::new(InMemory::new()), "s0"));
        let sm = Arc::new(ShardStateMachine::new("s0", storage));
        let engine = LocalEngine::start(
            "s0",
            ConfiguredMember::new("n1", "127.0.0.1:7001"),
            sm.clone(),
            LocalEngineOptions::default(),
        );
        (engine, sm)
    }

    struct SlowStorage;

    #[async_trait]
    impl TopicStorage for SlowStorage {
        async fn allocate(&self, _topic: &str) -> JetResult<()> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }
    }

    fn add_member(node_id: &str) -> Bytes {
        CommandEntry::new(WriteOperation::AddMember {
            node_id: node_id.to_string(),
            address: format!("{}:7000", node_id),
        })
        .encode()
        .unwrap()
    }

    #[tokio::test]
    async fn test_follower_rejects_submit() {
        let (engine, _) = start_engine();
        let err = engine
            .submit(add_member("n1"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_not_leader());
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn test_submit_assigns_increasing_indexes() {
        let (engine, sm) = start_engine();
        engine.become_leader();

        for node in ["n1", "n2", "n3"] {
            engine
                .submit(add_member(node), Duration::from_secs(1))
                .await
                .unwrap();
        }

        let indexes: Vec<u64> = engine.log_entries().iter().map(|(i, _)| *i).collect();
        assert_eq!(indexes, vec![1, 2, 3]);
        assert_eq!(engine.last_index(), 3);
        assert_eq!(sm.last_applied_index().await, 3);
        assert_eq!(sm.members().await.len(), 3);
    }

    #[tokio::test]
    async fn test_become_leader_emits_observations() {
        let (engine, _) = start_engine();
        let mut observer = engine.observe();
        engine.become_leader();

        assert_eq!(
            observer.recv().await,
            Received::Observation(Observation::RoleChanged(RaftRole::Leader))
        );
        assert_eq!(
            observer.recv().await,
            Received::Observation(Observation::LeaderChanged {
                leader_id: Some("n1".to_string()),
                leader_address: Some("127.0.0.1:7001".to_string()),
            })
        );
    }

    #[tokio::test]
    async fn test_remove_member_checks_configuration_index() {
        let (engine, _) = start_engine();
        engine.become_leader();
        engine.add_voter(ConfiguredMember::new("n2", "b:1"));
        engine
            .submit(add_member("n1"), Duration::from_secs(1))
            .await
            .unwrap();
        engine.add_voter(ConfiguredMember::new("n3", "c:1"));

        let configuration = engine.current_configuration().await.unwrap();
        assert_eq!(configuration.index, 1);
        assert_eq!(configuration.members.len(), 3);

        let err = engine
            .remove_member("n2", 7, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            JetError::ConfigurationChanged {
                expected_index: 7,
                current_index: 1
            }
        ));

        engine
            .remove_member("n2", configuration.index, Duration::from_secs(1))
            .await
            .unwrap();
        let configuration = engine.current_configuration().await.unwrap();
        assert!(configuration.get("n2").is_none());
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let (engine, _) = start_engine();
        engine.become_leader();
        engine.add_voter(ConfiguredMember::new("n2", "b:1"));

        engine.fail_next_submit(1);
        let err = engine
            .submit(add_member("n1"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, JetError::Unavailable(_)));
        engine
            .submit(add_member("n1"), Duration::from_secs(1))
            .await
            .unwrap();

        engine.fail_next_remove(1);
        assert!(
            engine
                .remove_member("n2", 0, Duration::from_secs(1))
                .await
                .is_err()
        );
        engine
            .remove_member("n2", 0, Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_halted_state_machine_stops_log() {
        let (engine, sm) = start_engine();
        engine.become_leader();

        let err = engine
            .submit(Bytes::from_static(b"garbage"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(sm.halted().is_some());

        let err = engine
            .submit(add_member("n1"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, JetError::ShardHalted { .. }));
        assert_eq!(engine.log_entries().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_observers_and_rejects_submit() {
        let (engine, _) = start_engine();
        engine.become_leader();
        let mut observer = engine.observe();
        assert_eq!(engine.observer_count(), 1);

        engine.shutdown().await.unwrap();

        // Drain what was emitted before the stream closed
        loop {
            match observer.recv().await {
                Received::Closed => break,
                Received::Observation(_) | Received::Lagged(_) => continue,
            }
        }

        let err = engine
            .submit(add_member("n1"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, JetError::Shutdown));
        assert!(engine.current_configuration().await.is_err());
        assert_eq!(engine.role(), RaftRole::Shutdown);
    }

    #[tokio::test]
    async fn test_snapshot_compacts_and_installs() {
        let (engine, sm) = start_engine();
        engine.become_leader();
        for node in ["n1", "n2"] {
            engine
                .submit(add_member(node), Duration::from_secs(1))
                .await
                .unwrap();
        }

        let (index, snapshot) = engine.take_snapshot().await.unwrap();
        assert_eq!(index, 2);
        assert!(engine.log_entries().is_empty());

        let (follower, follower_sm) = start_engine();
        assert_eq!(follower.install_snapshot(snapshot).await.unwrap(), 2);
        assert_eq!(follower.last_index(), 2);
        assert_eq!(follower_sm.members().await, sm.members().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_is_queued_behind_pending_apply() {
        let (leader, _) = start_engine();
        leader.become_leader();
        for _ in 0..3 {
            leader
                .submit(add_member("n1"), Duration::from_secs(1))
                .await
                .unwrap();
        }
        let (_, snapshot) = leader.take_snapshot().await.unwrap();

        let sm = Arc::new(ShardStateMachine::new("s0", Arc::new(SlowStorage)));
        let engine = Arc::new(LocalEngine::start(
            "s0",
            ConfiguredMember::new("n1", "127.0.0.1:7001"),
            sm.clone(),
            LocalEngineOptions::default(),
        ));
        engine.become_leader();

        let create = CommandEntry::new(WriteOperation::CreateTopic {
            topic: "orders".to_string(),
            partitions: 2,
        })
        .encode()
        .unwrap();
        let submitting = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.submit(create, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(engine.install_snapshot(snapshot).await.unwrap(), 3);
        assert!(submitting.await.unwrap().is_ok());

        assert_eq!(engine.last_index(), 3);
        assert!(engine.log_entries().is_empty());
        assert_eq!(sm.last_applied_index().await, 3);
        assert!(sm.topic("orders").await.is_none());

        // The next proposal continues after the snapshot.
        engine
            .submit(add_member("n2"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(engine.log_entries()[0].0, 4);
        assert_eq!(sm.last_applied_index().await, 4);
    }
}
