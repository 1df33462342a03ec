//! Replicated state machine for one shard.
//!
//! The state machine holds the shard's topic table and member map and applies
//! committed commands to produce deterministic state transitions. All maps are
//! `BTreeMap`s, so two replicas that applied the same entries serialize to the
//! same bytes.
//!
//! # Concurrency
//!
//! Apply and restore are serialized on a dedicated mutex that is held for the
//! whole command, including storage allocation, so a restore never lands
//! between the index check and the state write of an apply. Readers take the
//! read half of the `RwLock` and always observe the state as of the most
//! recently completed apply or restore, never a partially applied command.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, error, info, warn};

use crate::cluster::metrics;
use crate::cluster::placement::StorageRing;
use crate::cluster::topic_storage::TopicStorage;
use crate::constants::{MAX_PARTITIONS_PER_TOPIC, SNAPSHOT_FORMAT_VERSION};
use crate::error::{JetError, JetResult};

use super::commands::{CommandEntry, CommandResponse, WriteOperation};
use super::domains::{MemberRecord, MembershipDomainState, Topic, TopicDomainState};
use super::engine::StateMachine;

/// The complete state of a shard.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ShardState {
    /// Index of the last applied log entry.
    pub last_applied_index: u64,

    /// Topic domain state (topics, partitions, offsets, placement).
    pub topic_domain: TopicDomainState,

    /// Membership domain state (replicated member map).
    pub membership_domain: MembershipDomainState,
}

impl ShardState {
    /// Partition→node ring over the current member map.
    pub fn storage_ring(&self) -> StorageRing {
        StorageRing::from_members(self.membership_domain.node_ids())
    }
}

/// Persisted form of a [`ShardState`].
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format_version: u32,
    shard_id: String,
    last_applied_index: u64,
    topics: TopicDomainState,
    members: MembershipDomainState,
}

/// Leading field of every envelope, decoded first so that a snapshot from a
/// newer format is reported as such instead of as garbage.
#[derive(Deserialize)]
struct SnapshotHeader {
    format_version: u32,
}

/// The state machine wrapper for a shard.
pub struct ShardStateMachine {
    shard_id: String,
    state: Arc<RwLock<ShardState>>,
    storage: Arc<dyn TopicStorage>,
    /// Held by every apply and restore.
    apply_lock: Mutex<()>,
    /// Set once on the first fatal error; the shard never applies again.
    halt_reason: OnceLock<String>,
}

impl ShardStateMachine {
    /// Create an empty state machine for `shard_id`.
    pub fn new(shard_id: impl Into<String>, storage: Arc<dyn TopicStorage>) -> Self {
        Self {
            shard_id: shard_id.into(),
            state: Arc::new(RwLock::new(ShardState::default())),
            storage,
            apply_lock: Mutex::new(()),
            halt_reason: OnceLock::new(),
        }
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    /// Get a read-only reference to the current state.
    pub async fn state(&self) -> RwLockReadGuard<'_, ShardState> {
        self.state.read().await
    }

    /// Copy of the member map.
    pub async fn members(&self) -> BTreeMap<String, MemberRecord> {
        self.state.read().await.membership_domain.members.clone()
    }

    /// Check if `node_id` is in the member map.
    pub async fn contains_member(&self, node_id: &str) -> bool {
        self.state.read().await.membership_domain.contains(node_id)
    }

    /// Copy of a topic.
    pub async fn topic(&self, name: &str) -> Option<Topic> {
        self.state.read().await.topic_domain.get(name).cloned()
    }

    /// Names of all topics, sorted.
    pub async fn topic_names(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .topic_domain
            .topics
            .keys()
            .cloned()
            .collect()
    }

    /// Serialize the state together with the index it covers.
    pub async fn snapshot_with_index(&self) -> JetResult<(u64, Bytes)> {
        let state = self.state.read().await;
        let envelope = SnapshotEnvelope {
            format_version: SNAPSHOT_FORMAT_VERSION,
            shard_id: self.shard_id.clone(),
            last_applied_index: state.last_applied_index,
            topics: state.topic_domain.clone(),
            members: state.membership_domain.clone(),
        };
        drop(state);

        let bytes = bincode::serialize(&envelope)?;
        metrics::record_snapshot("take", true);
        debug!(
            shard_id = %self.shard_id,
            last_applied_index = envelope.last_applied_index,
            size_bytes = bytes.len(),
            "Took snapshot"
        );
        Ok((envelope.last_applied_index, Bytes::from(bytes)))
    }

    /// Apply a decoded command at `index`.
    async fn apply_entry(&self, index: u64, entry: CommandEntry) -> JetResult<CommandResponse> {
        let _serial = self.apply_lock.lock().await;

        let last_applied = self.state.read().await.last_applied_index;
        if index <= last_applied {
            return Err(JetError::CorruptEntry {
                index,
                message: format!("entry is not after last applied index {}", last_applied),
            });
        }

        // Storage is allocated before the write lock so that readers are not
        // blocked behind object store latency. The apply lock is held, so
        // neither the topic nor the index can change before the write below.
        let allocation = match &entry.operation {
            WriteOperation::CreateTopic { topic, partitions }
                if (1..=MAX_PARTITIONS_PER_TOPIC).contains(partitions) =>
            {
                if self.state.read().await.topic_domain.contains(topic) {
                    None
                } else {
                    Some(self.storage.allocate(topic).await)
                }
            }
            _ => None,
        };

        let mut state = self.state.write().await;

        let code = entry.code;
        let response = match entry.operation {
            WriteOperation::CreateTopic { topic, partitions } => match allocation {
                Some(Err(e)) => CommandResponse::StorageAllocationFailed {
                    topic,
                    message: e.to_string(),
                },
                _ => {
                    let ring = state.storage_ring();
                    state
                        .topic_domain
                        .create_topic(topic, partitions, index, &ring)
                }
            },

            WriteOperation::Publish { topic, messages } => {
                let response = state.topic_domain.publish(topic.clone(), messages);
                if let CommandResponse::Published { messages } = &response {
                    metrics::record_published(&topic, messages.len());
                }
                response
            }

            WriteOperation::CreateConsumer { .. } | WriteOperation::Consume { .. } => {
                CommandResponse::Unimplemented { operation: code }
            }

            WriteOperation::AddMember { node_id, address } => {
                let response = state.membership_domain.add(node_id, address);
                if matches!(
                    response,
                    CommandResponse::MemberAdded {
                        already_present: false,
                        ..
                    }
                ) {
                    Self::reassign_storage(&mut state, &self.shard_id);
                }
                response
            }

            WriteOperation::RemoveMember { node_id } => {
                let response = state.membership_domain.remove(node_id);
                if matches!(
                    response,
                    CommandResponse::MemberRemoved {
                        was_present: true,
                        ..
                    }
                ) {
                    Self::reassign_storage(&mut state, &self.shard_id);
                }
                response
            }
        };

        state.last_applied_index = index;
        metrics::set_shard_state(
            &self.shard_id,
            index,
            state.membership_domain.len(),
            state.topic_domain.len(),
        );

        Ok(response)
    }

    fn reassign_storage(state: &mut ShardState, shard_id: &str) {
        let ring = state.storage_ring();
        let moved = state.topic_domain.reassign_storage(&ring);
        if moved > 0 {
            info!(
                shard_id,
                moved,
                members = ring.member_count(),
                "Reassigned partition storage after membership change"
            );
        }
    }

    /// Stop applying for good.
    fn halt(&self, err: &JetError) {
        let reason = err.to_string();
        if self.halt_reason.set(reason.clone()).is_ok() {
            metrics::record_shard_halt(&self.shard_id, err.class().as_metric_label());
            error!(
                shard_id = %self.shard_id,
                error = %err,
                "Shard halted on fatal error; no further entries will be applied"
            );
        }
    }

    fn halted_error(&self, reason: &str) -> JetError {
        JetError::ShardHalted {
            shard_id: self.shard_id.clone(),
            reason: reason.to_string(),
        }
    }

    fn decode_snapshot(&self, snapshot: &[u8]) -> JetResult<SnapshotEnvelope> {
        let header: SnapshotHeader = bincode::deserialize(snapshot)
            .map_err(|e| JetError::CorruptSnapshot(format!("unreadable header: {}", e)))?;
        if header.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(JetError::SnapshotVersion {
                found: header.format_version,
                expected: SNAPSHOT_FORMAT_VERSION,
            });
        }

        let envelope: SnapshotEnvelope = bincode::deserialize(snapshot)
            .map_err(|e| JetError::CorruptSnapshot(e.to_string()))?;
        if envelope.shard_id != self.shard_id {
            return Err(JetError::CorruptSnapshot(format!(
                "snapshot belongs to shard '{}', not '{}'",
                envelope.shard_id, self.shard_id
            )));
        }
        Ok(envelope)
    }
}

#[async_trait]
impl StateMachine for ShardStateMachine {
    async fn apply(&self, index: u64, data: &[u8]) -> JetResult<CommandResponse> {
        if let Some(reason) = self.halt_reason.get() {
            return Err(self.halted_error(reason));
        }

        let start = Instant::now();
        let result = match CommandEntry::decode(index, data) {
            Ok(entry) => {
                let code = entry.code;
                self.apply_entry(index, entry)
                    .await
                    .map(|response| (code, response))
            }
            Err(e) => Err(e),
        };

        match result {
            Ok((code, response)) => {
                let outcome = response.outcome_label();
                metrics::record_apply(code.as_str(), outcome, start.elapsed().as_secs_f64());
                if outcome == "applied" {
                    debug!(shard_id = %self.shard_id, index, operation = %code, "Applied command");
                } else {
                    warn!(
                        shard_id = %self.shard_id,
                        index,
                        operation = %code,
                        response = ?response,
                        "Command not applied"
                    );
                }
                Ok(response)
            }
            Err(e) => {
                if e.is_fatal() {
                    self.halt(&e);
                }
                Err(e)
            }
        }
    }

    async fn snapshot(&self) -> JetResult<Bytes> {
        let (_, bytes) = self.snapshot_with_index().await?;
        Ok(bytes)
    }

    async fn restore(&self, snapshot: &[u8]) -> JetResult<u64> {
        if let Some(reason) = self.halt_reason.get() {
            return Err(self.halted_error(reason));
        }

        let envelope = match self.decode_snapshot(snapshot) {
            Ok(envelope) => envelope,
            Err(e) => {
                metrics::record_snapshot("restore", false);
                if e.is_fatal() {
                    self.halt(&e);
                }
                return Err(e);
            }
        };

        let mut topics = envelope.topics;
        topics.rebuild_rings();
        let restored = ShardState {
            last_applied_index: envelope.last_applied_index,
            topic_domain: topics,
            membership_domain: envelope.members,
        };

        let _serial = self.apply_lock.lock().await;
        let mut state = self.state.write().await;
        *state = restored;
        metrics::set_shard_state(
            &self.shard_id,
            state.last_applied_index,
            state.membership_domain.len(),
            state.topic_domain.len(),
        );
        metrics::record_snapshot("restore", true);
        info!(
            shard_id = %self.shard_id,
            last_applied_index = state.last_applied_index,
            topics = state.topic_domain.len(),
            members = state.membership_domain.len(),
            "Restored state from snapshot"
        );

        Ok(state.last_applied_index)
    }

    async fn last_applied_index(&self) -> u64 {
        self.state.read().await.last_applied_index
    }

    fn halted(&self) -> Option<String> {
        self.halt_reason.get().cloned()
    }
}
