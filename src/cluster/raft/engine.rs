//! Boundary between a shard and its consensus engine.
//!
//! The consensus engine (leader election, log replication, term handling) is
//! an external collaborator. A shard talks to it only through
//! [`ConsensusEngine`], and the engine drives the shard's state through
//! [`StateMachine`]. [`LocalEngine`](super::local::LocalEngine) is the
//! in-process implementation.
//!
//! # Observations
//!
//! Engines publish internal events on a broadcast channel. Delivery is lossy:
//! a slow observer loses the oldest events instead of blocking the engine, and
//! learns about it through [`Received::Lagged`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::JetResult;

use super::commands::CommandResponse;

/// A voter in the engine's own configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConfiguredMember {
    pub node_id: String,
    pub address: String,
}

impl ConfiguredMember {
    pub fn new(node_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            address: address.into(),
        }
    }
}

/// The engine's voter configuration and the log index it took effect at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    pub index: u64,
    pub members: Vec<ConfiguredMember>,
}

impl Configuration {
    /// Look up a voter by id.
    pub fn get(&self, node_id: &str) -> Option<&ConfiguredMember> {
        self.members.iter().find(|m| m.node_id == node_id)
    }
}

/// Role of the local node in its consensus group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
    Shutdown,
}

impl RaftRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            RaftRole::Follower => "follower",
            RaftRole::Candidate => "candidate",
            RaftRole::Leader => "leader",
            RaftRole::Shutdown => "shutdown",
        }
    }
}

/// An event emitted by the consensus engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Leadership moved. `leader_id` is `None` while no leader is known.
    LeaderChanged {
        leader_id: Option<String>,
        leader_address: Option<String>,
    },
    /// A voter was added to the configuration.
    PeerJoined(ConfiguredMember),
    /// A voter was removed from the configuration.
    PeerRemoved(ConfiguredMember),
    /// A heartbeat to `peer_id` failed; it was last reached at `last_contact`.
    FailedHeartbeat {
        peer_id: String,
        last_contact: Instant,
    },
    /// A candidate asked for our vote.
    VoteRequested { candidate_id: String, term: u64 },
    /// The local node changed role.
    RoleChanged(RaftRole),
}

impl Observation {
    /// Returns a string label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Observation::LeaderChanged { .. } => "leader_changed",
            Observation::PeerJoined(_) => "peer_joined",
            Observation::PeerRemoved(_) => "peer_removed",
            Observation::FailedHeartbeat { .. } => "failed_heartbeat",
            Observation::VoteRequested { .. } => "vote_requested",
            Observation::RoleChanged(_) => "role_changed",
        }
    }
}

/// Result of waiting on an observation stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Observation(Observation),
    /// The receiver fell behind and `n` observations were dropped.
    Lagged(u64),
    /// The engine shut down; no more observations will arrive.
    Closed,
}

/// A registration on the engine's observation stream.
///
/// Dropping it deregisters the observer.
pub struct ObserverRegistration {
    receiver: broadcast::Receiver<Observation>,
}

impl ObserverRegistration {
    pub fn new(receiver: broadcast::Receiver<Observation>) -> Self {
        Self { receiver }
    }

    /// Wait for the next observation.
    pub async fn recv(&mut self) -> Received {
        match self.receiver.recv().await {
            Ok(observation) => Received::Observation(observation),
            Err(broadcast::error::RecvError::Lagged(n)) => Received::Lagged(n),
            Err(broadcast::error::RecvError::Closed) => Received::Closed,
        }
    }

    /// Take an observation if one is ready, without waiting.
    pub fn try_recv(&mut self) -> Option<Received> {
        match self.receiver.try_recv() {
            Ok(observation) => Some(Received::Observation(observation)),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Some(Received::Lagged(n)),
            Err(broadcast::error::TryRecvError::Closed) => Some(Received::Closed),
            Err(broadcast::error::TryRecvError::Empty) => None,
        }
    }
}

/// The consensus engine as seen by a shard.
#[async_trait]
pub trait ConsensusEngine: Send + Sync + 'static {
    /// Id of the local node.
    fn node_id(&self) -> &str;

    /// Append `entry` to the log and wait until it is committed and applied.
    ///
    /// Fails with a retriable error (`NotLeader`, `Timeout`, `Unavailable`)
    /// if the entry could not be committed, and with `Shutdown` if the engine
    /// stops while the entry is in flight.
    async fn submit(&self, entry: Bytes, timeout: Duration) -> JetResult<CommandResponse>;

    /// Register an observer on the engine's event stream.
    fn observe(&self) -> ObserverRegistration;

    /// The engine's current voter configuration.
    async fn current_configuration(&self) -> JetResult<Configuration>;

    /// Remove a voter from the configuration.
    ///
    /// When `prev_index` is non-zero the removal only proceeds if the
    /// configuration is still the one committed at `prev_index`; otherwise it
    /// fails with `ConfigurationChanged`.
    async fn remove_member(&self, node_id: &str, prev_index: u64, timeout: Duration)
    -> JetResult<()>;

    /// Index of the last log entry.
    fn last_index(&self) -> u64;

    /// The current leader, if known.
    fn leader(&self) -> Option<ConfiguredMember>;

    /// Stop the engine. Pending submissions fail with `Shutdown` and the
    /// observation stream closes.
    async fn shutdown(&self) -> JetResult<()>;
}

/// The replicated state machine as seen by the consensus engine.
#[async_trait]
pub trait StateMachine: Send + Sync + 'static {
    /// Apply the committed entry at `index`.
    ///
    /// Called exactly once per index in strictly increasing order. A fatal
    /// error halts the state machine; later calls fail with `ShardHalted`.
    async fn apply(&self, index: u64, data: &[u8]) -> JetResult<CommandResponse>;

    /// Serialize the full state.
    async fn snapshot(&self) -> JetResult<Bytes>;

    /// Replace the state with a snapshot. Returns the last applied index it
    /// contains.
    async fn restore(&self, snapshot: &[u8]) -> JetResult<u64>;

    /// Index of the last applied entry.
    async fn last_applied_index(&self) -> u64;

    /// Why the state machine stopped applying, if it did.
    fn halted(&self) -> Option<String>;
}
