//! Replicated state of a shard.
//!
//! Each shard runs an independent consensus group. Committed log entries are
//! decoded into [`CommandEntry`] values and applied by the
//! [`ShardStateMachine`], which deterministically mutates the shard's topic
//! table and member map.
//!
//! # Architecture
//!
//! ```text
//!   submit(entry) ──►┌──────────────────┐  apply(index, entry)  ┌───────────────────┐
//!                    │ ConsensusEngine  │──────────────────────►│ ShardStateMachine │
//!   observe() ◄──────│ (LocalEngine or  │                       │  topics, members  │
//!                    │  networked impl) │◄──────────────────────│                   │
//!                    └──────────────────┘  snapshot / restore   └───────────────────┘
//!                             │                                           │
//!                             ▼                                           ▼
//!                       observations                               SnapshotStore
//!                     (reconciler input)                           (object store)
//! ```
//!
//! The engine itself is a black box behind [`ConsensusEngine`]; this module
//! ships [`LocalEngine`], an in-process single-writer implementation.

mod commands;
pub mod domains;
mod engine;
mod local;
mod snapshot_store;
mod state_machine;

pub use commands::{
    CommandEntry, CommandResponse, KeyValue, OperationCode, PublishedMessage, WriteOperation,
};
pub use domains::{
    MemberRecord, MembershipDomainState, Partition, Topic, TopicDomainState,
};
pub use engine::{
    Configuration, ConfiguredMember, ConsensusEngine, Observation, ObserverRegistration,
    RaftRole, Received, StateMachine,
};
pub use local::{LocalEngine, LocalEngineOptions};
pub use snapshot_store::SnapshotStore;
pub use state_machine::{ShardState, ShardStateMachine};
