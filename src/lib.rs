//! # Jetlog
//! Replicated control plane for a sharded message broker.
//!
//! A jetlog cluster is split into shards. Every shard replicates a small
//! state machine through a consensus engine: the topics it hosts, the next
//! offset of each partition and the set of nodes that belong to it. On top of
//! that the crate provides
//!
//! - consistent-hash routing of message keys to partitions and of partitions
//!   to storage nodes ([`cluster::PartitionRing`], [`cluster::StorageRing`]),
//! - a membership reconciler that keeps the replicated member map in step
//!   with the engine's voter configuration and evicts peers that stopped
//!   answering heartbeats ([`cluster::MembershipReconciler`]),
//! - a read surface describing every shard the node knows about
//!   ([`cluster::ClusterDirectory`]).
//!
//! The consensus engine sits behind the [`ConsensusEngine`](cluster::raft::ConsensusEngine)
//! trait. [`LocalEngine`](cluster::raft::LocalEngine) is an in-process
//! implementation used for single-node deployments and tests.
//!
//! ## Getting started
//! ```rust,no_run
//! use jetlog::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> JetResult<()> {
//!     let config = ShardConfig::default();
//!     let (shard, engine) = Shard::open_local(&config).await?;
//!     engine.become_leader();
//!
//!     let published = shard
//!         .submit(WriteOperation::CreateTopic {
//!             topic: "orders".to_string(),
//!             partitions: 3,
//!         })
//!         .await?;
//!     println!("{:?}", published);
//!
//!     shard.shutdown().await
//! }
//! ```

#![forbid(unsafe_code)]

pub mod cluster;
pub mod constants;
pub mod error;
pub mod telemetry;

pub mod prelude {
    //! Commonly used types.
    pub use crate::cluster::raft::{
        CommandResponse, ConsensusEngine, KeyValue, LocalEngine, PublishedMessage, StateMachine,
        WriteOperation,
    };
    pub use crate::cluster::{
        BrokerService, ClusterDirectory, MemberInfo, Shard, ShardConfig, ShardInfo,
    };
    pub use crate::error::{ErrorClass, JetError, JetResult};

    pub use bytes;
}
