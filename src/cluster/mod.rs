//! Replicated control plane of a sharded message broker.
//!
//! Each shard is a replicated state machine driven by a consensus engine.
//! The state machine owns the shard's topics, the offset counters of their
//! partitions and the shard's membership map. Messages are routed to
//! partitions by a per-topic hash ring, and partitions are placed on storage
//! nodes by a second ring built from the membership map.
//!
//! # Architecture
//!
//! ```text
//!                   ┌───────────────┐
//!                   │ BrokerService │  publish / create_topic / read surface
//!                   └───────┬───────┘
//!                           │
//!            ┌──────────────┼──────────────┐
//!            ▼                             ▼
//!     ┌─────────────┐              ┌──────────────────┐
//!     │    Shard    │ ◄─────────── │ ClusterDirectory │
//!     └──────┬──────┘              └──────────────────┘
//!            │ submit
//!            ▼
//!   ┌─────────────────┐  observe   ┌──────────────────────┐
//!   │ ConsensusEngine │ ─────────► │ MembershipReconciler │
//!   └────────┬────────┘            │  + FailureDetector   │
//!            │ apply               └──────────────────────┘
//!            ▼
//!   ┌───────────────────┐
//!   │ ShardStateMachine │ ──► PartitionRing (key → partition)
//!   │  topics, members  │ ──► StorageRing   (partition → node)
//!   └───────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use jetlog::cluster::{BrokerService, ClusterDirectory, Shard, ShardConfig};
//! use jetlog::cluster::raft::KeyValue;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ShardConfig::from_env()?;
//!     let (shard, engine) = Shard::open_local(&config).await?;
//!     engine.become_leader();
//!
//!     let shard = Arc::new(shard);
//!     let directory = Arc::new(ClusterDirectory::new());
//!     directory.add_local(shard.clone());
//!
//!     let service = BrokerService::new(shard.clone(), directory);
//!     service.create_topic("orders", 3).await?;
//!     service
//!         .publish_messages("orders", vec![KeyValue::new("customer-1", "created")])
//!         .await?;
//!
//!     shard.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod background_tasks;
mod config;
mod directory;
pub mod failure_detector;
pub mod hash_ring;
pub mod metrics;
mod object_store;
pub mod placement;
pub mod raft;
pub mod reconciler;
pub mod retry;
mod service;
mod shard;
pub mod topic_storage;
mod validation;

pub use background_tasks::{
    BackgroundTaskRegistry, SharedTaskRegistry, ShutdownSignal, TaskStatus,
};
pub use config::ShardConfig;
pub use directory::ClusterDirectory;
pub use failure_detector::{
    EvictionState, EvictionStep, FailureDetector, FailureDetectorConfig, HeartbeatVerdict,
};
pub use hash_ring::PartitionRing;
pub use object_store::create_object_store;
pub use placement::StorageRing;
pub use reconciler::MembershipReconciler;
pub use service::{BrokerService, CreatedTopic};
pub use shard::{MemberInfo, Shard, ShardHealth, ShardInfo};
pub use topic_storage::{ObjectStoreTopicStorage, TopicStorage};
pub use validation::{validate_id, validate_partition_count, validate_topic_name};
