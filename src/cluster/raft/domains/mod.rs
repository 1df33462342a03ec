//! Domain-specific state machine components.
//!
//! The shard state machine is split into two logical domains:
//!
//! - **Topic**: Topic creation, key→partition routing, offset assignment,
//!   partition storage placement
//! - **Membership**: The replicated member map of the shard
//!
//! Each domain provides:
//! - State struct holding domain-specific data
//! - Apply functions for deterministic state transitions
//!
//! The `ShardState` in the state machine composes these domains.

pub mod membership;
pub mod topic;

pub use membership::{MemberRecord, MembershipDomainState};
pub use topic::{Partition, Topic, TopicDomainState};
