//! Centralized configuration constants.
//!
//! # Categories
//!
//! - **Consensus Constants**: submission and observation limits
//! - **Hashing Constants**: virtual points on the two hash rings
//! - **Failure Detection Constants**: eviction threshold and retry backoff
//! - **Snapshot Constants**: persisted format versioning

use std::time::Duration;

// =============================================================================
// Consensus Constants
// =============================================================================

/// How long a command submission waits for commit + apply before failing.
pub const DEFAULT_SUBMIT_TIMEOUT_MS: u64 = 1000;

/// Default submission timeout as a `Duration`.
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_millis(DEFAULT_SUBMIT_TIMEOUT_MS);

/// Capacity of the observation broadcast channel.
///
/// Slow observers lose the oldest events rather than blocking the engine.
pub const DEFAULT_OBSERVATION_CHANNEL_CAPACITY: usize = 50;

/// Maximum number of proposals queued in front of the apply loop.
pub const DEFAULT_PROPOSAL_QUEUE_CAPACITY: usize = 1024;

// =============================================================================
// Hashing Constants
// =============================================================================

/// Virtual points per partition on a topic's key→partition ring.
pub const VIRTUAL_POINTS_PER_PARTITION: usize = 64;

/// Virtual nodes per member on the partition→node ring.
pub const VIRTUAL_NODES_PER_MEMBER: usize = 150;

// =============================================================================
// Topic Constants
// =============================================================================

/// Maximum length for topic names.
pub const MAX_TOPIC_NAME_LENGTH: usize = 249;

/// Maximum number of partitions a topic may be created with.
pub const MAX_PARTITIONS_PER_TOPIC: u32 = 4096;

// =============================================================================
// Failure Detection Constants
// =============================================================================

/// A peer with no successful contact for longer than this is evicted.
pub const DEFAULT_FAILURE_DETECTION_THRESHOLD_SECS: u64 = 10;

/// First retry delay after a failed eviction step.
pub const REMEDIATION_RETRY_MIN_DELAY_MS: u64 = 250;

/// Upper bound on the retry delay for a failed eviction step.
pub const REMEDIATION_RETRY_MAX_DELAY_MS: u64 = 10_000;

// =============================================================================
// Snapshot Constants
// =============================================================================

/// Format version written into every snapshot envelope.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Object name of the current snapshot under a shard's prefix.
pub const SNAPSHOT_OBJECT_NAME: &str = "current.snapshot";
