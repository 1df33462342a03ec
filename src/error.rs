//! Error types for the jetlog control plane.
//!
//! # Error Classes
//!
//! Every error maps onto one [`ErrorClass`], which tells the caller what to do:
//!
//! | Class           | Examples                                  | Caller action                     |
//! |-----------------|-------------------------------------------|-----------------------------------|
//! | `Retriable`     | `NotLeader`, `Timeout`, `Unavailable`     | redirect to leader / retry        |
//! | `Rejected`      | `TopicAlreadyExists`, `UnknownTopic`      | report, never retry automatically |
//! | `Fatal`         | `CorruptEntry`, `SnapshotVersion`         | halt the shard, surface to health |
//! | `Unimplemented` | `CreateConsumer`, `Consume`               | report as unimplemented           |
//! | `Shutdown`      | submissions in flight during shutdown     | stop, the shard is going away     |
//!
//! Storage allocation failures during topic creation are best-effort: they are
//! reported as a rejected command rather than crashing the process.
//!
//! # Propagation
//!
//! Apply-path outcomes travel back to the originating caller inside the command
//! result. Reconciler errors are logged and retried on the next observation or
//! retry deadline; they are never escalated.

use std::time::Duration;

use thiserror::Error;

/// Result type for jetlog operations.
pub type JetResult<T> = Result<T, JetError>;

/// How an error should be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient consensus failure; retry or redirect to the leader.
    Retriable,
    /// Rejected by policy; reported to the caller, not retried.
    Rejected,
    /// Local invariant violation; the affected shard must stop applying.
    Fatal,
    /// Reserved operation with no implementation.
    Unimplemented,
    /// The shard or engine is shutting down.
    Shutdown,
}

impl ErrorClass {
    /// Returns a string label for metrics.
    pub fn as_metric_label(&self) -> &'static str {
        match self {
            ErrorClass::Retriable => "retriable",
            ErrorClass::Rejected => "rejected",
            ErrorClass::Fatal => "fatal",
            ErrorClass::Unimplemented => "unimplemented",
            ErrorClass::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_metric_label())
    }
}

/// Errors that can occur in the control plane.
#[derive(Debug, Error)]
pub enum JetError {
    /// This node is not the leader of the shard's consensus group.
    #[error("Not the leader of shard (current leader: {})", leader.as_deref().unwrap_or("unknown"))]
    NotLeader { leader: Option<String> },

    /// The consensus engine did not commit and apply the entry in time.
    #[error("Command was not committed within {0:?}")]
    Timeout(Duration),

    /// The consensus engine is temporarily unable to accept work.
    #[error("Consensus engine unavailable: {0}")]
    Unavailable(String),

    /// The configuration changed since the index the caller based its request on.
    #[error("Configuration changed after index {expected_index} (now at {current_index})")]
    ConfigurationChanged {
        expected_index: u64,
        current_index: u64,
    },

    /// The shard or engine was shut down.
    #[error("Shard is shutting down")]
    Shutdown,

    /// A topic with this name already exists.
    #[error("Topic '{0}' already exists")]
    TopicAlreadyExists(String),

    /// The topic does not exist.
    #[error("Unknown topic '{0}'")]
    UnknownTopic(String),

    /// Topic storage could not be allocated.
    #[error("Failed to allocate storage for topic '{topic}': {message}")]
    StorageAllocation { topic: String, message: String },

    /// The request is malformed (bad topic name, partition count, ...).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The operation is reserved and has no implementation.
    #[error("Method {0} not implemented")]
    Unimplemented(&'static str),

    /// A committed log entry could not be decoded.
    #[error("Corrupt log entry at index {index}: {message}")]
    CorruptEntry { index: u64, message: String },

    /// A snapshot was written in a format this build does not understand.
    #[error("Unsupported snapshot format version {found} (expected {expected})")]
    SnapshotVersion { found: u32, expected: u32 },

    /// A snapshot could not be decoded or does not belong to this shard.
    #[error("Corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    /// The shard stopped applying after a fatal error.
    #[error("Shard '{shard_id}' halted: {reason}")]
    ShardHalted { shard_id: String, reason: String },

    /// The apply path returned a response that does not match the command.
    #[error("Unexpected command response: {0}")]
    UnexpectedResponse(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error from object store operations.
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// Binary encoding error outside the apply path.
    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    /// JSON rendering of the read surface failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl JetError {
    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            JetError::NotLeader { .. }
            | JetError::Timeout(_)
            | JetError::Unavailable(_)
            | JetError::ConfigurationChanged { .. }
            | JetError::ObjectStore(_)
            | JetError::Io(_) => ErrorClass::Retriable,

            JetError::TopicAlreadyExists(_)
            | JetError::UnknownTopic(_)
            | JetError::StorageAllocation { .. }
            | JetError::InvalidRequest(_)
            | JetError::Config(_)
            | JetError::Json(_) => ErrorClass::Rejected,

            JetError::CorruptEntry { .. }
            | JetError::SnapshotVersion { .. }
            | JetError::CorruptSnapshot(_)
            | JetError::ShardHalted { .. }
            | JetError::UnexpectedResponse(_)
            | JetError::Encoding(_) => ErrorClass::Fatal,

            JetError::Unimplemented(_) => ErrorClass::Unimplemented,

            JetError::Shutdown => ErrorClass::Shutdown,
        }
    }

    /// Check if the caller should retry (possibly against another node).
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.class() == ErrorClass::Retriable
    }

    /// Check if this error must halt the affected shard.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    /// Check if this error indicates the request reached a non-leader.
    #[inline]
    pub fn is_not_leader(&self) -> bool {
        matches!(self, JetError::NotLeader { .. })
    }

    /// The leader hint carried by a `NotLeader` error, if any.
    pub fn leader_hint(&self) -> Option<&str> {
        match self {
            JetError::NotLeader { leader } => leader.as_deref(),
            _ => None,
        }
    }
}
