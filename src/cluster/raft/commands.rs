//! Replicated commands and responses for a shard.
//!
//! Commands are the inputs to the shard state machine: each one is wrapped in a
//! [`CommandEntry`] envelope (operation code + payload), encoded with bincode,
//! and appended to the consensus log. Entries are immutable once logged.
//!
//! Responses are the outputs of applying a command. Policy rejections such as
//! an existing topic are *responses*, not errors, so that every replica
//! produces the same value for the same entry.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{JetError, JetResult};

/// Operation code carried next to the payload in every log entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OperationCode {
    CreateTopic = 0,
    Publish = 1,
    CreateConsumer = 2,
    Consume = 3,
    AddMember = 4,
    RemoveMember = 5,
}

impl OperationCode {
    /// Returns a string label for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationCode::CreateTopic => "create_topic",
            OperationCode::Publish => "publish",
            OperationCode::CreateConsumer => "create_consumer",
            OperationCode::Consume => "consume",
            OperationCode::AddMember => "add_member",
            OperationCode::RemoveMember => "remove_member",
        }
    }
}

impl std::fmt::Display for OperationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message submitted for publishing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Bytes,
    pub value: Bytes,
}

impl KeyValue {
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A message after the state machine routed it and assigned its offset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishedMessage {
    pub key: Bytes,
    pub value: Bytes,
    pub partition: u32,
    pub offset: u64,
}

/// The payload of a replicated command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WriteOperation {
    /// Create a topic with a fixed number of partitions.
    CreateTopic { topic: String, partitions: u32 },

    /// Route messages to partitions and assign offsets.
    Publish {
        topic: String,
        messages: Vec<KeyValue>,
    },

    /// Reserved; applies as `Unimplemented`.
    CreateConsumer { topic: String, consumer_id: String },

    /// Reserved; applies as `Unimplemented`.
    Consume { topic: String, consumer_id: String },

    /// Add a member to the shard's membership map.
    AddMember { node_id: String, address: String },

    /// Remove a member from the shard's membership map.
    RemoveMember { node_id: String },
}

impl WriteOperation {
    /// The operation code matching this payload.
    pub fn code(&self) -> OperationCode {
        match self {
            WriteOperation::CreateTopic { .. } => OperationCode::CreateTopic,
            WriteOperation::Publish { .. } => OperationCode::Publish,
            WriteOperation::CreateConsumer { .. } => OperationCode::CreateConsumer,
            WriteOperation::Consume { .. } => OperationCode::Consume,
            WriteOperation::AddMember { .. } => OperationCode::AddMember,
            WriteOperation::RemoveMember { .. } => OperationCode::RemoveMember,
        }
    }
}

/// Envelope appended to the consensus log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandEntry {
    pub code: OperationCode,
    pub operation: WriteOperation,
}

impl CommandEntry {
    /// Wrap an operation, deriving the operation code from it.
    pub fn new(operation: WriteOperation) -> Self {
        Self {
            code: operation.code(),
            operation,
        }
    }

    /// Encode for submission to the consensus engine.
    pub fn encode(&self) -> JetResult<Bytes> {
        Ok(Bytes::from(bincode::serialize(self)?))
    }

    /// Decode a committed log entry.
    ///
    /// Any failure, including an operation code that disagrees with the
    /// payload, is reported as [`JetError::CorruptEntry`]: the log itself is
    /// damaged or was written by an incompatible version.
    pub fn decode(index: u64, data: &[u8]) -> JetResult<Self> {
        let entry: CommandEntry =
            bincode::deserialize(data).map_err(|e| JetError::CorruptEntry {
                index,
                message: e.to_string(),
            })?;

        if entry.code != entry.operation.code() {
            return Err(JetError::CorruptEntry {
                index,
                message: format!(
                    "operation code {} does not match payload {}",
                    entry.code,
                    entry.operation.code()
                ),
            });
        }

        Ok(entry)
    }
}

/// Responses from applying a command to the state machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CommandResponse {
    /// Topic was created; `storage_nodes[i]` stores partition `i`.
    TopicCreated {
        topic: String,
        partitions: u32,
        storage_nodes: Vec<Option<String>>,
    },

    /// Topic already exists; nothing changed.
    TopicAlreadyExists { topic: String },

    /// Topic parameters are unusable (e.g. zero partitions); nothing changed.
    InvalidTopic { topic: String, reason: String },

    /// Topic storage could not be allocated; nothing changed.
    StorageAllocationFailed { topic: String, message: String },

    /// Messages were routed and assigned offsets.
    Published { messages: Vec<PublishedMessage> },

    /// Publish targeted a topic that does not exist.
    UnknownTopic { topic: String },

    /// Member add was applied (`already_present` when it was a no-op).
    MemberAdded {
        node_id: String,
        already_present: bool,
    },

    /// Member removal was applied (`was_present` is false for a no-op).
    MemberRemoved { node_id: String, was_present: bool },

    /// The operation is reserved and not implemented.
    Unimplemented { operation: OperationCode },
}

impl CommandResponse {
    /// Label describing the outcome, for metrics.
    pub fn outcome_label(&self) -> &'static str {
        match self {
            CommandResponse::TopicCreated { .. }
            | CommandResponse::Published { .. }
            | CommandResponse::MemberAdded { .. }
            | CommandResponse::MemberRemoved { .. } => "applied",
            CommandResponse::TopicAlreadyExists { .. }
            | CommandResponse::InvalidTopic { .. }
            | CommandResponse::StorageAllocationFailed { .. }
            | CommandResponse::UnknownTopic { .. } => "rejected",
            CommandResponse::Unimplemented { .. } => "unimplemented",
        }
    }

    /// Convert a rejection into the error reported to the caller.
    ///
    /// Successful outcomes pass through unchanged.
    pub fn into_result(self) -> JetResult<CommandResponse> {
        match self {
            CommandResponse::TopicAlreadyExists { topic } => {
                Err(JetError::TopicAlreadyExists(topic))
            }
            CommandResponse::InvalidTopic { topic, reason } => Err(JetError::InvalidRequest(
                format!("topic '{}': {}", topic, reason),
            )),
            CommandResponse::StorageAllocationFailed { topic, message } => {
                Err(JetError::StorageAllocation { topic, message })
            }
            CommandResponse::UnknownTopic { topic } => Err(JetError::UnknownTopic(topic)),
            CommandResponse::Unimplemented { operation } => Err(JetError::Unimplemented(
                match operation {
                    OperationCode::CreateConsumer => "CreateConsumer",
                    OperationCode::Consume => "Consume",
                    OperationCode::CreateTopic => "CreateTopic",
                    OperationCode::Publish => "Publish",
                    OperationCode::AddMember => "AddMember",
                    OperationCode::RemoveMember => "RemoveMember",
                },
            )),
            other => Ok(other),
        }
    }
}
