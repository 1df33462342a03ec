//! Topic domain for the shard state machine.
//!
//! Handles topic creation, key→partition routing and offset assignment.
//! Storage placement of each partition is derived from the replicated member
//! map and recomputed whenever membership changes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cluster::hash_ring::PartitionRing;
use crate::cluster::placement::StorageRing;
use crate::cluster::raft::commands::{CommandResponse, KeyValue, PublishedMessage};
use crate::constants::MAX_PARTITIONS_PER_TOPIC;

/// State of a partition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Partition {
    pub topic: String,
    pub partition: u32,
    /// Offset the next published message receives.
    pub next_offset: u64,
    /// Member responsible for this partition's durable storage.
    pub storage_node: Option<String>,
}

/// State of a topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topic {
    pub name: String,
    /// Partitions `[0, partition_count)`, indexed by partition number.
    pub partitions: Vec<Partition>,
    /// Log index of the `CreateTopic` command.
    pub created_at_index: u64,
    /// Derived from `partitions`; rebuilt after a restore.
    #[serde(skip)]
    ring: PartitionRing,
}

impl Topic {
    fn new(name: String, partition_count: u32, created_at_index: u64, storage: &StorageRing) -> Self {
        let partitions = (0..partition_count)
            .map(|partition| Partition {
                topic: name.clone(),
                partition,
                next_offset: 0,
                storage_node: storage.owner(&name, partition),
            })
            .collect();

        let ring = PartitionRing::new(&name, partition_count);

        Self {
            name,
            partitions,
            created_at_index,
            ring,
        }
    }

    /// Number of partitions.
    pub fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    /// The key→partition ring for this topic.
    pub fn ring(&self) -> &PartitionRing {
        &self.ring
    }

    /// Get a partition by number.
    pub fn partition(&self, partition: u32) -> Option<&Partition> {
        self.partitions.get(partition as usize)
    }

    /// Rebuild the ring from the partition set.
    pub(crate) fn rebuild_ring(&mut self) {
        self.ring = PartitionRing::new(&self.name, self.partition_count());
    }
}

/// State for the topic domain.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct TopicDomainState {
    /// Topics by name.
    pub topics: BTreeMap<String, Topic>,
}

impl TopicDomainState {
    /// Create a new empty topic state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a topic exists.
    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Get a topic by name.
    pub fn get(&self, topic: &str) -> Option<&Topic> {
        self.topics.get(topic)
    }

    /// Create a topic. Storage must already be allocated by the caller.
    pub fn create_topic(
        &mut self,
        name: String,
        partitions: u32,
        index: u64,
        storage: &StorageRing,
    ) -> CommandResponse {
        if self.topics.contains_key(&name) {
            return CommandResponse::TopicAlreadyExists { topic: name };
        }
        if partitions == 0 {
            return CommandResponse::InvalidTopic {
                topic: name,
                reason: "partition count must be at least 1".to_string(),
            };
        }
        if partitions > MAX_PARTITIONS_PER_TOPIC {
            return CommandResponse::InvalidTopic {
                topic: name,
                reason: format!(
                    "partition count {} exceeds maximum {}",
                    partitions, MAX_PARTITIONS_PER_TOPIC
                ),
            };
        }

        let topic = Topic::new(name.clone(), partitions, index, storage);
        let storage_nodes = topic
            .partitions
            .iter()
            .map(|p| p.storage_node.clone())
            .collect();
        self.topics.insert(name.clone(), topic);

        CommandResponse::TopicCreated {
            topic: name,
            partitions,
            storage_nodes,
        }
    }

    /// Route each message to a partition and assign its offset.
    pub fn publish(&mut self, topic: String, messages: Vec<KeyValue>) -> CommandResponse {
        let Some(state) = self.topics.get_mut(&topic) else {
            return CommandResponse::UnknownTopic { topic };
        };

        let mut published = Vec::with_capacity(messages.len());
        for message in messages {
            // Topics always have at least one partition, so the ring is never empty.
            let partition = state.ring.partition_for(&message.key).unwrap_or(0);
            let slot = &mut state.partitions[partition as usize];
            let offset = slot.next_offset;
            slot.next_offset += 1;

            published.push(PublishedMessage {
                key: message.key,
                value: message.value,
                partition,
                offset,
            });
        }

        CommandResponse::Published {
            messages: published,
        }
    }

    /// Recompute the storage node of every partition.
    ///
    /// Returns the number of partitions whose owner changed.
    pub fn reassign_storage(&mut self, storage: &StorageRing) -> usize {
        let mut moved = 0;
        for topic in self.topics.values_mut() {
            for partition in &mut topic.partitions {
                let owner = storage.owner(&topic.name, partition.partition);
                if owner != partition.storage_node {
                    partition.storage_node = owner;
                    moved += 1;
                }
            }
        }
        moved
    }

    /// Rebuild every topic's ring, used after restoring from a snapshot.
    pub fn rebuild_rings(&mut self) {
        for topic in self.topics.values_mut() {
            topic.rebuild_ring();
        }
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_node() -> StorageRing {
        StorageRing::from_members(["n1"])
    }

    #[test]
    fn test_partition_count_is_bounded() {
        let mut state = TopicDomainState::new();

        let response =
            state.create_topic("huge".to_string(), MAX_PARTITIONS_PER_TOPIC + 1, 1, &single_node());
        assert!(matches!(response, CommandResponse::InvalidTopic { .. }));
        assert!(!state.contains("huge"));

        let response =
            state.create_topic("max".to_string(), MAX_PARTITIONS_PER_TOPIC, 2, &single_node());
        assert!(matches!(response, CommandResponse::TopicCreated { .. }));
    }

    #[test]
    fn test_create_topic() {
        let mut state = TopicDomainState::new();
        let response = state.create_topic("orders".to_string(), 3, 1, &single_node());

        assert_eq!(
            response,
            CommandResponse::TopicCreated {
                topic: "orders".to_string(),
                partitions: 3,
                storage_nodes: vec![Some("n1".to_string()); 3],
            }
        );

        let topic = state.get("orders").unwrap();
        assert_eq!(topic.partition_count(), 3);
        for (i, partition) in topic.partitions.iter().enumerate() {
            assert_eq!(partition.partition, i as u32);
            assert_eq!(partition.next_offset, 0);
        }
        assert_eq!(topic.ring().partition_count(), 3);
    }

    #[test]
    fn test_create_existing_topic_rejected() {
        let mut state = TopicDomainState::new();
        state.create_topic("orders".to_string(), 3, 1, &single_node());
        let response = state.create_topic("orders".to_string(), 5, 2, &single_node());

        assert_eq!(
            response,
            CommandResponse::TopicAlreadyExists {
                topic: "orders".to_string()
            }
        );
        assert_eq!(state.get("orders").unwrap().partition_count(), 3);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_create_zero_partitions_rejected() {
        let mut state = TopicDomainState::new();
        let response = state.create_topic("empty".to_string(), 0, 1, &single_node());
        assert!(matches!(response, CommandResponse::InvalidTopic { .. }));
        assert!(state.is_empty());
    }

    #[test]
    fn test_create_without_members_leaves_storage_unassigned() {
        let mut state = TopicDomainState::new();
        let empty = StorageRing::from_members(std::iter::empty());
        state.create_topic("orders".to_string(), 2, 1, &empty);

        let topic = state.get("orders").unwrap();
        assert!(topic.partitions.iter().all(|p| p.storage_node.is_none()));
    }

    #[test]
    fn test_publish_unknown_topic() {
        let mut state = TopicDomainState::new();
        let response = state.publish("missing".to_string(), vec![KeyValue::new("k", "v")]);
        assert_eq!(
            response,
            CommandResponse::UnknownTopic {
                topic: "missing".to_string()
            }
        );
    }

    #[test]
    fn test_publish_assigns_sequential_offsets_per_partition() {
        let mut state = TopicDomainState::new();
        state.create_topic("orders".to_string(), 4, 1, &single_node());

        let messages: Vec<KeyValue> = (0..50)
            .map(|i| KeyValue::new(format!("key-{}", i % 7), format!("v{}", i)))
            .collect();

        let CommandResponse::Published { messages } =
            state.publish("orders".to_string(), messages)
        else {
            panic!("expected Published");
        };

        let mut last: BTreeMap<u32, u64> = BTreeMap::new();
        for message in &messages {
            match last.get(&message.partition) {
                Some(prev) => assert_eq!(message.offset, prev + 1),
                None => assert_eq!(message.offset, 0),
            }
            last.insert(message.partition, message.offset);
        }

        let topic = state.get("orders").unwrap();
        for (partition, offset) in last {
            assert_eq!(topic.partition(partition).unwrap().next_offset, offset + 1);
        }
    }

    #[test]
    fn test_same_key_same_partition() {
        let mut state = TopicDomainState::new();
        state.create_topic("orders".to_string(), 8, 1, &single_node());

        let first = state.publish(
            "orders".to_string(),
            vec![KeyValue::new("customer-1", "a")],
        );
        let second = state.publish(
            "orders".to_string(),
            vec![KeyValue::new("customer-1", "b")],
        );

        let (CommandResponse::Published { messages: a }, CommandResponse::Published { messages: b }) =
            (first, second)
        else {
            panic!("expected Published");
        };
        assert_eq!(a[0].partition, b[0].partition);
        assert_eq!(b[0].offset, a[0].offset + 1);
    }

    #[test]
    fn test_reassign_storage() {
        let mut state = TopicDomainState::new();
        state.create_topic("orders".to_string(), 16, 1, &single_node());

        let moved = state.reassign_storage(&StorageRing::from_members(["n1", "n2"]));
        assert!(moved > 0);

        let topic = state.get("orders").unwrap();
        assert!(
            topic
                .partitions
                .iter()
                .all(|p| matches!(p.storage_node.as_deref(), Some("n1") | Some("n2")))
        );

        // Same membership again moves nothing
        assert_eq!(
            state.reassign_storage(&StorageRing::from_members(["n2", "n1"])),
            0
        );
    }

    #[test]
    fn test_rebuild_rings_after_deserialize() {
        let mut state = TopicDomainState::new();
        state.create_topic("orders".to_string(), 4, 1, &single_node());

        let bytes = bincode::serialize(&state).unwrap();
        let mut restored: TopicDomainState = bincode::deserialize(&bytes).unwrap();
        assert!(restored.get("orders").unwrap().ring().is_empty());

        restored.rebuild_rings();
        assert_eq!(restored, state);
    }
}
