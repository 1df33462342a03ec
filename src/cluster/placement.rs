//! Partition→node storage placement.
//!
//! Decides which member of the shard stores each partition's data. The ring
//! is built from the *replicated* member map, never from node-local state or a
//! configured server list, so every replica reaches the same decision for the
//! same committed membership.
//!
//! This ring is independent of the key→partition ring in
//! [`hash_ring`](super::hash_ring): it places partitions on nodes, not keys on
//! partitions.
//!
//! The algorithm:
//! 1. Insert every member (sorted by node id) with `VIRTUAL_NODES_PER_MEMBER` replicas
//! 2. Hash the partition key `"{topic}:{partition}"` to find the owning member
//!
//! Adding or removing a member moves only ~1/n of the partitions.

use conhash::{ConsistentHash, Node};

use crate::constants::VIRTUAL_NODES_PER_MEMBER;

#[derive(Debug, Clone)]
struct RingMember {
    node_id: String,
}

impl Node for RingMember {
    fn name(&self) -> String {
        self.node_id.clone()
    }
}

/// Consistent hash ring over the members of a shard.
pub struct StorageRing {
    ring: ConsistentHash<RingMember>,
    member_count: usize,
    /// The only member, kept to short-circuit single-node shards.
    sole_member: Option<String>,
}

impl StorageRing {
    /// Build a ring from member node ids.
    pub fn from_members<'a, I>(node_ids: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut ids: Vec<&str> = node_ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();

        let mut ring: ConsistentHash<RingMember> = ConsistentHash::new();
        for id in &ids {
            ring.add(
                &RingMember {
                    node_id: (*id).to_string(),
                },
                VIRTUAL_NODES_PER_MEMBER,
            );
        }

        Self {
            ring,
            member_count: ids.len(),
            sole_member: (ids.len() == 1).then(|| ids[0].to_string()),
        }
    }

    /// The member responsible for storing `topic`/`partition`.
    ///
    /// Returns `None` when the shard has no members yet.
    pub fn owner(&self, topic: &str, partition: u32) -> Option<String> {
        if self.member_count == 0 {
            return None;
        }
        if let Some(sole) = &self.sole_member {
            return Some(sole.clone());
        }

        let partition_key = partition_key(topic, partition);
        self.ring
            .get_str(&partition_key)
            .map(|member| member.node_id.clone())
    }

    /// Number of members on the ring.
    pub fn member_count(&self) -> usize {
        self.member_count
    }
}

/// Placement key for a partition.
pub fn partition_key(topic: &str, partition: u32) -> String {
    format!("{}:{}", topic, partition)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ring_has_no_owner() {
        let ring = StorageRing::from_members(std::iter::empty());
        assert_eq!(ring.member_count(), 0);
        assert_eq!(ring.owner("orders", 0), None);
    }

    #[test]
    fn test_single_member_owns_everything() {
        let ring = StorageRing::from_members(["n1"]);
        for partition in 0..16 {
            assert_eq!(ring.owner("orders", partition).as_deref(), Some("n1"));
        }
    }

    #[test]
    fn test_assignment_is_deterministic() {
        let a = StorageRing::from_members(["n1", "n2", "n3"]);
        let b = StorageRing::from_members(["n3", "n1", "n2"]);

        for partition in 0..64 {
            assert_eq!(a.owner("orders", partition), b.owner("orders", partition));
        }
    }

    #[test]
    fn test_owner_is_a_member() {
        let ring = StorageRing::from_members(["n1", "n2", "n3"]);
        for partition in 0..64 {
            let owner = ring.owner("events", partition).unwrap();
            assert!(["n1", "n2", "n3"].contains(&owner.as_str()));
        }
    }

    #[test]
    fn test_duplicates_ignored() {
        let ring = StorageRing::from_members(["n1", "n1", "n2"]);
        assert_eq!(ring.member_count(), 2);
    }

    #[test]
    fn test_removing_member_moves_only_its_partitions() {
        let before = StorageRing::from_members(["n1", "n2", "n3"]);
        let after = StorageRing::from_members(["n1", "n2"]);

        for partition in 0..128 {
            let old = before.owner("orders", partition).unwrap();
            let new = after.owner("orders", partition).unwrap();
            if old != "n3" {
                assert_eq!(old, new, "partition {} moved needlessly", partition);
            } else {
                assert_ne!(new, "n3");
            }
        }
    }

    #[test]
    fn test_partition_key_format() {
        assert_eq!(partition_key("orders", 7), "orders:7");
    }
}
