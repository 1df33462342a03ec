//! Key→partition consistent hash ring.
//!
//! Each topic owns one [`PartitionRing`], built once from its final partition
//! set when the topic is created (or restored from a snapshot) and never
//! mutated afterwards. A message key is hashed with xxHash64 and routed to the
//! first virtual point at or after the key's position, wrapping around the end
//! of the ring.
//!
//! The ring is a pure function of `(topic, partition_count)`, so every replica
//! routes the same key to the same partition.

use std::collections::BTreeMap;
use std::hash::Hasher;

use twox_hash::XxHash64;

use crate::constants::VIRTUAL_POINTS_PER_PARTITION;

/// A consistent hash ring mapping message keys to partition numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionRing {
    /// Virtual points: ring position -> partition number.
    points: BTreeMap<u64, u32>,
    /// Number of distinct partitions on the ring.
    partition_count: u32,
}

impl PartitionRing {
    /// Build the ring for `topic` with partitions `[0, partition_count)`.
    pub fn new(topic: &str, partition_count: u32) -> Self {
        Self::with_points(topic, partition_count, VIRTUAL_POINTS_PER_PARTITION)
    }

    /// Build the ring with a custom number of virtual points per partition.
    pub fn with_points(topic: &str, partition_count: u32, points_per_partition: usize) -> Self {
        let mut points = BTreeMap::new();
        let points_per_partition = points_per_partition.max(1);

        for partition in 0..partition_count {
            for vnode in 0..points_per_partition {
                let point_key = format!("{}/{}#{}", topic, partition, vnode);
                // First writer wins on a (vanishingly rare) collision so the
                // result stays independent of HashMap iteration order.
                points
                    .entry(hash_key(point_key.as_bytes()))
                    .or_insert(partition);
            }
        }

        Self {
            points,
            partition_count,
        }
    }

    /// Resolve a message key to a partition number.
    ///
    /// Returns `None` only for an empty ring.
    pub fn partition_for(&self, key: &[u8]) -> Option<u32> {
        let position = hash_key(key);
        self.points
            .range(position..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, partition)| *partition)
    }

    /// Number of partitions the ring was built from.
    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// Number of virtual points on the ring.
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Check if the ring has no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// 64-bit non-cryptographic hash used for ring positions.
pub fn hash_key(key: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(key);
    hasher.finish()
}
