//! Tests for key→partition routing and partition→node placement.

use std::collections::HashMap;

use jetlog::cluster::hash_ring::hash_key;
use jetlog::cluster::{PartitionRing, StorageRing};

// ============================================================================
// PartitionRing
// ============================================================================

#[test]
fn test_routing_is_stable_across_ring_instances() {
    let first = PartitionRing::new("orders", 12);
    let second = PartitionRing::new("orders", 12);

    for i in 0..500 {
        let key = format!("customer-{}", i);
        assert_eq!(
            first.partition_for(key.as_bytes()),
            second.partition_for(key.as_bytes())
        );
    }
}

#[test]
fn test_routing_stays_in_range() {
    let ring = PartitionRing::new("orders", 5);
    for i in 0..1000 {
        let partition = ring.partition_for(format!("k{}", i).as_bytes()).unwrap();
        assert!(partition < 5);
    }
}

#[test]
fn test_routing_uses_every_partition() {
    let ring = PartitionRing::new("orders", 8);
    let mut counts: HashMap<u32, usize> = HashMap::new();
    for i in 0..4000 {
        let partition = ring.partition_for(format!("key-{}", i).as_bytes()).unwrap();
        *counts.entry(partition).or_default() += 1;
    }

    assert_eq!(counts.len(), 8);
    for count in counts.values() {
        // Loose bound: no partition gets less than a fifth of its fair share.
        assert!(*count > 100, "partition too cold: {:?}", counts);
    }
}

#[test]
fn test_empty_key_routes() {
    let ring = PartitionRing::new("orders", 3);
    assert!(ring.partition_for(b"").is_some());
}

#[test]
fn test_hash_key_is_deterministic() {
    assert_eq!(hash_key(b"customer-1"), hash_key(b"customer-1"));
    assert_ne!(hash_key(b"customer-1"), hash_key(b"customer-2"));
}

// ============================================================================
// StorageRing
// ============================================================================

#[test]
fn test_no_members_means_no_owner() {
    let ring = StorageRing::from_members(Vec::<&str>::new());
    assert_eq!(ring.owner("orders", 0), None);
    assert_eq!(ring.member_count(), 0);
}

#[test]
fn test_single_member_owns_everything() {
    let ring = StorageRing::from_members(["n1"]);
    for partition in 0..16 {
        assert_eq!(ring.owner("orders", partition).as_deref(), Some("n1"));
    }
}

#[test]
fn test_placement_ignores_member_order() {
    let forward = StorageRing::from_members(["n1", "n2", "n3"]);
    let backward = StorageRing::from_members(["n3", "n2", "n1", "n2"]);
    assert_eq!(backward.member_count(), 3);

    for partition in 0..64 {
        assert_eq!(
            forward.owner("orders", partition),
            backward.owner("orders", partition)
        );
    }
}

#[test]
fn test_removing_a_member_only_moves_its_partitions() {
    let before = StorageRing::from_members(["n1", "n2", "n3"]);
    let after = StorageRing::from_members(["n1", "n2"]);

    for partition in 0..128 {
        let old_owner = before.owner("orders", partition).unwrap();
        let new_owner = after.owner("orders", partition).unwrap();
        if old_owner != "n3" {
            assert_eq!(old_owner, new_owner);
        } else {
            assert_ne!(new_owner, "n3");
        }
    }
}
