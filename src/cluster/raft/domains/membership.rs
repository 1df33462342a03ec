//! Membership domain for the shard state machine.
//!
//! Holds the replicated member map of one shard. It is mutated only by
//! committed `AddMember` / `RemoveMember` commands, both of which are
//! idempotent: the reconciler may re-issue them after a retry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cluster::raft::commands::CommandResponse;

/// A replicated member of a shard.
///
/// The leader flag is deliberately absent: it is derived locally by each
/// observer and is not replicated truth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberRecord {
    pub node_id: String,
    pub address: String,
}

/// State for the membership domain.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct MembershipDomainState {
    /// Members by node id.
    pub members: BTreeMap<String, MemberRecord>,
}

impl MembershipDomainState {
    /// Create a new empty membership state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a member. A repeated add is a no-op reported as `already_present`;
    /// a changed address is updated in place.
    pub fn add(&mut self, node_id: String, address: String) -> CommandResponse {
        match self.members.get_mut(&node_id) {
            Some(existing) => {
                if existing.address != address {
                    tracing::info!(
                        node_id = %node_id,
                        old_address = %existing.address,
                        new_address = %address,
                        "Member address updated"
                    );
                    existing.address = address;
                }
                CommandResponse::MemberAdded {
                    node_id,
                    already_present: true,
                }
            }
            None => {
                self.members.insert(
                    node_id.clone(),
                    MemberRecord {
                        node_id: node_id.clone(),
                        address,
                    },
                );
                CommandResponse::MemberAdded {
                    node_id,
                    already_present: false,
                }
            }
        }
    }

    /// Remove a member. Removing an absent member is a no-op, not an error.
    pub fn remove(&mut self, node_id: String) -> CommandResponse {
        let was_present = self.members.remove(&node_id).is_some();
        CommandResponse::MemberRemoved {
            node_id,
            was_present,
        }
    }

    /// Check if a member is present.
    pub fn contains(&self, node_id: &str) -> bool {
        self.members.contains_key(node_id)
    }

    /// Get a member by id.
    pub fn get(&self, node_id: &str) -> Option<&MemberRecord> {
        self.members.get(node_id)
    }

    /// Member ids in sorted order.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
