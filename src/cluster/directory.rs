//! Cluster directory.
//!
//! Maps shard id → [`ShardInfo`] for every shard this node knows about. Local
//! shards are read live; entries for remote shards are eventually-consistent
//! copies pushed in by whatever gossip or query mechanism the deployment uses.
//! A local shard always wins over a remote copy with the same id.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::shard::{Shard, ShardInfo};
use crate::error::JetResult;

/// Directory of all shards known to this node.
#[derive(Default)]
pub struct ClusterDirectory {
    local: DashMap<String, Arc<Shard>>,
    remote: DashMap<String, ShardInfo>,
}

impl ClusterDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shard hosted on this node.
    pub fn add_local(&self, shard: Arc<Shard>) {
        let shard_id = shard.shard_id().to_string();
        debug!(shard_id = %shard_id, "Registered local shard");
        self.local.insert(shard_id, shard);
    }

    /// Deregister a local shard, returning it.
    pub fn remove_local(&self, shard_id: &str) -> Option<Arc<Shard>> {
        self.local.remove(shard_id).map(|(_, shard)| shard)
    }

    /// Look up a local shard.
    pub fn local_shard(&self, shard_id: &str) -> Option<Arc<Shard>> {
        self.local.get(shard_id).map(|entry| entry.value().clone())
    }

    /// Ids of local shards, sorted.
    pub fn local_shard_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.local.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Record what is known about a remote shard, replacing older copies.
    pub fn upsert_remote(&self, info: ShardInfo) {
        debug!(shard_id = %info.shard_id, members = info.members.len(), "Updated remote shard info");
        self.remote.insert(info.shard_id.clone(), info);
    }

    /// Forget a remote shard.
    pub fn remove_remote(&self, shard_id: &str) -> Option<ShardInfo> {
        self.remote.remove(shard_id).map(|(_, info)| info)
    }

    /// Snapshot of the whole directory.
    ///
    /// Shard handles are collected before any of them is awaited, so no
    /// map shard lock is held across an await.
    pub async fn get_cluster_info(&self) -> BTreeMap<String, ShardInfo> {
        let mut cluster: BTreeMap<String, ShardInfo> = self
            .remote
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let local: Vec<Arc<Shard>> = self.local.iter().map(|e| e.value().clone()).collect();
        for shard in local {
            cluster.insert(shard.shard_id().to_string(), shard.shard_info().await);
        }
        cluster
    }

    /// The directory rendered as JSON, keyed by shard id.
    pub async fn cluster_info_json(&self) -> JetResult<String> {
        Ok(serde_json::to_string_pretty(&self.get_cluster_info().await)?)
    }
}
