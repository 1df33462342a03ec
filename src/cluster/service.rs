//! Client-facing broker operations.
//!
//! `BrokerService` is the logical RPC surface of a node: it validates
//! requests, turns writes into replicated commands on the local shard and
//! answers reads from the shard and the cluster directory. The transport that
//! carries these calls lives outside this crate.
//!
//! | Operation          | Path                                   |
//! |--------------------|----------------------------------------|
//! | `publish_messages` | `Publish` command → assigned offsets   |
//! | `create_topic`     | `CreateTopic` command                  |
//! | `create_consumer`  | unimplemented                          |
//! | `consume`          | unimplemented                          |
//! | `get_shard_info`   | local shard membership                 |
//! | `get_cluster_info` | cluster directory                      |
//!
//! Errors carry their [`ErrorClass`](crate::error::ErrorClass): retriable
//! ones (`NotLeader` with a leader hint, `Timeout`) should be retried against
//! the leader, rejections should be reported.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::directory::ClusterDirectory;
use super::raft::{CommandResponse, KeyValue, PublishedMessage, WriteOperation};
use super::shard::{Shard, ShardInfo};
use super::validation::{validate_id, validate_partition_count, validate_topic_name};
use crate::error::{JetError, JetResult};

/// Result of a successful `create_topic`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedTopic {
    pub topic: String,
    pub partitions: u32,
    /// Storage node of each partition, by partition number.
    pub storage_nodes: Vec<Option<String>>,
}

/// Broker operations served by this node.
pub struct BrokerService {
    shard: Arc<Shard>,
    directory: Arc<ClusterDirectory>,
}

impl BrokerService {
    pub fn new(shard: Arc<Shard>, directory: Arc<ClusterDirectory>) -> Self {
        Self { shard, directory }
    }

    /// Route messages to partitions and assign their offsets.
    #[tracing::instrument(skip(self, messages), fields(shard_id = %self.shard.shard_id(), message_count = messages.len()))]
    pub async fn publish_messages(
        &self,
        topic: &str,
        messages: Vec<KeyValue>,
    ) -> JetResult<Vec<PublishedMessage>> {
        validate_topic_name(topic)?;
        if messages.is_empty() {
            return Err(JetError::InvalidRequest(
                "Publish requires at least one message".to_string(),
            ));
        }

        let response = self
            .shard
            .submit(WriteOperation::Publish {
                topic: topic.to_string(),
                messages,
            })
            .await?;

        match response {
            CommandResponse::Published { messages } => {
                debug!(published = messages.len(), "Published messages");
                Ok(messages)
            }
            other => Err(JetError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// Create a topic with `partitions` partitions.
    #[tracing::instrument(skip(self), fields(shard_id = %self.shard.shard_id()))]
    pub async fn create_topic(&self, topic: &str, partitions: u32) -> JetResult<CreatedTopic> {
        validate_topic_name(topic)?;
        validate_partition_count(partitions)?;

        let response = self
            .shard
            .submit(WriteOperation::CreateTopic {
                topic: topic.to_string(),
                partitions,
            })
            .await?;

        match response {
            CommandResponse::TopicCreated {
                topic,
                partitions,
                storage_nodes,
            } => Ok(CreatedTopic {
                topic,
                partitions,
                storage_nodes,
            }),
            other => Err(JetError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// Reserved.
    pub async fn create_consumer(&self, topic: &str, consumer_id: &str) -> JetResult<()> {
        validate_topic_name(topic)?;
        validate_id(consumer_id, "Consumer id")?;
        Err(JetError::Unimplemented("CreateConsumer"))
    }

    /// Reserved.
    pub async fn consume(&self, topic: &str, consumer_id: &str) -> JetResult<()> {
        validate_topic_name(topic)?;
        validate_id(consumer_id, "Consumer id")?;
        Err(JetError::Unimplemented("Consume"))
    }

    /// Membership of the local shard.
    pub async fn get_shard_info(&self) -> ShardInfo {
        self.shard.shard_info().await
    }

    /// Every shard this node knows about.
    pub async fn get_cluster_info(&self) -> BTreeMap<String, ShardInfo> {
        self.directory.get_cluster_info().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ShardConfig;
    use crate::cluster::raft::LocalEngine;
    use crate::error::ErrorClass;

    async fn leader_service() -> (BrokerService, Arc<Shard>, Arc<LocalEngine>) {
        let config = ShardConfig {
            node_id: "n1".to_string(),
            shard_id: "s0".to_string(),
            ..Default::default()
        };
        let (shard, engine) = Shard::open_local(&config).await.unwrap();
        engine.become_leader();
        for _ in 0..200 {
            if shard.state_machine().contains_member("n1").await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let shard = Arc::new(shard);
        let directory = Arc::new(ClusterDirectory::new());
        directory.add_local(shard.clone());
        (
            BrokerService::new(shard.clone(), directory),
            shard,
            engine,
        )
    }

    #[tokio::test]
    async fn test_create_topic_then_publish() {
        let (service, shard, _engine) = leader_service().await;

        let created = service.create_topic("orders", 3).await.unwrap();
        assert_eq!(created.partitions, 3);
        assert_eq!(created.storage_nodes, vec![Some("n1".to_string()); 3]);

        let published = service
            .publish_messages(
                "orders",
                vec![KeyValue::new("a", "1"), KeyValue::new("a", "2")],
            )
            .await
            .unwrap();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].partition, published[1].partition);
        assert_eq!(published[1].offset, published[0].offset + 1);

        shard.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_topic_is_rejected() {
        let (service, shard, _engine) = leader_service().await;

        service.create_topic("orders", 3).await.unwrap();
        let err = service.create_topic("orders", 3).await.unwrap_err();
        assert!(matches!(err, JetError::TopicAlreadyExists(_)));
        assert_eq!(err.class(), ErrorClass::Rejected);

        shard.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_requests_never_reach_the_log() {
        let (service, shard, engine) = leader_service().await;
        let entries_before = engine.log_entries().len();

        assert!(service.create_topic("bad/name", 3).await.is_err());
        assert!(service.create_topic("orders", 0).await.is_err());
        assert!(service.publish_messages("orders", Vec::new()).await.is_err());

        assert_eq!(engine.log_entries().len(), entries_before);
        shard.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_consumer_operations_are_unimplemented() {
        let (service, shard, _engine) = leader_service().await;

        let err = service.create_consumer("orders", "c1").await.unwrap_err();
        assert!(matches!(err, JetError::Unimplemented("CreateConsumer")));
        let err = service.consume("orders", "c1").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Unimplemented);

        shard.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_surface() {
        let (service, shard, _engine) = leader_service().await;

        let cluster = service.get_cluster_info().await;
        assert_eq!(cluster.len(), 1);
        assert_eq!(service.get_shard_info().await.shard_id, "s0");

        shard.shutdown().await.unwrap();
    }
}
