//! Topic-level storage allocation.
//!
//! Creating a topic reserves a directory for its partitions in the durable
//! message store. The state machine calls [`TopicStorage::allocate`] before it
//! takes its write lock; a failure is reported back as a rejected
//! `CreateTopic`, never as a crash.
//!
//! Message bodies themselves are not written here.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::ObjectStore;
use object_store::path::Path as ObjectPath;
use tracing::{debug, warn};

use crate::error::JetResult;

use super::metrics;

/// Allocates per-topic storage.
#[async_trait]
pub trait TopicStorage: Send + Sync + 'static {
    /// Reserve storage for `topic`.
    ///
    /// Must be idempotent: replaying a `CreateTopic` after a restart calls it
    /// again for a topic whose storage already exists.
    async fn allocate(&self, topic: &str) -> JetResult<()>;
}

/// Topic storage backed by an object store.
///
/// Each topic gets a marker object at `{prefix}/topics/{topic}/.topic`;
/// partition data lives next to it.
pub struct ObjectStoreTopicStorage {
    object_store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectStoreTopicStorage {
    /// Create topic storage rooted at `prefix` in the given object store.
    pub fn new(object_store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            object_store,
            prefix: prefix.into(),
        }
    }

    /// Path of the marker object for `topic`.
    pub fn marker_path(&self, topic: &str) -> ObjectPath {
        if self.prefix.is_empty() {
            ObjectPath::from(format!("topics/{}/.topic", topic))
        } else {
            ObjectPath::from(format!("{}/topics/{}/.topic", self.prefix, topic))
        }
    }

    /// Check whether storage for `topic` has been allocated.
    pub async fn is_allocated(&self, topic: &str) -> JetResult<bool> {
        match self.object_store.head(&self.marker_path(topic)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl TopicStorage for ObjectStoreTopicStorage {
    async fn allocate(&self, topic: &str) -> JetResult<()> {
        let path = self.marker_path(topic);
        let result = self
            .object_store
            .put(&path, Bytes::copy_from_slice(topic.as_bytes()).into())
            .await;

        match result {
            Ok(_) => {
                metrics::record_storage_allocation(true);
                debug!(topic, path = %path, "Allocated topic storage");
                Ok(())
            }
            Err(e) => {
                metrics::record_storage_allocation(false);
                warn!(topic, path = %path, error = %e, "Failed to allocate topic storage");
                Err(e.into())
            }
        }
    }
}
