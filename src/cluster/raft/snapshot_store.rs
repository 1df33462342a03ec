//! Durable snapshot persistence for a shard.
//!
//! Snapshots are written to an object store under
//! `{prefix}/shard-{id}/current.snapshot`. The envelope inside the blob is
//! versioned and validated by the state machine on restore; this module only
//! moves bytes.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use object_store::ObjectStore;
use object_store::path::Path as ObjectPath;
use tracing::{debug, error, info};

use crate::cluster::metrics;
use crate::constants::SNAPSHOT_OBJECT_NAME;
use crate::error::{JetError, JetResult};

/// Object-store-backed snapshot storage for one shard.
pub struct SnapshotStore {
    object_store: Arc<dyn ObjectStore>,
    /// Directory of this shard's snapshots.
    snapshot_path: String,
}

impl SnapshotStore {
    /// Create a store for `shard_id` under `prefix`.
    pub fn new(object_store: Arc<dyn ObjectStore>, prefix: &str, shard_id: &str) -> Self {
        let snapshot_path = if prefix.is_empty() {
            format!("shard-{}", shard_id)
        } else {
            format!("{}/shard-{}", prefix, shard_id)
        };
        Self {
            object_store,
            snapshot_path,
        }
    }

    /// Location of the current snapshot.
    pub fn current_path(&self) -> ObjectPath {
        ObjectPath::from(format!("{}/{}", self.snapshot_path, SNAPSHOT_OBJECT_NAME))
    }

    fn temp_path(&self, last_applied_index: u64) -> ObjectPath {
        ObjectPath::from(format!(
            "{}/temp-{}.snapshot",
            self.snapshot_path, last_applied_index
        ))
    }

    /// Load the current snapshot.
    ///
    /// # Returns
    /// - `Ok(Some(bytes))` if a snapshot exists
    /// - `Ok(None)` if no snapshot exists (clean start)
    /// - `Err(...)` if the snapshot exists but cannot be read; startup should fail
    ///   rather than continue from an empty state
    pub async fn load(&self) -> JetResult<Option<Bytes>> {
        self.cleanup_temp_files().await;

        let path = self.current_path();
        match self.object_store.get(&path).await {
            Ok(result) => match result.bytes().await {
                Ok(bytes) => {
                    metrics::record_snapshot("load", true);
                    info!(path = %path, size_bytes = bytes.len(), "Loaded snapshot from object store");
                    Ok(Some(bytes))
                }
                Err(e) => {
                    metrics::record_snapshot("load", false);
                    error!(
                        error = %e,
                        path = %path,
                        "CORRUPTION: Snapshot file exists but failed to read bytes"
                    );
                    Err(JetError::CorruptSnapshot(format!(
                        "failed to read {}: {}",
                        path, e
                    )))
                }
            },
            Err(object_store::Error::NotFound { .. }) => {
                debug!(path = %path, "No existing snapshot found in object store (clean start)");
                Ok(None)
            }
            Err(e) => {
                metrics::record_snapshot("load", false);
                error!(error = %e, "Failed to access snapshot from object store");
                Err(e.into())
            }
        }
    }

    /// Persist a snapshot.
    ///
    /// The blob is written to a temporary object and then renamed over the
    /// current one, falling back to copy + delete on backends without rename.
    /// A crash before the rename leaves the previous snapshot intact and an
    /// orphaned temp object that the next [`load`](Self::load) removes.
    pub async fn persist(&self, last_applied_index: u64, data: Bytes) -> JetResult<()> {
        let temp_path = self.temp_path(last_applied_index);
        let final_path = self.current_path();
        let size = data.len();

        if let Err(e) = self.object_store.put(&temp_path, data.into()).await {
            metrics::record_snapshot("persist", false);
            error!(error = %e, "Failed to write snapshot to temp path");
            return Err(e.into());
        }

        if let Err(e) = self.object_store.rename(&temp_path, &final_path).await {
            if let Err(copy_err) = self.object_store.copy(&temp_path, &final_path).await {
                metrics::record_snapshot("persist", false);
                error!(error = %copy_err, "Failed to copy snapshot to final path");
                let _ = self.object_store.delete(&temp_path).await;
                return Err(copy_err.into());
            }
            let _ = self.object_store.delete(&temp_path).await;
            debug!(error = %e, "Used copy+delete fallback for snapshot (rename not supported)");
        }

        metrics::record_snapshot("persist", true);
        info!(
            last_applied_index,
            size_bytes = size,
            path = %final_path,
            "Persisted snapshot to object store"
        );
        Ok(())
    }

    /// Remove temp objects left behind by interrupted writes.
    async fn cleanup_temp_files(&self) {
        let prefix = ObjectPath::from(self.snapshot_path.as_str());
        let mut stream = self.object_store.list(Some(&prefix));

        let mut temp_files: Vec<ObjectPath> = Vec::new();
        while let Some(result) = stream.next().await {
            match result {
                Ok(meta) => {
                    if meta
                        .location
                        .filename()
                        .is_some_and(|name| name.starts_with("temp-") && name.ends_with(".snapshot"))
                    {
                        temp_files.push(meta.location);
                    }
                }
                Err(e) => {
                    debug!(error = %e, "Error listing files during temp cleanup");
                }
            }
        }
        drop(stream);

        for path in temp_files {
            match self.object_store.delete(&path).await {
                Ok(()) => info!(path = %path, "Cleaned up orphaned temp snapshot file"),
                Err(e) => {
                    debug!(error = %e, path = %path, "Failed to delete temp file (may already be gone)")
                }
            }
        }
    }
}
