//! Object store creation.
//!
//! Snapshots and topic storage markers live in an object store. A node with
//! a `DATA_PATH` uses the local filesystem; without one everything stays in
//! memory, which is what tests and throwaway nodes want.

use object_store::ObjectStore;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use std::sync::Arc;
use tracing::info;

use super::config::ShardConfig;
use crate::error::{JetError, JetResult};

/// Create the object store described by `config`.
///
/// # Errors
///
/// Returns an error if the data directory cannot be created.
pub fn create_object_store(config: &ShardConfig) -> JetResult<Arc<dyn ObjectStore>> {
    match &config.data_path {
        Some(path) => {
            std::fs::create_dir_all(path).map_err(|e| {
                JetError::Config(format!(
                    "Failed to create data directory {}: {}",
                    path.display(),
                    e
                ))
            })?;

            let store = LocalFileSystem::new_with_prefix(path)?;
            info!(path = %path.display(), "Using local filesystem object store");
            Ok(Arc::new(store))
        }
        None => {
            info!("Using in-memory object store");
            Ok(Arc::new(InMemory::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use object_store::path::Path as ObjectPath;

    #[test]
    fn test_create_local_object_store_nested_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c");
        let config = ShardConfig {
            data_path: Some(path.clone()),
            ..Default::default()
        };

        assert!(create_object_store(&config).is_ok());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_local_store_basic_operations() {
        let dir = tempfile::tempdir().unwrap();
        let config = ShardConfig {
            data_path: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let store = create_object_store(&config).unwrap();

        let path = ObjectPath::from("marker");
        store
            .put(&path, Bytes::from_static(b"ok").into())
            .await
            .unwrap();
        let data = store.get(&path).await.unwrap().bytes().await.unwrap();
        assert_eq!(&data[..], b"ok");
        assert!(dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn test_in_memory_without_data_path() {
        let store = create_object_store(&ShardConfig::default()).unwrap();
        let path = ObjectPath::from("marker");
        store
            .put(&path, Bytes::from_static(b"ok").into())
            .await
            .unwrap();
        assert!(store.head(&path).await.is_ok());
    }

    #[test]
    fn test_data_path_is_a_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = ShardConfig {
            data_path: Some(file.path().join("nested")),
            ..Default::default()
        };
        assert!(matches!(
            create_object_store(&config),
            Err(JetError::Config(_))
        ));
    }
}
