//! Where lineage keeps artifact bytes.
//!
//! Staged uploads are written with [`ObjectStore::put`]; entity creation only
//! needs [`FileMover::move_file`] to relocate them. Both traits are
//! implemented by a local filesystem backend and an S3-compatible one.

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, s3::S3Backend};
pub use error::{StorageError, StorageResult};
pub use traits::{FileMover, ObjectStore};

use lineage_core::config::StorageConfig;
use std::sync::Arc;

/// Open the backend selected by `config`.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match config {
        StorageConfig::Filesystem { path } => Arc::new(FilesystemBackend::new(path).await?),
        StorageConfig::S3 { .. } => Arc::new(S3Backend::connect(config).await?),
    };
    tracing::debug!(provider = %store.provider(), "Opened object store");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use lineage_core::Provider;

    #[tokio::test]
    async fn test_filesystem_store_moves_through_mover() {
        let temp = tempfile::tempdir().unwrap();
        let config = StorageConfig::Filesystem {
            path: temp.path().join("objects"),
        };
        let store = from_config(&config).await.unwrap();
        assert_eq!(store.provider(), Provider::Filesystem);
        store.health_check().await.unwrap();

        store
            .put("tmp/uploads/u1/a.csv", Bytes::from_static(b"1,2"))
            .await
            .unwrap();
        let mover: Arc<dyn FileMover> = store.clone();
        mover
            .move_file("tmp/uploads/u1/a.csv", "datasets/d1/a.csv")
            .await
            .unwrap();

        assert!(!store.exists("tmp/uploads/u1/a.csv").await.unwrap());
        assert!(temp.path().join("objects/datasets/d1/a.csv").is_file());
    }

    #[tokio::test]
    async fn test_s3_without_bucket_is_config_error() {
        let config = StorageConfig::S3 {
            bucket: " ".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
        };
        assert!(matches!(
            from_config(&config).await,
            Err(StorageError::Config(_))
        ));
    }
}
