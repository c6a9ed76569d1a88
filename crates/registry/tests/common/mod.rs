//! Common test utilities and fixtures.

pub mod mocks;

#[allow(unused_imports)]
pub use mocks::*;

use bytes::Bytes;
use lineage_metadata::SqliteStore;
use lineage_registry::{Registry, StagedFile};
use lineage_storage::{FilesystemBackend, ObjectStore};
use std::sync::Arc;
use tempfile::TempDir;

/// A registry over a file-backed SQLite database and filesystem storage.
#[allow(dead_code)]
pub struct TestRegistry {
    pub registry: Registry<lineage_metadata::SqliteTx>,
    pub storage: Arc<FilesystemBackend>,
    pub store: Arc<SqliteStore>,
    _dir: TempDir,
}

#[allow(dead_code)]
impl TestRegistry {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            SqliteStore::new(dir.path().join("metadata.db"), 4)
                .await
                .unwrap(),
        );
        let storage = Arc::new(
            FilesystemBackend::new(dir.path().join("storage"))
                .await
                .unwrap(),
        );
        let registry = Registry::new(store.clone(), storage.clone() as Arc<dyn ObjectStore>);
        Self {
            registry,
            storage,
            store,
            _dir: dir,
        }
    }

    pub fn storage_root(&self) -> std::path::PathBuf {
        self._dir.path().join("storage")
    }
}

#[allow(dead_code)]
pub fn staged(artifact: &str, filename: &str, data: &'static [u8]) -> StagedFile {
    StagedFile::new(artifact, filename, Bytes::from_static(data))
}
