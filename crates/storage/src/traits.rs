//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use lineage_core::Provider;

/// Relocates a single object within one backend.
///
/// This is all the creation saga needs from storage.
#[async_trait]
pub trait FileMover: Send + Sync {
    /// Move the object at `from` to `to`.
    ///
    /// Missing parents of `to` are created. A missing source is
    /// [`StorageError::NotFound`](crate::StorageError::NotFound). An existing
    /// object at `to` is never replaced: the move fails with
    /// [`StorageError::AlreadyExists`](crate::StorageError::AlreadyExists)
    /// and the source stays where it was.
    async fn move_file(&self, from: &str, to: &str) -> StorageResult<()>;
}

/// Object store abstraction for artifact bytes.
#[async_trait]
pub trait ObjectStore: FileMover + Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Put an object atomically.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Delete an object.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Provider tag recorded on artifacts written to this store.
    fn provider(&self) -> Provider;

    /// Verify storage backend connectivity.
    ///
    /// The default implementation returns Ok(()), suitable for backends that
    /// don't require connectivity verification.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
