//! Upload ledger repository.

use crate::error::MetadataResult;
use async_trait::async_trait;
use lineage_core::{Upload, UploadId};

/// Upload reads and writes that take part in a creation transaction.
#[async_trait]
pub trait UploadLedger<Tx: Send>: Send + Sync {
    /// Fetch an upload inside `tx`.
    ///
    /// Returns [`MetadataError::NotFound`](crate::MetadataError::NotFound)
    /// when no upload has this id.
    async fn fetch_within(&self, tx: &mut Tx, upload_id: UploadId) -> MetadataResult<Upload>;

    /// Replace the stored upload with `upload` inside `tx`.
    ///
    /// Both the file map and the owner are overwritten. Fails with
    /// `NotFound` if the upload does not exist.
    async fn update_within(&self, tx: &mut Tx, upload: &Upload) -> MetadataResult<()>;
}

/// Upload operations outside of any transaction.
#[async_trait]
pub trait UploadRepo: Send + Sync {
    /// Record a freshly staged upload.
    async fn create_upload(&self, upload: &Upload) -> MetadataResult<()>;

    /// Get an upload by id.
    async fn get_upload(&self, upload_id: UploadId) -> MetadataResult<Option<Upload>>;
}
