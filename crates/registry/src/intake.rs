//! Staging of uploaded files ahead of entity creation.

use crate::error::{RegistryError, RegistryResult};
use bytes::Bytes;
use lineage_core::upload::{staging_dir, validate_filename};
use lineage_core::{ArtifactRef, Upload, UploadId};
use lineage_metadata::UploadRepo;
use lineage_storage::ObjectStore;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::instrument;

/// One file of an upload batch.
#[derive(Clone, Debug)]
pub struct StagedFile {
    /// Name the file is referenced by once claimed.
    pub artifact: String,
    /// Object name inside the upload directory.
    pub filename: String,
    pub data: Bytes,
}

impl StagedFile {
    pub fn new(artifact: impl Into<String>, filename: impl Into<String>, data: Bytes) -> Self {
        Self {
            artifact: artifact.into(),
            filename: filename.into(),
            data,
        }
    }
}

/// Writes upload batches to temporary storage and records them unclaimed.
#[derive(Clone)]
pub struct UploadIntake {
    uploads: Arc<dyn UploadRepo>,
    storage: Arc<dyn ObjectStore>,
}

impl UploadIntake {
    pub fn new(uploads: Arc<dyn UploadRepo>, storage: Arc<dyn ObjectStore>) -> Self {
        Self { uploads, storage }
    }

    /// Stage `files` under a fresh upload id.
    #[instrument(skip(self, files), fields(files = files.len(), upload_id = tracing::field::Empty))]
    pub async fn stage(&self, files: Vec<StagedFile>) -> RegistryResult<Upload> {
        check_batch(&files)?;

        let upload_id = UploadId::new();
        tracing::Span::current().record("upload_id", tracing::field::display(upload_id));
        let dir = staging_dir(upload_id);
        let provider = self.storage.provider();

        let mut refs = BTreeMap::new();
        let mut written = Vec::with_capacity(files.len());
        for file in files {
            let artifact_ref = ArtifactRef::new(provider, file.filename, dir.clone());
            let key = artifact_ref.location();
            if let Err(e) = self.storage.put(&key, file.data).await {
                self.discard(&written).await;
                return Err(e.into());
            }
            written.push(key);
            refs.insert(file.artifact, artifact_ref);
        }

        let upload = Upload::staged(upload_id, refs);
        if let Err(source) = self.uploads.create_upload(&upload).await {
            self.discard(&written).await;
            return Err(RegistryError::Persistence {
                operation: "record upload",
                upload_id: Some(upload_id),
                source,
            });
        }

        tracing::info!(%upload_id, files = upload.files.len(), "Staged upload");
        Ok(upload)
    }

    /// Look up an upload by id.
    pub async fn upload(&self, upload_id: UploadId) -> RegistryResult<Upload> {
        self.uploads
            .get_upload(upload_id)
            .await
            .map_err(RegistryError::persistence("get upload", Some(upload_id)))?
            .ok_or(RegistryError::UploadNotFound { upload_id })
    }

    /// Bytes of one artifact at its current location, staged or claimed.
    #[instrument(skip(self))]
    pub async fn read_artifact(&self, upload_id: UploadId, artifact: &str) -> RegistryResult<Bytes> {
        let upload = self.upload(upload_id).await?;
        let file = upload
            .files
            .get(artifact)
            .ok_or_else(|| RegistryError::ArtifactNotFound {
                upload_id,
                artifact: artifact.to_string(),
            })?;
        Ok(self.storage.get(&file.location()).await?)
    }

    /// Best-effort removal of objects written for a batch that was not recorded.
    async fn discard(&self, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.storage.delete(key).await {
                tracing::warn!(key = %key, error = %e, "Failed to discard staged object");
            }
        }
    }
}

fn check_batch(files: &[StagedFile]) -> RegistryResult<()> {
    if files.is_empty() {
        return Err(RegistryError::InvalidUpload(
            "an upload needs at least one file".to_string(),
        ));
    }

    let mut artifacts = BTreeSet::new();
    let mut filenames = BTreeSet::new();
    for file in files {
        if file.artifact.trim().is_empty() {
            return Err(RegistryError::InvalidUpload(
                "artifact names must not be empty".to_string(),
            ));
        }
        validate_filename(&file.filename)
            .map_err(|e| RegistryError::InvalidUpload(e.to_string()))?;
        if !artifacts.insert(file.artifact.as_str()) {
            return Err(RegistryError::InvalidUpload(format!(
                "duplicate artifact name: {:?}",
                file.artifact
            )));
        }
        if !filenames.insert(file.filename.as_str()) {
            return Err(RegistryError::InvalidUpload(format!(
                "duplicate filename: {:?}",
                file.filename
            )));
        }
    }
    Ok(())
}
