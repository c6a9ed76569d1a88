//! Registry facade over a metadata store and an object store.

use crate::error::{RegistryError, RegistryResult};
use crate::intake::{StagedFile, UploadIntake};
use crate::saga::CreationSaga;
use bytes::Bytes;
use lineage_core::{EntityDraft, EntityId, EntityKind, Upload, UploadId, VersionedEntity};
use lineage_metadata::{EntityCatalog, EntityRepo, MetadataStore, TxHandle};
use lineage_storage::ObjectStore;
use std::sync::Arc;

/// Dataset and model registry.
///
/// `Tx` is the transaction handle of the metadata store in use.
pub struct Registry<Tx: TxHandle + 'static> {
    store: Arc<dyn MetadataStore<Tx>>,
    storage: Arc<dyn ObjectStore>,
    intake: UploadIntake,
}

impl<Tx> Registry<Tx>
where
    Tx: TxHandle + 'static,
{
    pub fn new<S>(store: Arc<S>, storage: Arc<dyn ObjectStore>) -> Self
    where
        S: MetadataStore<Tx> + 'static,
    {
        let intake = UploadIntake::new(store.clone(), storage.clone());
        Self {
            store,
            storage,
            intake,
        }
    }

    /// Saga creating entities of `kind`.
    pub fn saga(&self, kind: EntityKind) -> CreationSaga<Tx> {
        CreationSaga::new(
            self.store.clone(),
            self.store.entities(kind),
            self.store.clone(),
            self.storage.clone(),
        )
    }

    pub async fn create(
        &self,
        kind: EntityKind,
        draft: &EntityDraft,
    ) -> RegistryResult<VersionedEntity> {
        self.saga(kind).create(draft).await
    }

    /// Committed entities of `kind`, oldest first.
    pub async fn list(&self, kind: EntityKind) -> RegistryResult<Vec<VersionedEntity>> {
        self.store
            .entities(kind)
            .list()
            .await
            .map_err(RegistryError::persistence("list entities", None))
    }

    pub async fn get(
        &self,
        kind: EntityKind,
        id: EntityId,
    ) -> RegistryResult<Option<VersionedEntity>> {
        self.store
            .entities(kind)
            .get(id)
            .await
            .map_err(RegistryError::persistence("get entity", None))
    }

    pub async fn stage_upload(&self, files: Vec<StagedFile>) -> RegistryResult<Upload> {
        self.intake.stage(files).await
    }

    pub async fn upload(&self, upload_id: UploadId) -> RegistryResult<Upload> {
        self.intake.upload(upload_id).await
    }

    pub async fn read_artifact(&self, upload_id: UploadId, artifact: &str) -> RegistryResult<Bytes> {
        self.intake.read_artifact(upload_id, artifact).await
    }

    /// Check the metadata store, then the object store.
    pub async fn health_check(&self) -> RegistryResult<()> {
        self.store
            .health_check()
            .await
            .map_err(RegistryError::persistence("metadata health check", None))?;
        self.storage.health_check().await?;
        Ok(())
    }
}
