//! Transactional creation of a versioned entity and the claiming of its uploads.

use crate::error::{RegistryError, RegistryResult, TxStep};
use lineage_core::upload::entity_dir;
use lineage_core::{EntityDraft, EntityKind, UploadId, UploadOwner, VersionedEntity};
use lineage_metadata::{EntityRepo, MetadataError, TxBeginner, TxHandle, UploadLedger};
use lineage_storage::FileMover;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

/// Creates one kind of entity and moves the files of every upload it names
/// into the entity's own storage directory.
///
/// The entity insert and every upload update share one transaction. File
/// moves are not transactional: a move that succeeded before a later step
/// failed stays in place after the rollback.
pub struct CreationSaga<Tx: TxHandle + 'static> {
    kind: EntityKind,
    db: Arc<dyn TxBeginner<Tx>>,
    entities: Arc<dyn EntityRepo<Tx>>,
    uploads: Arc<dyn UploadLedger<Tx>>,
    mover: Arc<dyn FileMover>,
}

impl<Tx> CreationSaga<Tx>
where
    Tx: TxHandle + 'static,
{
    pub fn new(
        db: Arc<dyn TxBeginner<Tx>>,
        entities: Arc<dyn EntityRepo<Tx>>,
        uploads: Arc<dyn UploadLedger<Tx>>,
        mover: Arc<dyn FileMover>,
    ) -> Self {
        Self {
            kind: entities.kind(),
            db,
            entities,
            uploads,
            mover,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Insert the entity described by `draft` and claim its uploads.
    ///
    /// Uploads are processed one at a time in ascending artifact-name order.
    /// The returned entity has an empty artifact map; read it back with
    /// `get` or `list` for the committed view.
    #[instrument(
        skip(self, draft),
        fields(kind = %self.kind, name = %draft.name, entity_id = tracing::field::Empty)
    )]
    pub async fn create(&self, draft: &EntityDraft) -> RegistryResult<VersionedEntity> {
        let mut tx = self.db.begin().await.map_err(|source| RegistryError::Transaction {
            step: TxStep::Begin,
            source,
        })?;

        let entity = match self.run(&mut tx, draft).await {
            Ok(entity) => entity,
            Err(cause) => return Err(abort(&mut tx, cause).await),
        };

        if let Err(source) = tx.commit().await {
            let cause = RegistryError::Transaction {
                step: TxStep::Commit,
                source,
            };
            // The backend may already have discarded the transaction; roll
            // back regardless.
            return Err(abort(&mut tx, cause).await);
        }

        tracing::info!(
            entity_id = %entity.id,
            uploads = draft.artifacts.len(),
            "Created {}",
            self.kind
        );
        Ok(entity)
    }

    async fn run(&self, tx: &mut Tx, draft: &EntityDraft) -> RegistryResult<VersionedEntity> {
        let entity = self
            .entities
            .insert_within(tx, draft)
            .await
            .map_err(RegistryError::persistence("insert entity", None))?;
        tracing::Span::current().record("entity_id", tracing::field::display(entity.id));

        for (artifact, upload_id) in &draft.artifacts {
            self.claim_upload(tx, &entity, artifact, *upload_id).await?;
        }

        Ok(entity)
    }

    /// Fetch, relocate, then hand one unclaimed upload to `entity`.
    async fn claim_upload(
        &self,
        tx: &mut Tx,
        entity: &VersionedEntity,
        artifact: &str,
        upload_id: UploadId,
    ) -> RegistryResult<()> {
        let mut upload = self
            .uploads
            .fetch_within(tx, upload_id)
            .await
            .map_err(|source| match source {
                MetadataError::NotFound(_) => RegistryError::UploadNotFound { upload_id },
                source => RegistryError::Persistence {
                    operation: "fetch upload",
                    upload_id: Some(upload_id),
                    source,
                },
            })?;
        if let Some(owner) = upload.owner {
            return Err(RegistryError::UploadAlreadyClaimed { upload_id, owner });
        }

        let dir = entity_dir(self.kind, entity.id);
        let mut files = BTreeMap::new();
        for (name, file) in &upload.files {
            let moved = file.relocated(&dir);
            let (from, to) = (file.location(), moved.location());
            self.mover
                .move_file(&from, &to)
                .await
                .map_err(|source| RegistryError::StorageMove {
                    upload_id,
                    from: from.clone(),
                    to: to.clone(),
                    source,
                })?;
            tracing::debug!(%upload_id, %from, %to, "Relocated file");
            files.insert(name.clone(), moved);
        }

        upload.files = files;
        upload.claim(UploadOwner::new(self.kind, entity.id), artifact);

        self.uploads
            .update_within(tx, &upload)
            .await
            .map_err(RegistryError::persistence("update upload", Some(upload_id)))?;

        tracing::debug!(%upload_id, artifact, files = upload.files.len(), "Claimed upload");
        Ok(())
    }
}

/// Roll back after `cause`, keeping `cause` as the reported failure.
async fn abort<Tx: TxHandle>(tx: &mut Tx, cause: RegistryError) -> RegistryError {
    match tx.rollback().await {
        Ok(()) => {
            tracing::warn!(error = %cause, "Entity creation rolled back");
            cause
        }
        Err(source) => {
            tracing::error!(error = %cause, rollback_error = %source, "Rollback failed");
            RegistryError::RollbackFailed {
                cause: Box::new(cause),
                source,
            }
        }
    }
}
