//! Database models mapping to the metadata schema.

use crate::error::MetadataResult;
use lineage_core::{
    ArtifactRef, EntityId, EntityKind, ModelDetails, Upload, UploadId, UploadOwner,
    VersionedEntity,
};
use sqlx::FromRow;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Entities
// =============================================================================

/// Columns shared by the `datasets` and `models` tables.
#[derive(Debug, Clone, FromRow)]
pub struct EntityRow {
    pub entity_id: Uuid,
    pub name: String,
    pub parent_id: Option<Uuid>,
    pub version: String,
    pub description: String,
    pub created_at: OffsetDateTime,
}

/// Model record: the shared columns plus the model payload.
#[derive(Debug, Clone, FromRow)]
pub struct ModelRow {
    #[sqlx(flatten)]
    pub entity: EntityRow,
    pub dataset_id: Option<Uuid>,
    /// JSON documents, stored as text.
    pub config: String,
    pub metadata: String,
    pub environment: String,
    pub evaluation: String,
}

impl EntityRow {
    pub fn into_entity(self, kind: EntityKind) -> VersionedEntity {
        VersionedEntity {
            id: EntityId::from(self.entity_id),
            kind,
            name: self.name,
            parent: self.parent_id.map(EntityId::from),
            version: self.version,
            description: self.description,
            artifacts: BTreeMap::new(),
            model: None,
            created_at: self.created_at,
        }
    }
}

impl ModelRow {
    pub fn into_entity(self) -> MetadataResult<VersionedEntity> {
        let details = ModelDetails {
            dataset: self.dataset_id.map(EntityId::from),
            config: serde_json::from_str(&self.config)?,
            metadata: serde_json::from_str(&self.metadata)?,
            environment: serde_json::from_str(&self.environment)?,
            evaluation: serde_json::from_str(&self.evaluation)?,
        };
        let mut entity = self.entity.into_entity(EntityKind::Model);
        entity.model = Some(details);
        Ok(entity)
    }
}

/// Serialized model payload, ready to bind.
#[derive(Debug, Clone)]
pub struct ModelColumns {
    pub dataset_id: Option<Uuid>,
    pub config: String,
    pub metadata: String,
    pub environment: String,
    pub evaluation: String,
}

impl ModelColumns {
    pub fn from_details(details: Option<&ModelDetails>) -> MetadataResult<Self> {
        let fallback = ModelDetails::default();
        let details = details.unwrap_or(&fallback);
        Ok(Self {
            dataset_id: details.dataset.map(Uuid::from),
            config: serde_json::to_string(&details.config)?,
            metadata: serde_json::to_string(&details.metadata)?,
            environment: serde_json::to_string(&details.environment)?,
            evaluation: serde_json::to_string(&details.evaluation)?,
        })
    }
}

// =============================================================================
// Uploads
// =============================================================================

/// Upload record. `files` holds the JSON-encoded artifact map.
#[derive(Debug, Clone, FromRow)]
pub struct UploadRow {
    pub upload_id: Uuid,
    pub files: String,
    pub dataset_id: Option<Uuid>,
    pub model_id: Option<Uuid>,
    pub artifact_name: Option<String>,
    pub created_at: OffsetDateTime,
}

impl UploadRow {
    pub fn from_upload(upload: &Upload) -> MetadataResult<Self> {
        Ok(Self {
            upload_id: Uuid::from(upload.id),
            files: serde_json::to_string(&upload.files)?,
            dataset_id: upload
                .owner
                .and_then(|owner| owner.dataset_id())
                .map(Uuid::from),
            model_id: upload
                .owner
                .and_then(|owner| owner.model_id())
                .map(Uuid::from),
            artifact_name: upload.claimed_as.clone(),
            created_at: upload.created_at,
        })
    }

    pub fn into_upload(self) -> MetadataResult<Upload> {
        let files: BTreeMap<String, ArtifactRef> = serde_json::from_str(&self.files)?;
        let owner = match (self.dataset_id, self.model_id) {
            (Some(id), _) => Some(UploadOwner::Dataset(EntityId::from(id))),
            (None, Some(id)) => Some(UploadOwner::Model(EntityId::from(id))),
            (None, None) => None,
        };
        Ok(Upload {
            id: UploadId::from(self.upload_id),
            files,
            owner,
            claimed_as: self.artifact_name,
            created_at: self.created_at,
        })
    }
}

/// Fill each entity's artifact map from the uploads it owns.
///
/// Each owned upload contributes one entry: the name it was claimed under.
pub(crate) fn attach_artifacts(
    entities: &mut [VersionedEntity],
    owned: Vec<UploadRow>,
) -> MetadataResult<()> {
    let mut by_owner: BTreeMap<EntityId, BTreeMap<String, UploadId>> = BTreeMap::new();
    for row in owned {
        let upload = row.into_upload()?;
        let (Some(owner), Some(name)) = (upload.owner, upload.claimed_as) else {
            continue;
        };
        by_owner
            .entry(owner.entity_id())
            .or_default()
            .insert(name, upload.id);
    }

    for entity in entities.iter_mut() {
        if let Some(artifacts) = by_owner.remove(&entity.id) {
            entity.artifacts = artifacts;
        }
    }
    Ok(())
}
