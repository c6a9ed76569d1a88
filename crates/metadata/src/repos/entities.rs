//! Dataset and model repositories.

use crate::error::MetadataResult;
use async_trait::async_trait;
use lineage_core::{EntityDraft, EntityId, EntityKind, VersionedEntity};
use std::sync::Arc;

/// Repository for one kind of versioned entity.
#[async_trait]
pub trait EntityRepo<Tx: Send>: Send + Sync {
    /// Kind of entity this repository persists.
    fn kind(&self) -> EntityKind;

    /// Insert a new revision inside `tx`, assigning it a fresh id.
    ///
    /// The returned entity carries an empty artifact map; artifacts are
    /// attached by relocating uploads afterwards.
    async fn insert_within(&self, tx: &mut Tx, draft: &EntityDraft)
    -> MetadataResult<VersionedEntity>;

    /// All committed revisions, oldest first, with their artifacts.
    async fn list(&self) -> MetadataResult<Vec<VersionedEntity>>;

    /// A single committed revision by id.
    async fn get(&self, id: EntityId) -> MetadataResult<Option<VersionedEntity>>;
}

/// Hands out the repository for each entity kind.
pub trait EntityCatalog<Tx: Send>: Send + Sync {
    fn entities(&self, kind: EntityKind) -> Arc<dyn EntityRepo<Tx>>;
}
