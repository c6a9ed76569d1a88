//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{EntityRow, ModelColumns, ModelRow, UploadRow, attach_artifacts};
use crate::repos::{
    EntityCatalog, EntityRepo, TxBeginner, TxHandle, UploadLedger, UploadRepo,
};
use crate::tx::SqliteTx;
use async_trait::async_trait;
use lineage_core::{EntityDraft, EntityId, EntityKind, Upload, UploadId, VersionedEntity};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

const UPLOAD_COLUMNS: &str = "upload_id, files, dataset_id, model_id, artifact_name, created_at";

/// Combined metadata store trait.
///
/// `Tx` is the store's transaction handle type.
#[async_trait]
pub trait MetadataStore<Tx: TxHandle>:
    TxBeginner<Tx> + UploadLedger<Tx> + UploadRepo + EntityCatalog<Tx> + Send + Sync
{
    /// Create tables and indexes if they do not exist.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    ///
    /// A path of `:memory:` gives a private in-memory database.
    pub async fn new(path: impl AsRef<Path>, max_connections: u32) -> MetadataResult<Self> {
        let path = path.as_ref();
        let in_memory = path == Path::new(":memory:");

        let opts = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        };
        let opts = opts
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        // Every connection to `:memory:` opens its own database, and closing
        // the only one drops it.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };
        let max_connections = pool_options.get_max_connections();
        let pool = pool_options.connect_with(opts).await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(
            path = %path.display(),
            max_connections,
            "Opened SQLite metadata store"
        );

        Ok(store)
    }

    /// In-memory store, mostly for tests.
    pub async fn in_memory() -> MetadataResult<Self> {
        Self::new(":memory:", 1).await
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore<SqliteTx> for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl TxBeginner<SqliteTx> for SqliteStore {
    async fn begin(&self) -> MetadataResult<SqliteTx> {
        let tx = self.pool.begin().await?;
        Ok(SqliteTx::new(tx))
    }
}

impl EntityCatalog<SqliteTx> for SqliteStore {
    fn entities(&self, kind: EntityKind) -> Arc<dyn EntityRepo<SqliteTx>> {
        Arc::new(SqliteEntities {
            pool: self.pool.clone(),
            kind,
        })
    }
}

// =============================================================================
// Uploads
// =============================================================================

#[async_trait]
impl UploadRepo for SqliteStore {
    async fn create_upload(&self, upload: &Upload) -> MetadataResult<()> {
        let row = UploadRow::from_upload(upload)?;
        sqlx::query(
            r#"
            INSERT INTO uploads (upload_id, files, dataset_id, model_id, artifact_name, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.upload_id)
        .bind(&row.files)
        .bind(row.dataset_id)
        .bind(row.model_id)
        .bind(&row.artifact_name)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_upload(&self, upload_id: UploadId) -> MetadataResult<Option<Upload>> {
        let sql = format!("SELECT {UPLOAD_COLUMNS} FROM uploads WHERE upload_id = ?");
        let row: Option<UploadRow> = sqlx::query_as(&sql)
            .bind(Uuid::from(upload_id))
            .fetch_optional(&self.pool)
            .await?;
        row.map(UploadRow::into_upload).transpose()
    }
}

#[async_trait]
impl UploadLedger<SqliteTx> for SqliteStore {
    #[instrument(skip(self, tx), fields(upload_id = %upload_id))]
    async fn fetch_within(&self, tx: &mut SqliteTx, upload_id: UploadId) -> MetadataResult<Upload> {
        let sql = format!("SELECT {UPLOAD_COLUMNS} FROM uploads WHERE upload_id = ?");
        let conn = tx.conn()?;
        let row: Option<UploadRow> = sqlx::query_as(&sql)
            .bind(Uuid::from(upload_id))
            .fetch_optional(&mut **conn)
            .await?;

        match row {
            Some(row) => row.into_upload(),
            None => Err(MetadataError::NotFound(format!("upload {upload_id}"))),
        }
    }

    #[instrument(skip(self, tx, upload), fields(upload_id = %upload.id))]
    async fn update_within(&self, tx: &mut SqliteTx, upload: &Upload) -> MetadataResult<()> {
        let row = UploadRow::from_upload(upload)?;
        let conn = tx.conn()?;
        let result = sqlx::query(
            r#"
            UPDATE uploads SET files = ?, dataset_id = ?, model_id = ?, artifact_name = ?
            WHERE upload_id = ?
            "#,
        )
        .bind(&row.files)
        .bind(row.dataset_id)
        .bind(row.model_id)
        .bind(&row.artifact_name)
        .bind(row.upload_id)
        .execute(&mut **conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!("upload {}", upload.id)));
        }
        Ok(())
    }
}

// =============================================================================
// Entities
// =============================================================================

/// Dataset or model table of a [`SqliteStore`].
struct SqliteEntities {
    pool: Pool<Sqlite>,
    kind: EntityKind,
}

impl SqliteEntities {
    fn select_sql(&self) -> &'static str {
        match self.kind {
            EntityKind::Dataset => {
                "SELECT entity_id, name, parent_id, version, description, created_at FROM datasets"
            }
            EntityKind::Model => {
                "SELECT entity_id, name, parent_id, version, description, created_at, \
                 dataset_id, config, metadata, environment, evaluation FROM models"
            }
        }
    }

    fn owner_column(&self) -> &'static str {
        match self.kind {
            EntityKind::Dataset => "dataset_id",
            EntityKind::Model => "model_id",
        }
    }

    async fn owned_uploads(&self, entity_id: Option<Uuid>) -> MetadataResult<Vec<UploadRow>> {
        let column = self.owner_column();
        let rows = match entity_id {
            Some(id) => {
                let sql = format!(
                    "SELECT {UPLOAD_COLUMNS} FROM uploads WHERE {column} = ? \
                     ORDER BY created_at, upload_id"
                );
                sqlx::query_as(&sql).bind(id).fetch_all(&self.pool).await?
            }
            None => {
                let sql = format!(
                    "SELECT {UPLOAD_COLUMNS} FROM uploads WHERE {column} IS NOT NULL \
                     ORDER BY created_at, upload_id"
                );
                sqlx::query_as(&sql).fetch_all(&self.pool).await?
            }
        };
        Ok(rows)
    }

    async fn fetch_rows(&self, entity_id: Option<Uuid>) -> MetadataResult<Vec<VersionedEntity>> {
        let mut sql = self.select_sql().to_string();
        match entity_id {
            Some(_) => sql.push_str(" WHERE entity_id = ?"),
            None => sql.push_str(" ORDER BY created_at, entity_id"),
        }

        let entities = match self.kind {
            EntityKind::Dataset => {
                let mut query = sqlx::query_as::<_, EntityRow>(&sql);
                if let Some(id) = entity_id {
                    query = query.bind(id);
                }
                query
                    .fetch_all(&self.pool)
                    .await?
                    .into_iter()
                    .map(|row| row.into_entity(EntityKind::Dataset))
                    .collect()
            }
            EntityKind::Model => {
                let mut query = sqlx::query_as::<_, ModelRow>(&sql);
                if let Some(id) = entity_id {
                    query = query.bind(id);
                }
                query
                    .fetch_all(&self.pool)
                    .await?
                    .into_iter()
                    .map(ModelRow::into_entity)
                    .collect::<MetadataResult<Vec<_>>>()?
            }
        };
        Ok(entities)
    }
}

#[async_trait]
impl EntityRepo<SqliteTx> for SqliteEntities {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    #[instrument(skip(self, tx, draft), fields(kind = %self.kind, name = %draft.name))]
    async fn insert_within(
        &self,
        tx: &mut SqliteTx,
        draft: &EntityDraft,
    ) -> MetadataResult<VersionedEntity> {
        let id = EntityId::new();
        let created_at = OffsetDateTime::now_utc();
        let parent_id = draft.parent.map(Uuid::from);
        let conn = tx.conn()?;

        match self.kind {
            EntityKind::Dataset => {
                sqlx::query(
                    r#"
                    INSERT INTO datasets (entity_id, name, parent_id, version, description, created_at)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(Uuid::from(id))
                .bind(&draft.name)
                .bind(parent_id)
                .bind(&draft.version)
                .bind(&draft.description)
                .bind(created_at)
                .execute(&mut **conn)
                .await?;
            }
            EntityKind::Model => {
                let model = ModelColumns::from_details(draft.model.as_ref())?;
                sqlx::query(
                    r#"
                    INSERT INTO models (
                        entity_id, name, parent_id, version, description, created_at,
                        dataset_id, config, metadata, environment, evaluation
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(Uuid::from(id))
                .bind(&draft.name)
                .bind(parent_id)
                .bind(&draft.version)
                .bind(&draft.description)
                .bind(created_at)
                .bind(model.dataset_id)
                .bind(&model.config)
                .bind(&model.metadata)
                .bind(&model.environment)
                .bind(&model.evaluation)
                .execute(&mut **conn)
                .await?;
            }
        }

        Ok(VersionedEntity::inserted(id, self.kind, draft, created_at))
    }

    async fn list(&self) -> MetadataResult<Vec<VersionedEntity>> {
        let mut entities = self.fetch_rows(None).await?;
        let owned = self.owned_uploads(None).await?;
        attach_artifacts(&mut entities, owned)?;
        Ok(entities)
    }

    async fn get(&self, id: EntityId) -> MetadataResult<Option<VersionedEntity>> {
        let id = Uuid::from(id);
        let mut entities = self.fetch_rows(Some(id)).await?;
        let owned = self.owned_uploads(Some(id)).await?;
        attach_artifacts(&mut entities, owned)?;
        Ok(entities.pop())
    }
}

/// SQLite schema.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS datasets (
    entity_id BLOB PRIMARY KEY,
    name TEXT NOT NULL,
    parent_id BLOB REFERENCES datasets(entity_id),
    version TEXT NOT NULL,
    description TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_datasets_created ON datasets(created_at);

CREATE TABLE IF NOT EXISTS models (
    entity_id BLOB PRIMARY KEY,
    name TEXT NOT NULL,
    parent_id BLOB REFERENCES models(entity_id),
    version TEXT NOT NULL,
    description TEXT NOT NULL,
    created_at TEXT NOT NULL,
    dataset_id BLOB REFERENCES datasets(entity_id),
    config TEXT NOT NULL DEFAULT 'null',
    metadata TEXT NOT NULL DEFAULT 'null',
    environment TEXT NOT NULL DEFAULT 'null',
    evaluation TEXT NOT NULL DEFAULT 'null'
);
CREATE INDEX IF NOT EXISTS idx_models_created ON models(created_at);

CREATE TABLE IF NOT EXISTS uploads (
    upload_id BLOB PRIMARY KEY,
    files TEXT NOT NULL,
    dataset_id BLOB REFERENCES datasets(entity_id),
    model_id BLOB REFERENCES models(entity_id),
    artifact_name TEXT,
    created_at TEXT NOT NULL,
    CHECK (dataset_id IS NULL OR model_id IS NULL)
);
CREATE INDEX IF NOT EXISTS idx_uploads_dataset ON uploads(dataset_id);
CREATE INDEX IF NOT EXISTS idx_uploads_model ON uploads(model_id);
"#;
