//! PostgreSQL metadata store.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{EntityRow, ModelColumns, ModelRow, UploadRow, attach_artifacts};
use crate::repos::{EntityCatalog, EntityRepo, TxBeginner, UploadLedger, UploadRepo};
use crate::store::MetadataStore;
use crate::tx::PgTx;
use async_trait::async_trait;
use lineage_core::config::{MetadataConfig, PgSslMode};
use lineage_core::{EntityDraft, EntityId, EntityKind, Upload, UploadId, VersionedEntity};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

/// Schema, one statement per `;`.
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

const UPLOAD_COLUMNS: &str =
    "upload_id, files::text AS files, dataset_id, model_id, artifact_name, created_at";

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// sqlx connect options for a `postgres` config. `url` wins over the
/// individual fields.
fn connect_options(config: &MetadataConfig) -> MetadataResult<PgConnectOptions> {
    let MetadataConfig::Postgres {
        url,
        host,
        port,
        username,
        password,
        database,
        ssl_mode,
        statement_timeout_ms,
        ..
    } = config
    else {
        return Err(MetadataError::Config(
            "not a postgres metadata config".to_string(),
        ));
    };

    let mut options = match (url, host, database) {
        (Some(url), _, _) => PgConnectOptions::from_str(url)?,
        (None, Some(host), Some(database)) => {
            let mut options = PgConnectOptions::new()
                .host(host)
                .port(port.unwrap_or(5432))
                .database(database);
            if let Some(username) = username {
                options = options.username(username);
            }
            if let Some(password) = password {
                options = options.password(password);
            }
            options
        }
        _ => {
            return Err(MetadataError::Config(
                "postgres config needs a url, or a host and a database".to_string(),
            ));
        }
    };

    if let Some(mode) = ssl_mode {
        options = options.ssl_mode(match mode {
            PgSslMode::Disable => SqlxPgSslMode::Disable,
            PgSslMode::Prefer => SqlxPgSslMode::Prefer,
            PgSslMode::Require => SqlxPgSslMode::Require,
        });
    }
    if let Some(ms) = statement_timeout_ms {
        options = options.options([("statement_timeout", format!("{ms}ms"))]);
    }
    Ok(options)
}

/// PostgreSQL metadata store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Connect with a `postgres` metadata config and create the schema.
    pub async fn connect(config: &MetadataConfig) -> MetadataResult<Self> {
        config.validate().map_err(MetadataError::Config)?;
        let options = connect_options(config)?;
        let max_connections = match config {
            MetadataConfig::Postgres {
                max_connections, ..
            } => *max_connections,
            MetadataConfig::Sqlite { .. } => 1,
        };

        tracing::info!(
            host = options.get_host(),
            database = options.get_database().unwrap_or("<default>"),
            user = options.get_username(),
            max_connections,
            "Connecting to PostgreSQL"
        );
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore<PgTx> for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // Prepared statements hold one command each.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl TxBeginner<PgTx> for PostgresStore {
    async fn begin(&self) -> MetadataResult<PgTx> {
        let tx = self.pool.begin().await?;
        Ok(PgTx::new(tx))
    }
}

impl EntityCatalog<PgTx> for PostgresStore {
    fn entities(&self, kind: EntityKind) -> Arc<dyn EntityRepo<PgTx>> {
        Arc::new(PgEntities {
            pool: self.pool.clone(),
            kind,
        })
    }
}

// =============================================================================
// Uploads
// =============================================================================

#[async_trait]
impl UploadRepo for PostgresStore {
    async fn create_upload(&self, upload: &Upload) -> MetadataResult<()> {
        let row = UploadRow::from_upload(upload)?;
        sqlx::query(
            r#"
            INSERT INTO uploads (upload_id, files, dataset_id, model_id, artifact_name, created_at)
            VALUES ($1, $2::jsonb, $3, $4, $5, $6)
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
        let sql = format!("SELECT {UPLOAD_COLUMNS} FROM uploads WHERE upload_id = $1");
        let row: Option<UploadRow> = sqlx::query_as(&sql)
            .bind(Uuid::from(upload_id))
            .fetch_optional(&self.pool)
            .await?;
        row.map(UploadRow::into_upload).transpose()
    }
}

#[async_trait]
impl UploadLedger<PgTx> for PostgresStore {
    #[instrument(skip(self, tx), fields(upload_id = %upload_id))]
    async fn fetch_within(&self, tx: &mut PgTx, upload_id: UploadId) -> MetadataResult<Upload> {
        let sql = format!("SELECT {UPLOAD_COLUMNS} FROM uploads WHERE upload_id = $1");
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
    async fn update_within(&self, tx: &mut PgTx, upload: &Upload) -> MetadataResult<()> {
        let row = UploadRow::from_upload(upload)?;
        let conn = tx.conn()?;
        let result = sqlx::query(
            r#"
            UPDATE uploads
            SET files = $1::jsonb, dataset_id = $2, model_id = $3, artifact_name = $4
            WHERE upload_id = $5
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

/// Dataset or model table of a [`PostgresStore`].
struct PgEntities {
    pool: Pool<Postgres>,
    kind: EntityKind,
}

impl PgEntities {
    fn select_sql(&self) -> &'static str {
        match self.kind {
            EntityKind::Dataset => {
                "SELECT entity_id, name, parent_id, version, description, created_at FROM datasets"
            }
            EntityKind::Model => {
                "SELECT entity_id, name, parent_id, version, description, created_at, \
                 dataset_id, config::text AS config, metadata::text AS metadata, \
                 environment::text AS environment, evaluation::text AS evaluation FROM models"
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
                    "SELECT {UPLOAD_COLUMNS} FROM uploads WHERE {column} = $1 \
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
            Some(_) => sql.push_str(" WHERE entity_id = $1"),
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
impl EntityRepo<PgTx> for PgEntities {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    #[instrument(skip(self, tx, draft), fields(kind = %self.kind, name = %draft.name))]
    async fn insert_within(
        &self,
        tx: &mut PgTx,
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
                    VALUES ($1, $2, $3, $4, $5, $6)
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
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8::jsonb, $9::jsonb, $10::jsonb, $11::jsonb)
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
