//! Metadata store test utilities and shared scenarios.
//!
//! The scenarios are generic over the store so the SQLite and PostgreSQL
//! suites exercise identical behavior.

#![allow(dead_code)]

use lineage_core::config::MetadataConfig;
use lineage_core::{
    ArtifactRef, EntityDraft, EntityKind, ModelDetails, Provider, Upload, UploadId, UploadOwner,
};
use lineage_metadata::{
    MetadataError, MetadataResult, MetadataStore, PostgresStore, SqliteStore, TxHandle,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

/// Stable prefix for Docker/container startup failures in Postgres test setup.
/// Tests use this marker to decide whether to skip due to unavailable Docker.
pub const POSTGRES_CONTAINER_START_ERR_PREFIX: &str = "postgres-container-start:";

/// A file-backed SQLite store that cleans up on drop.
pub struct TestMetadata {
    pub store: Arc<SqliteStore>,
    _temp_dir: TempDir,
}

impl TestMetadata {
    /// File-backed, so separate pool connections see committed state only.
    pub async fn new() -> MetadataResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let store = SqliteStore::new(temp_dir.path().join("test.db"), 4).await?;
        Ok(Self {
            store: Arc::new(store),
            _temp_dir: temp_dir,
        })
    }
}

/// PostgreSQL test store wrapper that manages a testcontainer.
pub struct PostgresTestMetadata {
    pub store: Arc<PostgresStore>,
    _container: ContainerAsync<Postgres>,
}

impl PostgresTestMetadata {
    pub async fn new() -> MetadataResult<Self> {
        let container = Postgres::default()
            .with_tag("15-alpine")
            .start()
            .await
            .map_err(|e| {
                MetadataError::Internal(format!(
                    "{POSTGRES_CONTAINER_START_ERR_PREFIX} Failed to start PostgreSQL container: {e}"
                ))
            })?;

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("Failed to get port");

        // Default credentials from testcontainers-modules postgres
        let config = MetadataConfig::Postgres {
            url: Some(format!("postgres://postgres:postgres@{host}:{port}/postgres")),
            host: None,
            port: None,
            username: None,
            password: None,
            database: None,
            ssl_mode: None,
            max_connections: 5,
            statement_timeout_ms: Some(30_000),
        };
        let store = PostgresStore::connect(&config).await?;

        Ok(Self {
            store: Arc::new(store),
            _container: container,
        })
    }
}

/// Start a PostgreSQL store, skipping if Docker is unavailable or
/// SKIP_POSTGRES_TESTS is set.
///
/// Only container-start failures cause a skip; schema or connection errors
/// still panic.
pub async fn postgres_or_skip() -> Option<PostgresTestMetadata> {
    if std::env::var("SKIP_POSTGRES_TESTS").is_ok() {
        return None;
    }
    match PostgresTestMetadata::new().await {
        Ok(metadata) => Some(metadata),
        Err(err) => {
            let msg = err.to_string();
            if msg.contains(POSTGRES_CONTAINER_START_ERR_PREFIX) {
                eprintln!("Skipping PostgreSQL test (Docker unavailable): {msg}");
                None
            } else {
                panic!("PostgreSQL test setup failed: {msg}");
            }
        }
    }
}

/// An unclaimed upload with one file per name, staged under `tmp/uploads/<id>`.
pub fn staged_upload(names: &[&str]) -> Upload {
    let id = UploadId::new();
    let dir = lineage_core::upload::staging_dir(id);
    let files: BTreeMap<String, ArtifactRef> = names
        .iter()
        .map(|name| {
            (
                name.to_string(),
                ArtifactRef::new(Provider::Filesystem, format!("{name}.bin"), dir.clone()),
            )
        })
        .collect();
    Upload::staged(id, files)
}

// =============================================================================
// Scenarios
// =============================================================================

/// Insert a dataset, claim an upload and commit; list and get reflect it.
pub async fn claim_and_commit<Tx, S>(store: &S)
where
    Tx: TxHandle,
    S: MetadataStore<Tx>,
{
    let upload = staged_upload(&["train", "test"]);
    store.create_upload(&upload).await.unwrap();

    let unclaimed = store.get_upload(upload.id).await.unwrap().unwrap();
    assert!(!unclaimed.is_claimed());
    assert_eq!(unclaimed.files, upload.files);

    let datasets = store.entities(EntityKind::Dataset);
    let draft = EntityDraft::new("mnist", "v1", "handwritten digits")
        .with_artifact("digits", upload.id);

    let mut tx = store.begin().await.unwrap();
    let entity = datasets.insert_within(&mut tx, &draft).await.unwrap();
    assert!(entity.artifacts.is_empty());
    assert_eq!(entity.kind, EntityKind::Dataset);

    let mut claimed = store.fetch_within(&mut tx, upload.id).await.unwrap();
    let dir = lineage_core::upload::entity_dir(EntityKind::Dataset, entity.id);
    claimed.files = claimed
        .files
        .iter()
        .map(|(name, file)| (name.clone(), file.relocated(&dir)))
        .collect();
    claimed.claim(UploadOwner::Dataset(entity.id), "digits");
    store.update_within(&mut tx, &claimed).await.unwrap();
    tx.commit().await.unwrap();

    let stored = store.get_upload(upload.id).await.unwrap().unwrap();
    assert_eq!(stored.owner, Some(UploadOwner::Dataset(entity.id)));
    assert_eq!(stored.claimed_as.as_deref(), Some("digits"));
    assert_eq!(stored.files["train"].path, dir);

    // Keyed by the claim name, not by the upload's file keys.
    let listed = datasets.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "mnist");
    let expected: BTreeMap<String, UploadId> =
        [("digits".to_string(), upload.id)].into_iter().collect();
    assert_eq!(listed[0].artifacts, expected);

    let fetched = datasets.get(entity.id).await.unwrap().unwrap();
    assert_eq!(fetched.artifacts, expected);
    assert!(store.entities(EntityKind::Model).list().await.unwrap().is_empty());
}

/// Writes made inside a rolled back transaction leave no trace.
pub async fn rollback_discards_everything<Tx, S>(store: &S)
where
    Tx: TxHandle,
    S: MetadataStore<Tx>,
{
    let upload = staged_upload(&["weights"]);
    store.create_upload(&upload).await.unwrap();
    let models = store.entities(EntityKind::Model);

    let mut tx = store.begin().await.unwrap();
    let entity = models
        .insert_within(&mut tx, &EntityDraft::new("resnet", "v1", "baseline"))
        .await
        .unwrap();
    let mut claimed = store.fetch_within(&mut tx, upload.id).await.unwrap();
    claimed.claim(UploadOwner::Model(entity.id), "weights");
    store.update_within(&mut tx, &claimed).await.unwrap();
    tx.rollback().await.unwrap();

    assert!(models.get(entity.id).await.unwrap().is_none());
    assert!(models.list().await.unwrap().is_empty());
    let stored = store.get_upload(upload.id).await.unwrap().unwrap();
    assert!(!stored.is_claimed());
    assert!(stored.claimed_as.is_none());
}

/// List reads committed state only, even while a creation is in flight.
pub async fn list_ignores_uncommitted<Tx, S>(store: &S)
where
    Tx: TxHandle,
    S: MetadataStore<Tx>,
{
    let datasets = store.entities(EntityKind::Dataset);

    let mut tx = store.begin().await.unwrap();
    let entity = datasets
        .insert_within(&mut tx, &EntityDraft::new("cifar", "v1", "images"))
        .await
        .unwrap();

    assert!(datasets.list().await.unwrap().is_empty());
    assert!(datasets.get(entity.id).await.unwrap().is_none());

    tx.commit().await.unwrap();
    let listed = datasets.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, entity.id);
}

/// Model payloads and lineage links are persisted.
pub async fn model_details_round_trip<Tx, S>(store: &S)
where
    Tx: TxHandle,
    S: MetadataStore<Tx>,
{
    let datasets = store.entities(EntityKind::Dataset);
    let models = store.entities(EntityKind::Model);

    let mut tx = store.begin().await.unwrap();
    let dataset = datasets
        .insert_within(&mut tx, &EntityDraft::new("mnist", "v1", "digits"))
        .await
        .unwrap();
    let details = ModelDetails {
        dataset: Some(dataset.id),
        config: json!({"epochs": 10, "lr": 0.001}),
        metadata: json!({"author": "ml-team"}),
        environment: json!({"python": "3.11"}),
        evaluation: json!({"accuracy": 0.98}),
    };
    let parent = models
        .insert_within(&mut tx, &EntityDraft::new("lenet", "v1", "first cut"))
        .await
        .unwrap();
    let child = models
        .insert_within(
            &mut tx,
            &EntityDraft::new("lenet", "v2", "tuned")
                .with_parent(parent.id)
                .with_model(details.clone()),
        )
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let fetched = models.get(child.id).await.unwrap().unwrap();
    assert_eq!(fetched.parent, Some(parent.id));
    assert_eq!(fetched.model, Some(details));

    let listed = models.list().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|m| m.model.is_some()));
}

/// A parent that does not exist is a persistence failure.
pub async fn unknown_parent_is_rejected<Tx, S>(store: &S)
where
    Tx: TxHandle,
    S: MetadataStore<Tx>,
{
    let datasets = store.entities(EntityKind::Dataset);
    let draft =
        EntityDraft::new("mnist", "v2", "orphan").with_parent(lineage_core::EntityId::new());

    let mut tx = store.begin().await.unwrap();
    let err = datasets.insert_within(&mut tx, &draft).await.unwrap_err();
    assert!(matches!(err, MetadataError::Database(_)));
    tx.rollback().await.unwrap();
}

/// Fetching or updating an unknown upload reports NotFound.
pub async fn missing_upload_is_not_found<Tx, S>(store: &S)
where
    Tx: TxHandle,
    S: MetadataStore<Tx>,
{
    let mut tx = store.begin().await.unwrap();
    let err = store.fetch_within(&mut tx, UploadId::new()).await.unwrap_err();
    assert!(err.is_not_found());
    let err = store
        .update_within(&mut tx, &staged_upload(&["x"]))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    tx.rollback().await.unwrap();
}
