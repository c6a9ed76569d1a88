//! Metadata store abstraction and implementations for lineage.
//!
//! This crate provides the persistence side of entity creation:
//! - Dataset and model repositories
//! - The upload ledger and upload ownership
//! - Transaction handles threaded through every participating call

pub mod error;
pub mod models;
pub mod postgres;
pub mod repos;
pub mod store;
pub mod tx;

pub use error::{MetadataError, MetadataResult};
pub use postgres::PostgresStore;
pub use repos::{EntityCatalog, EntityRepo, TxBeginner, TxHandle, UploadLedger, UploadRepo};
pub use store::{MetadataStore, SqliteStore};
pub use tx::{PgTx, SqlTx, SqliteTx};

use lineage_core::config::MetadataConfig;
use std::sync::Arc;

/// A store opened from configuration.
///
/// The stores differ in their transaction type, so callers match on the
/// variant and continue with code generic over `Tx`.
#[derive(Clone)]
pub enum ConfiguredStore {
    Sqlite(Arc<SqliteStore>),
    Postgres(Arc<PostgresStore>),
}

impl ConfiguredStore {
    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite",
            Self::Postgres(_) => "postgres",
        }
    }
}

/// Validate `config`, then open the store it selects.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<ConfiguredStore> {
    config.validate().map_err(MetadataError::Config)?;

    match config {
        MetadataConfig::Sqlite {
            path,
            max_connections,
        } => {
            let store = SqliteStore::new(path, *max_connections).await?;
            Ok(ConfiguredStore::Sqlite(Arc::new(store)))
        }
        MetadataConfig::Postgres { .. } => {
            let store = PostgresStore::connect(config).await?;
            Ok(ConfiguredStore::Postgres(Arc::new(store)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_sqlite() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("metadata.db");
        let config = MetadataConfig::Sqlite {
            path: db_path.clone(),
            max_connections: 2,
        };

        let store = from_config(&config).await.unwrap();
        match store {
            ConfiguredStore::Sqlite(store) => store.health_check().await.unwrap(),
            ConfiguredStore::Postgres(_) => panic!("expected sqlite store"),
        }
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_from_config_rejects_zero_connections() {
        let config = MetadataConfig::Sqlite {
            path: ":memory:".into(),
            max_connections: 0,
        };
        let err = from_config(&config).await.err().unwrap();
        assert!(matches!(err, MetadataError::Config(_)));
    }
}
