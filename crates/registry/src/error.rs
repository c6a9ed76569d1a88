//! Registry error types.

use lineage_core::{UploadId, UploadOwner};
use lineage_metadata::MetadataError;
use lineage_storage::StorageError;
use std::fmt;

/// Transaction boundary that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxStep {
    Begin,
    Commit,
}

impl fmt::Display for TxStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Begin => f.write_str("begin"),
            Self::Commit => f.write_str("commit"),
        }
    }
}

/// Registry operation errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("transaction {step} failed: {source}")]
    Transaction {
        step: TxStep,
        #[source]
        source: MetadataError,
    },

    #[error("upload {upload_id} not found")]
    UploadNotFound { upload_id: UploadId },

    #[error(
        "upload {upload_id} is already claimed by {} {}",
        .owner.kind(),
        .owner.entity_id()
    )]
    UploadAlreadyClaimed {
        upload_id: UploadId,
        owner: UploadOwner,
    },

    #[error("artifact {artifact:?} not found in upload {upload_id}")]
    ArtifactNotFound { upload_id: UploadId, artifact: String },

    #[error("moving {from} to {to} for upload {upload_id} failed: {source}")]
    StorageMove {
        upload_id: UploadId,
        from: String,
        to: String,
        #[source]
        source: StorageError,
    },

    #[error(
        "{operation} failed{}: {source}",
        .upload_id.map(|id| format!(" for upload {id}")).unwrap_or_default()
    )]
    Persistence {
        operation: &'static str,
        upload_id: Option<UploadId>,
        #[source]
        source: MetadataError,
    },

    /// Rolling back after `cause` failed as well. `cause` is what the
    /// caller should act on.
    #[error("{cause} (rollback also failed: {source})")]
    RollbackFailed {
        cause: Box<RegistryError>,
        #[source]
        source: MetadataError,
    },

    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl RegistryError {
    pub(crate) fn persistence(
        operation: &'static str,
        upload_id: Option<UploadId>,
    ) -> impl FnOnce(MetadataError) -> Self {
        move |source| Self::Persistence {
            operation,
            upload_id,
            source,
        }
    }

    /// Stable error code for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transaction { .. } => "transaction_error",
            Self::UploadNotFound { .. } | Self::ArtifactNotFound { .. } => "not_found",
            Self::UploadAlreadyClaimed { .. } => "upload_claimed",
            Self::StorageMove { .. } => "storage_move_error",
            Self::Persistence { .. } => "persistence_error",
            Self::RollbackFailed { cause, .. } => cause.code(),
            Self::InvalidUpload(_) => "invalid_upload",
            Self::Storage(_) => "storage_error",
        }
    }

    /// The failure that aborted the operation, looking through a failed rollback.
    pub fn root_cause(&self) -> &RegistryError {
        match self {
            Self::RollbackFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == "not_found"
    }
}

/// Result type for registry operations.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_message_names_upload() {
        let upload_id = UploadId::new();
        let err = RegistryError::Persistence {
            operation: "update upload",
            upload_id: Some(upload_id),
            source: MetadataError::NotFound("upload".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("update upload failed for upload "));
        assert!(msg.contains(&upload_id.to_string()));

        let err = RegistryError::Persistence {
            operation: "insert entity",
            upload_id: None,
            source: MetadataError::Internal("boom".to_string()),
        };
        assert_eq!(err.to_string(), "insert entity failed: internal error: boom");
    }

    #[test]
    fn test_already_claimed_names_owner() {
        let upload_id = UploadId::new();
        let owner = UploadOwner::Model(lineage_core::EntityId::new());
        let err = RegistryError::UploadAlreadyClaimed { upload_id, owner };
        assert_eq!(err.code(), "upload_claimed");
        assert!(!err.is_not_found());
        assert_eq!(
            err.to_string(),
            format!(
                "upload {upload_id} is already claimed by model {}",
                owner.entity_id()
            )
        );
    }

    #[test]
    fn test_rollback_failed_keeps_cause() {
        let err = RegistryError::RollbackFailed {
            cause: Box::new(RegistryError::Transaction {
                step: TxStep::Commit,
                source: MetadataError::Internal("disk full".to_string()),
            }),
            source: MetadataError::TransactionFinished,
        };
        assert_eq!(err.code(), "transaction_error");
        assert!(matches!(
            err.root_cause(),
            RegistryError::Transaction {
                step: TxStep::Commit,
                ..
            }
        ));
        assert!(err.to_string().contains("disk full"));
    }
}
