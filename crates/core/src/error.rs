//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("unknown entity kind: {0}")]
    UnknownEntityKind(String),

    #[error("invalid entity draft: {0}")]
    InvalidDraft(String),

    #[error("invalid artifact: {0}")]
    InvalidArtifact(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
