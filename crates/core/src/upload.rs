//! Uploads and the artifact references they own.

use crate::entity::EntityKind;
use crate::ids::{EntityId, UploadId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use time::OffsetDateTime;

/// Directory prefix for files that have not been claimed by an entity.
pub const STAGING_PREFIX: &str = "tmp/uploads";

/// Storage directory for a freshly staged upload.
pub fn staging_dir(upload_id: UploadId) -> String {
    format!("{STAGING_PREFIX}/{upload_id}")
}

/// Storage directory for artifacts owned by an entity.
pub fn entity_dir(kind: EntityKind, entity_id: EntityId) -> String {
    format!("{}/{}", kind.namespace(), entity_id)
}

/// Storage provider that holds an artifact's bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Unknown,
    Filesystem,
    S3,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Filesystem => "filesystem",
            Self::S3 => "s3",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location of one uploaded file.
///
/// `path` is the directory key; the object itself lives at `path/filename`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub provider: Provider,
    pub filename: String,
    pub path: String,
}

impl ArtifactRef {
    pub fn new(provider: Provider, filename: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            provider,
            filename: filename.into(),
            path: path.into(),
        }
    }

    /// Object key of the file in its storage backend.
    pub fn location(&self) -> String {
        join_key(&self.path, &self.filename)
    }

    /// The same file, placed under `dir`.
    pub fn relocated(&self, dir: &str) -> Self {
        Self {
            provider: self.provider,
            filename: self.filename.clone(),
            path: dir.trim_end_matches('/').to_string(),
        }
    }
}

/// Check that a filename is a single, plain path segment.
pub fn validate_filename(filename: &str) -> crate::Result<()> {
    if filename.is_empty()
        || filename == "."
        || filename.contains("..")
        || filename.contains('/')
        || filename.contains('\\')
    {
        return Err(crate::Error::InvalidArtifact(format!(
            "unsafe filename: {filename:?}"
        )));
    }
    Ok(())
}

fn join_key(dir: &str, filename: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        filename.to_string()
    } else {
        format!("{dir}/{filename}")
    }
}

/// Entity that has claimed an upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum UploadOwner {
    Dataset(EntityId),
    Model(EntityId),
}

impl UploadOwner {
    pub fn new(kind: EntityKind, entity_id: EntityId) -> Self {
        match kind {
            EntityKind::Dataset => Self::Dataset(entity_id),
            EntityKind::Model => Self::Model(entity_id),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Dataset(_) => EntityKind::Dataset,
            Self::Model(_) => EntityKind::Model,
        }
    }

    pub fn entity_id(&self) -> EntityId {
        match self {
            Self::Dataset(id) | Self::Model(id) => *id,
        }
    }

    pub fn dataset_id(&self) -> Option<EntityId> {
        match self {
            Self::Dataset(id) => Some(*id),
            Self::Model(_) => None,
        }
    }

    pub fn model_id(&self) -> Option<EntityId> {
        match self {
            Self::Model(id) => Some(*id),
            Self::Dataset(_) => None,
        }
    }
}

/// A batch of files received independently of any entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Upload {
    pub id: UploadId,
    pub files: BTreeMap<String, ArtifactRef>,
    #[serde(default)]
    pub owner: Option<UploadOwner>,
    /// Artifact name the owner claimed this upload under.
    #[serde(default)]
    pub claimed_as: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Upload {
    /// A new, unclaimed upload.
    pub fn staged(id: UploadId, files: BTreeMap<String, ArtifactRef>) -> Self {
        Self {
            id,
            files,
            owner: None,
            claimed_as: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn is_claimed(&self) -> bool {
        self.owner.is_some()
    }

    /// Hand the upload to `owner` under the artifact name `artifact`.
    pub fn claim(&mut self, owner: UploadOwner, artifact: impl Into<String>) {
        self.owner = Some(owner);
        self.claimed_as = Some(artifact.into());
    }
}
