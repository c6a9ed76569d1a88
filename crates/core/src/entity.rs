//! Versioned entities: dataset and model revisions.

use crate::ids::{EntityId, UploadId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

/// The kind of versioned entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Dataset,
    Model,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dataset => "dataset",
            Self::Model => "model",
        }
    }

    /// Storage namespace that owned artifacts are relocated under.
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::Dataset => "datasets",
            Self::Model => "models",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dataset" | "datasets" => Ok(Self::Dataset),
            "model" | "models" => Ok(Self::Model),
            other => Err(crate::Error::UnknownEntityKind(other.to_string())),
        }
    }
}

/// Model-only payload. The JSON documents are stored verbatim.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDetails {
    /// Dataset revision the model was trained on.
    #[serde(default)]
    pub dataset: Option<EntityId>,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub environment: serde_json::Value,
    #[serde(default)]
    pub evaluation: serde_json::Value,
}

/// A request to create a new entity revision.
///
/// `artifacts` maps a caller-chosen artifact name to the upload holding its
/// files. The uploads are resolved and relocated by the creation saga.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityDraft {
    pub name: String,
    #[serde(default)]
    pub parent: Option<EntityId>,
    pub version: String,
    pub description: String,
    #[serde(default)]
    pub artifacts: BTreeMap<String, UploadId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelDetails>,
}

impl EntityDraft {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_parent(mut self, parent: EntityId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_artifact(mut self, name: impl Into<String>, upload_id: UploadId) -> Self {
        self.artifacts.insert(name.into(), upload_id);
        self
    }

    pub fn with_model(mut self, details: ModelDetails) -> Self {
        self.model = Some(details);
        self
    }

    /// Check that the required descriptive fields are present.
    pub fn validate(&self) -> crate::Result<()> {
        let missing: Vec<&str> = [
            ("name", &self.name),
            ("version", &self.version),
            ("description", &self.description),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(crate::Error::InvalidDraft(format!(
                "missing required fields: {}",
                missing.join(", ")
            )))
        }
    }
}

/// A committed dataset or model revision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionedEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub name: String,
    pub parent: Option<EntityId>,
    pub version: String,
    pub description: String,
    /// Artifact name to owning upload, resolved from the upload ledger.
    /// Empty on the value returned by the creation saga.
    #[serde(default)]
    pub artifacts: BTreeMap<String, UploadId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelDetails>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl VersionedEntity {
    /// The entity produced by inserting `draft` under `id`.
    ///
    /// Artifacts are left empty. Models always carry details, datasets never.
    pub fn inserted(
        id: EntityId,
        kind: EntityKind,
        draft: &EntityDraft,
        created_at: OffsetDateTime,
    ) -> Self {
        let model = match kind {
            EntityKind::Model => Some(draft.model.clone().unwrap_or_default()),
            EntityKind::Dataset => None,
        };
        Self {
            id,
            kind,
            name: draft.name.clone(),
            parent: draft.parent,
            version: draft.version.clone(),
            description: draft.description.clone(),
            artifacts: BTreeMap::new(),
            model,
            created_at,
        }
    }
}
