//! Core domain types for lineage.
//!
//! This crate defines the data model shared by every other crate:
//! - Entity and upload identifiers
//! - Dataset and model revisions and their creation drafts
//! - Uploads and the artifact references they own
//! - Application configuration

pub mod config;
pub mod entity;
pub mod error;
pub mod ids;
pub mod upload;

pub use entity::{EntityDraft, EntityKind, ModelDetails, VersionedEntity};
pub use error::{Error, Result};
pub use ids::{EntityId, UploadId};
pub use upload::{ArtifactRef, Provider, Upload, UploadOwner};
