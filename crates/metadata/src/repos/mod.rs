//! Repository traits for metadata operations.
//!
//! Each trait is generic over the transaction handle `Tx` so the creation
//! flow can be driven by any store (or by a test double).

pub mod entities;
pub mod uploads;

pub use entities::{EntityCatalog, EntityRepo};
pub use uploads::{UploadLedger, UploadRepo};

use crate::error::MetadataResult;
use async_trait::async_trait;

/// A live transaction that can be finished exactly once.
#[async_trait]
pub trait TxHandle: Send {
    /// Make every write performed through this handle durable.
    async fn commit(&mut self) -> MetadataResult<()>;

    /// Discard every write performed through this handle.
    ///
    /// Rolling back an already finished handle is a no-op.
    async fn rollback(&mut self) -> MetadataResult<()>;
}

/// Opens transactions of type `Tx`.
#[async_trait]
pub trait TxBeginner<Tx>: Send + Sync {
    async fn begin(&self) -> MetadataResult<Tx>;
}
