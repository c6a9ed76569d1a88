//! Versioned dataset and model registry.
//!
//! Entities are created by [`CreationSaga`], which inserts the entity and
//! claims its uploads in one metadata transaction while moving the uploaded
//! files into the entity's storage directory.

pub mod error;
pub mod intake;
pub mod registry;
pub mod saga;

pub use error::{RegistryError, RegistryResult, TxStep};
pub use intake::{StagedFile, UploadIntake};
pub use registry::Registry;
pub use saga::CreationSaga;
