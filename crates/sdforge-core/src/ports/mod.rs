//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define the interfaces that the core domain expects from
//! infrastructure. They contain no implementation details and use only
//! domain types.
//!
//! # Design Rules
//!
//! - No `sqlx` types in any signature
//! - No process/filesystem implementation details
//! - Repository traits are minimal and CRUD-focused
//! - The runtime port is intent-based (ensure/stop), not
//!   implementation-leaking

pub mod executor;
pub mod job_repository;
pub mod model_catalog;
pub mod model_runtime;
pub mod process_registry;

use thiserror::Error;

pub use executor::{ExecutorError, GenerationExecutor, GenerationOutcome};
pub use job_repository::{JobError, JobRepository};
pub use model_catalog::{CatalogError, ModelCatalog, StaticCatalog};
pub use model_runtime::{ModelRuntimePort, ProcessError, RunningTarget};
pub use process_registry::ProcessRegistry;

/// Errors produced by persistence adapters.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The requested entity was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage backend error (database, filesystem, etc.).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A constraint was violated (e.g., unique constraint).
    #[error("Constraint violation: {0}")]
    Constraint(String),
}
