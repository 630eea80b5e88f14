//! Core domain types and port definitions for sdforge.
//!
//! This crate owns the job and process state machines, the event contract,
//! settings, and the trait seams (ports) the adapter crates implement. It
//! has no database, HTTP, or OS-process dependencies.

#![deny(unsafe_code)]

pub mod events;
pub mod job;
pub mod model;
pub mod ports;
pub mod process;
pub mod settings;

// Re-export commonly used types for convenience
pub use events::{AppEvent, JobEvents, NoopJobEvents};
pub use job::{
    CancelOutcome, GenerationJob, JobId, JobKind, JobParams, JobResult, JobStatus, NewJob,
    SamplingParams, TransitionFields,
};
pub use model::{GenerationDefaults, ModelConfig};
pub use ports::{
    CatalogError, ExecutorError, GenerationExecutor, GenerationOutcome, JobError, JobRepository,
    ModelCatalog, ModelRuntimePort, ProcessError, ProcessRegistry, RepositoryError, RunningTarget,
    StaticCatalog,
};
pub use process::{ExecMode, ModelProcessState, ProcessStatePatch, ProcessStatus};
pub use settings::{Settings, SettingsError};
