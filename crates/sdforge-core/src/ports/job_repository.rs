//! Job store port.

use async_trait::async_trait;
use thiserror::Error;

use super::RepositoryError;
use crate::job::{
    CancelOutcome, GenerationJob, JobId, JobStatus, NewJob, TransitionFields,
};

/// Errors surfaced by job store operations.
#[derive(Debug, Error)]
pub enum JobError {
    /// Malformed submission, rejected before persistence.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// No job with the given id.
    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// The requested edge is not in the legal transition graph, or the job
    /// moved concurrently and the guarded update lost.
    #[error("Illegal job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// Underlying storage failure.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Durable state machine for generation jobs.
///
/// Implementations must make `transition` atomic: the status guard and the
/// field merge happen in one compare-and-swap write so concurrent readers
/// can never observe a lost update.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Validate and persist a new job with `status = pending`.
    ///
    /// Assigns the id and, when absent, a random seed. Fails with
    /// [`JobError::Validation`] when required fields are missing.
    async fn enqueue(&self, job: NewJob) -> Result<GenerationJob, JobError>;

    /// Fetch a job by id.
    async fn get(&self, id: JobId) -> Result<Option<GenerationJob>, RepositoryError>;

    /// The oldest `pending` job (ascending `created_at`), if any.
    ///
    /// Does not mutate status; the scheduler transitions it.
    async fn dequeue_next(&self) -> Result<Option<GenerationJob>, RepositoryError>;

    /// Number of jobs currently `processing` (single-flight guard).
    async fn count_processing(&self) -> Result<u64, RepositoryError>;

    /// Apply a status transition, enforcing the legal edge set and stamping
    /// `started_at` / `completed_at` exactly once.
    async fn transition(
        &self,
        id: JobId,
        next: JobStatus,
        fields: TransitionFields,
    ) -> Result<GenerationJob, JobError>;

    /// Request cancellation.
    ///
    /// Pending jobs are cancelled immediately; processing jobs get
    /// `cancel_requested` set and are cancelled by the scheduler once the
    /// in-flight call resolves; terminal jobs are left untouched.
    async fn cancel(&self, id: JobId) -> Result<CancelOutcome, JobError>;

    /// Whether cancellation was requested for a job.
    async fn cancel_requested(&self, id: JobId) -> Result<bool, RepositoryError>;

    /// Crash recovery: atomically fail every job in
    /// `{pending, processing}` with the given reason. Returns the number of
    /// jobs failed.
    async fn fail_all_unterminated(&self, reason: &str) -> Result<u64, RepositoryError>;
}
