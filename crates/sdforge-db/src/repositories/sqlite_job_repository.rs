//! `SQLite` implementation of the `JobRepository` port.
//!
//! Transitions run inside a transaction with a status-guarded UPDATE
//! (`WHERE id = ? AND status = ?`) so the legal-edge check and the write
//! are one atomic compare-and-swap: no lost update is possible even if
//! another process is pointed at the same database file.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use sdforge_core::job::{
    CancelOutcome, GenerationJob, JobId, JobStatus, NewJob, TransitionFields,
};
use sdforge_core::ports::{JobError, JobRepository, RepositoryError};

use super::row_mappers::map_job_row;

const SELECT_JOB: &str = "SELECT * FROM jobs WHERE id = ?";

fn storage(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Storage(e.to_string())
}

/// `SQLite`-backed job store.
pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    /// Create a new `SQLite` job repository.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn enqueue(&self, job: NewJob) -> Result<GenerationJob, JobError> {
        let job = job.validated().map_err(JobError::Validation)?;

        let id = JobId::new();
        let now = Utc::now();
        let kind = job.params.kind();
        let params_json = serde_json::to_string(&job.params)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        sqlx::query(
            "INSERT INTO jobs (id, kind, model_id, params, status, progress, \
             cancel_requested, created_at, updated_at) \
             VALUES (?, ?, ?, ?, 'pending', 0.0, 0, ?, ?)",
        )
        .bind(id.to_string())
        .bind(kind.as_str())
        .bind(&job.model_id)
        .bind(&params_json)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        tracing::debug!(job_id = %id, kind = kind.as_str(), model_id = %job.model_id, "Job enqueued");

        Ok(GenerationJob {
            id,
            kind,
            model_id: job.model_id,
            params: job.params,
            status: JobStatus::Pending,
            progress: 0.0,
            error: None,
            result: None,
            cancel_requested: false,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        })
    }

    async fn get(&self, id: JobId) -> Result<Option<GenerationJob>, RepositoryError> {
        let row = sqlx::query(SELECT_JOB)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.as_ref().map(map_job_row).transpose()
    }

    async fn dequeue_next(&self) -> Result<Option<GenerationJob>, RepositoryError> {
        // rowid breaks ties between jobs created in the same instant
        let row = sqlx::query(
            "SELECT * FROM jobs WHERE status = 'pending' \
             ORDER BY created_at ASC, rowid ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.as_ref().map(map_job_row).transpose()
    }

    async fn count_processing(&self) -> Result<u64, RepositoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = 'processing'")
                .fetch_one(&self.pool)
                .await
                .map_err(storage)?;

        #[allow(clippy::cast_sign_loss)]
        Ok(count as u64)
    }

    async fn transition(
        &self,
        id: JobId,
        next: JobStatus,
        fields: TransitionFields,
    ) -> Result<GenerationJob, JobError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let row = sqlx::query(SELECT_JOB)
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?;
        let current = match row.as_ref().map(map_job_row).transpose()? {
            Some(job) => job,
            None => return Err(JobError::NotFound(id)),
        };

        if !current.status.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                from: current.status,
                to: next,
            });
        }

        let now = Utc::now();
        // started_at and completed_at are each stamped exactly once
        let started_at = match (next, current.started_at) {
            (JobStatus::Processing, None) => Some(now),
            (_, existing) => existing,
        };
        let completed_at = if next.is_terminal() && current.completed_at.is_none() {
            Some(now)
        } else {
            current.completed_at
        };

        let progress = fields.progress.unwrap_or(current.progress);
        let error = fields.error.or(current.error);
        let result = match &fields.result {
            Some(r) => Some(
                serde_json::to_string(r)
                    .map_err(|e| RepositoryError::Serialization(e.to_string()))?,
            ),
            None => None,
        };

        let updated = sqlx::query(
            "UPDATE jobs SET status = ?, progress = ?, error = ?, \
             result = COALESCE(?, result), started_at = ?, completed_at = ?, \
             updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(next.as_str())
        .bind(f64::from(progress))
        .bind(&error)
        .bind(&result)
        .bind(started_at.map(|t| t.to_rfc3339()))
        .bind(completed_at.map(|t| t.to_rfc3339()))
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .bind(current.status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        if updated.rows_affected() == 0 {
            // The job moved between read and write; the guard lost.
            return Err(JobError::InvalidTransition {
                from: current.status,
                to: next,
            });
        }

        tx.commit().await.map_err(storage)?;

        tracing::debug!(job_id = %id, from = %current.status, to = %next, "Job transitioned");

        Ok(GenerationJob {
            status: next,
            progress,
            error,
            result: fields.result.or(current.result),
            started_at,
            completed_at,
            updated_at: now,
            ..current
        })
    }

    async fn cancel(&self, id: JobId) -> Result<CancelOutcome, JobError> {
        // The status can move between the read and the write (the scheduler
        // claims pending jobs concurrently). When a guarded write loses that
        // race, re-read and take the branch for the new status instead of
        // surfacing the race to the caller.
        loop {
            let current = self
                .get(id)
                .await?
                .ok_or(JobError::NotFound(id))?;

            match current.status {
                JobStatus::Pending => {
                    match self
                        .transition(id, JobStatus::Cancelled, TransitionFields::default())
                        .await
                    {
                        Ok(job) => return Ok(CancelOutcome::Cancelled(job)),
                        Err(JobError::InvalidTransition { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
                JobStatus::Processing => {
                    let now = Utc::now();
                    let updated = sqlx::query(
                        "UPDATE jobs SET cancel_requested = 1, updated_at = ? \
                         WHERE id = ? AND status = 'processing'",
                    )
                    .bind(now.to_rfc3339())
                    .bind(id.to_string())
                    .execute(&self.pool)
                    .await
                    .map_err(storage)?;

                    if updated.rows_affected() > 0 {
                        return Ok(CancelOutcome::AbortRequested(GenerationJob {
                            cancel_requested: true,
                            updated_at: now,
                            ..current
                        }));
                    }
                }
                status => return Ok(CancelOutcome::NotCancellable(status)),
            }
        }
    }

    async fn cancel_requested(&self, id: JobId) -> Result<bool, RepositoryError> {
        let flag: Option<i64> =
            sqlx::query_scalar("SELECT cancel_requested FROM jobs WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?;

        flag.map(|f| f != 0)
            .ok_or_else(|| RepositoryError::NotFound(format!("job {id}")))
    }

    async fn fail_all_unterminated(&self, reason: &str) -> Result<u64, RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', error = ?, \
             completed_at = COALESCE(completed_at, ?), updated_at = ? \
             WHERE status IN ('pending', 'processing')",
        )
        .bind(reason)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        let failed = result.rows_affected();
        if failed > 0 {
            tracing::warn!(count = failed, reason, "Force-failed unterminated jobs");
        }
        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::setup_test_database;
    use sdforge_core::job::{JobParams, JobResult, SamplingParams};

    async fn repo() -> SqliteJobRepository {
        let pool = setup_test_database().await.expect("test db");
        SqliteJobRepository::new(pool)
    }

    fn new_job(prompt: &str) -> NewJob {
        NewJob {
            model_id: "sdxl".to_string(),
            params: JobParams::Generate {
                prompt: prompt.to_string(),
                negative_prompt: None,
                sampling: SamplingParams::default(),
            },
        }
    }

    #[tokio::test]
    async fn enqueue_persists_pending_job_with_seed() {
        let repo = repo().await;
        let job = repo.enqueue(new_job("a lighthouse")).await.expect("enqueue");

        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.params.sampling().seed.is_some());

        let fetched = repo.get(job.id).await.expect("get").expect("exists");
        assert_eq!(fetched.status, JobStatus::Pending);
        assert_eq!(fetched.params, job.params);
    }

    #[tokio::test]
    async fn enqueue_rejects_empty_prompt() {
        let repo = repo().await;
        let err = repo.enqueue(new_job("  ")).await.expect_err("must reject");
        assert!(matches!(err, JobError::Validation(_)));
    }

    #[tokio::test]
    async fn dequeue_is_fifo_by_creation() {
        let repo = repo().await;
        let a = repo.enqueue(new_job("first")).await.expect("enqueue a");
        let _b = repo.enqueue(new_job("second")).await.expect("enqueue b");

        let next = repo.dequeue_next().await.expect("dequeue").expect("some");
        assert_eq!(next.id, a.id);

        // Dequeue does not mutate status
        assert_eq!(next.status, JobStatus::Pending);
        let again = repo.dequeue_next().await.expect("dequeue").expect("some");
        assert_eq!(again.id, a.id);
    }

    #[tokio::test]
    async fn illegal_transitions_are_rejected() {
        let repo = repo().await;
        let job = repo.enqueue(new_job("a lighthouse")).await.expect("enqueue");

        let err = repo
            .transition(job.id, JobStatus::Completed, TransitionFields::default())
            .await
            .expect_err("pending -> completed is illegal");
        assert!(matches!(
            err,
            JobError::InvalidTransition {
                from: JobStatus::Pending,
                to: JobStatus::Completed
            }
        ));

        // Terminal states accept nothing
        repo.transition(job.id, JobStatus::Processing, TransitionFields::default())
            .await
            .expect("pending -> processing");
        repo.transition(job.id, JobStatus::Failed, TransitionFields::failed("boom"))
            .await
            .expect("processing -> failed");
        let err = repo
            .transition(job.id, JobStatus::Processing, TransitionFields::default())
            .await
            .expect_err("failed is terminal");
        assert!(matches!(err, JobError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn started_and_completed_are_stamped_once() {
        let repo = repo().await;
        let job = repo.enqueue(new_job("a lighthouse")).await.expect("enqueue");

        let processing = repo
            .transition(job.id, JobStatus::Processing, TransitionFields::default())
            .await
            .expect("to processing");
        let started = processing.started_at.expect("started_at set");
        assert!(processing.completed_at.is_none());

        let completed = repo
            .transition(
                job.id,
                JobStatus::Completed,
                TransitionFields::completed(JobResult {
                    artifacts: vec!["out/img.png".to_string()],
                    model_loading_time_ms: 1200,
                    generation_time_ms: 3400,
                }),
            )
            .await
            .expect("to completed");

        assert_eq!(completed.started_at, Some(started));
        assert!(completed.completed_at.is_some());
        assert!((completed.progress - 1.0).abs() < f32::EPSILON);
        assert_eq!(
            completed.result.expect("result").artifacts,
            vec!["out/img.png".to_string()]
        );
    }

    #[tokio::test]
    async fn cancel_pending_is_immediate() {
        let repo = repo().await;
        let job = repo.enqueue(new_job("a lighthouse")).await.expect("enqueue");

        match repo.cancel(job.id).await.expect("cancel") {
            CancelOutcome::Cancelled(cancelled) => {
                assert_eq!(cancelled.status, JobStatus::Cancelled);
                assert!(cancelled.completed_at.is_some());
            }
            other => panic!("expected Cancelled, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_processing_requests_abort() {
        let repo = repo().await;
        let job = repo.enqueue(new_job("a lighthouse")).await.expect("enqueue");
        repo.transition(job.id, JobStatus::Processing, TransitionFields::default())
            .await
            .expect("to processing");

        match repo.cancel(job.id).await.expect("cancel") {
            CancelOutcome::AbortRequested(j) => assert!(j.cancel_requested),
            other => panic!("expected AbortRequested, got {other:?}"),
        }
        assert!(repo.cancel_requested(job.id).await.expect("flag"));

        // Still processing until the scheduler resolves the in-flight call
        let fetched = repo.get(job.id).await.expect("get").expect("exists");
        assert_eq!(fetched.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn cancel_racing_a_claim_never_surfaces_the_race() {
        let repo = std::sync::Arc::new(repo().await);

        for _ in 0..20 {
            let job = repo.enqueue(new_job("contested")).await.expect("enqueue");
            let claimer = {
                let repo = repo.clone();
                let id = job.id;
                tokio::spawn(async move {
                    // Racing claim; losing to the cancel is fine
                    let _ = repo
                        .transition(id, JobStatus::Processing, TransitionFields::default())
                        .await;
                })
            };

            let outcome = repo.cancel(job.id).await.expect("cancel must resolve");
            claimer.await.expect("claimer");

            match outcome {
                CancelOutcome::Cancelled(j) => assert_eq!(j.status, JobStatus::Cancelled),
                CancelOutcome::AbortRequested(j) => assert!(j.cancel_requested),
                CancelOutcome::NotCancellable(status) => {
                    panic!("job cannot be terminal here, got {status}")
                }
            }
        }
    }

    #[tokio::test]
    async fn cancel_terminal_is_not_cancellable() {
        let repo = repo().await;
        let job = repo.enqueue(new_job("a lighthouse")).await.expect("enqueue");
        repo.transition(job.id, JobStatus::Processing, TransitionFields::default())
            .await
            .expect("to processing");
        repo.transition(job.id, JobStatus::Failed, TransitionFields::failed("boom"))
            .await
            .expect("to failed");

        match repo.cancel(job.id).await.expect("cancel") {
            CancelOutcome::NotCancellable(status) => assert_eq!(status, JobStatus::Failed),
            other => panic!("expected NotCancellable, got {other:?}"),
        }
        // State untouched
        let fetched = repo.get(job.id).await.expect("get").expect("exists");
        assert_eq!(fetched.status, JobStatus::Failed);
        assert_eq!(fetched.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn fail_all_unterminated_hits_pending_and_processing_only() {
        let repo = repo().await;
        let pending = repo.enqueue(new_job("one")).await.expect("enqueue");
        let processing = repo.enqueue(new_job("two")).await.expect("enqueue");
        repo.transition(processing.id, JobStatus::Processing, TransitionFields::default())
            .await
            .expect("to processing");
        let done = repo.enqueue(new_job("three")).await.expect("enqueue");
        repo.transition(done.id, JobStatus::Processing, TransitionFields::default())
            .await
            .expect("to processing");
        repo.transition(done.id, JobStatus::Completed, TransitionFields::default())
            .await
            .expect("to completed");

        let failed = repo
            .fail_all_unterminated("Server restarted - job cancelled")
            .await
            .expect("recover");
        assert_eq!(failed, 2);

        for id in [pending.id, processing.id] {
            let job = repo.get(id).await.expect("get").expect("exists");
            assert_eq!(job.status, JobStatus::Failed);
            assert_eq!(job.error.as_deref(), Some("Server restarted - job cancelled"));
            assert!(job.completed_at.is_some());
        }
        let untouched = repo.get(done.id).await.expect("get").expect("exists");
        assert_eq!(untouched.status, JobStatus::Completed);

        assert_eq!(repo.count_processing().await.expect("count"), 0);
    }
}
