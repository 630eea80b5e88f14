//! Row-to-domain mapping helpers shared by the repositories.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use sdforge_core::job::{GenerationJob, JobId, JobParams, JobResult, JobStatus};
use sdforge_core::ports::RepositoryError;
use sdforge_core::process::{ExecMode, ModelProcessState, ProcessStatus};

/// Parse an RFC 3339 timestamp column.
pub fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Serialization(format!("bad {column} timestamp: {e}")))
}

fn parse_optional_timestamp(
    value: Option<String>,
    column: &str,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|v| parse_timestamp(&v, column)).transpose()
}

/// Map a `jobs` row to a [`GenerationJob`].
pub fn map_job_row(row: &SqliteRow) -> Result<GenerationJob, RepositoryError> {
    let id: String = row.get("id");
    let id = JobId::parse(&id)
        .map_err(|e| RepositoryError::Serialization(format!("bad job id: {e}")))?;

    let status: String = row.get("status");
    let status = JobStatus::parse(&status)
        .ok_or_else(|| RepositoryError::Serialization(format!("unknown job status: {status}")))?;

    let params: String = row.get("params");
    let params: JobParams = serde_json::from_str(&params)
        .map_err(|e| RepositoryError::Serialization(format!("bad job params: {e}")))?;
    let kind = params.kind();

    let result: Option<String> = row.get("result");
    let result: Option<JobResult> = result
        .map(|r| serde_json::from_str(&r))
        .transpose()
        .map_err(|e| RepositoryError::Serialization(format!("bad job result: {e}")))?;

    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    #[allow(clippy::cast_possible_truncation)]
    Ok(GenerationJob {
        id,
        kind,
        model_id: row.get("model_id"),
        params,
        status,
        progress: row.get::<f64, _>("progress") as f32,
        error: row.get("error"),
        result,
        cancel_requested: row.get::<i64, _>("cancel_requested") != 0,
        created_at: parse_timestamp(&created_at, "created_at")?,
        started_at: parse_optional_timestamp(row.get("started_at"), "started_at")?,
        completed_at: parse_optional_timestamp(row.get("completed_at"), "completed_at")?,
        updated_at: parse_timestamp(&updated_at, "updated_at")?,
    })
}

/// Map a `model_processes` row to a [`ModelProcessState`].
pub fn map_process_row(row: &SqliteRow) -> Result<ModelProcessState, RepositoryError> {
    let exec_mode: String = row.get("exec_mode");
    let exec_mode = ExecMode::parse(&exec_mode).ok_or_else(|| {
        RepositoryError::Serialization(format!("unknown exec mode: {exec_mode}"))
    })?;

    let status: String = row.get("status");
    let status = ProcessStatus::parse(&status).ok_or_else(|| {
        RepositoryError::Serialization(format!("unknown process status: {status}"))
    })?;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(ModelProcessState {
        model_id: row.get("model_id"),
        exec_mode,
        status,
        pid: row.get::<Option<i64>, _>("pid").map(|p| p as u32),
        port: row.get::<Option<i64>, _>("port").map(|p| p as u16),
        started_at: parse_optional_timestamp(row.get("started_at"), "started_at")?,
        last_heartbeat_at: parse_optional_timestamp(
            row.get("last_heartbeat_at"),
            "last_heartbeat_at",
        )?,
    })
}
