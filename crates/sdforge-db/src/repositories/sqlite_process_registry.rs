//! `SQLite` implementation of the `ProcessRegistry` port.

use async_trait::async_trait;
use sqlx::SqlitePool;

use sdforge_core::ports::{ProcessRegistry, RepositoryError};
use sdforge_core::process::{ExecMode, ModelProcessState, ProcessStatePatch, ProcessStatus};

use super::row_mappers::map_process_row;

fn storage(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Storage(e.to_string())
}

/// `SQLite`-backed model process registry.
pub struct SqliteProcessRegistry {
    pool: SqlitePool,
}

impl SqliteProcessRegistry {
    /// Create a new `SQLite` process registry.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn write(&self, state: &ModelProcessState) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT OR REPLACE INTO model_processes \
             (model_id, exec_mode, status, pid, port, started_at, last_heartbeat_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&state.model_id)
        .bind(state.exec_mode.as_str())
        .bind(state.status.as_str())
        .bind(state.pid.map(i64::from))
        .bind(state.port.map(i64::from))
        .bind(state.started_at.map(|t| t.to_rfc3339()))
        .bind(state.last_heartbeat_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }
}

#[async_trait]
impl ProcessRegistry for SqliteProcessRegistry {
    async fn get(&self, model_id: &str) -> Result<Option<ModelProcessState>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM model_processes WHERE model_id = ?")
            .bind(model_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.as_ref().map(map_process_row).transpose()
    }

    async fn all(&self) -> Result<Vec<ModelProcessState>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM model_processes ORDER BY model_id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        rows.iter().map(map_process_row).collect()
    }

    async fn upsert(
        &self,
        model_id: &str,
        exec_mode: ExecMode,
        patch: ProcessStatePatch,
    ) -> Result<ModelProcessState, RepositoryError> {
        let mut state = self
            .get(model_id)
            .await?
            .unwrap_or_else(|| ModelProcessState::stopped(model_id, exec_mode));
        state.exec_mode = exec_mode;

        if let Some(status) = patch.status {
            state.status = status;
        }
        if let Some(pid) = patch.pid {
            state.pid = pid;
        }
        if let Some(port) = patch.port {
            state.port = port;
        }
        if let Some(started_at) = patch.started_at {
            state.started_at = started_at;
        }
        if let Some(heartbeat) = patch.last_heartbeat_at {
            state.last_heartbeat_at = heartbeat;
        }

        self.write(&state).await?;
        Ok(state)
    }

    async fn remove(&self, model_id: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM model_processes WHERE model_id = ?")
            .bind(model_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn reconcile_on_boot(
        &self,
        is_alive: &(dyn Fn(u32) -> bool + Send + Sync),
    ) -> Result<u32, RepositoryError> {
        let mut reset = 0;

        for state in self.all().await? {
            if state.status == ProcessStatus::Stopped {
                continue;
            }
            let alive = state.pid.is_some_and(is_alive);
            if alive {
                continue;
            }

            tracing::info!(
                model_id = %state.model_id,
                pid = ?state.pid,
                status = %state.status,
                "Resetting stale process entry from previous run"
            );
            self.upsert(&state.model_id, state.exec_mode, ProcessStatePatch::stopped())
                .await?;
            reset += 1;
        }

        Ok(reset)
    }
}
