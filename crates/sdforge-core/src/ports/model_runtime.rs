//! Model runtime port: the scheduler's view of process management.
//!
//! The scheduler never touches OS processes directly; it asks this port to
//! make the right process available and receives routing information back.

use async_trait::async_trait;
use thiserror::Error;

use super::RepositoryError;
use crate::model::ModelConfig;
use crate::process::ModelProcessState;

/// Routing information for a ready model server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningTarget {
    /// Full base URL (e.g. `http://127.0.0.1:1400`).
    pub base_url: String,
    /// Port the server is listening on (0 for remote endpoints).
    pub port: u16,
    /// Model being served.
    pub model_id: String,
}

impl RunningTarget {
    /// Target for a locally spawned server.
    #[must_use]
    pub fn local(port: u16, model_id: impl Into<String>) -> Self {
        Self {
            base_url: format!("http://127.0.0.1:{port}"),
            port,
            model_id: model_id.into(),
        }
    }

    /// Target for a remote `api`-mode endpoint.
    #[must_use]
    pub fn remote(endpoint: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            base_url: endpoint.into(),
            port: 0,
            model_id: model_id.into(),
        }
    }
}

/// Errors from process lifecycle operations.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Spawning the configured command failed.
    #[error("Failed to start model {model_id}: {reason}")]
    SpawnFailed { model_id: String, reason: String },

    /// The process spawned but never became ready within the start timeout.
    #[error("Model {model_id} failed to become ready within {timeout_secs}s")]
    StartTimeout { model_id: String, timeout_secs: u64 },

    /// No usable listen port.
    #[error("Port unavailable: {0}")]
    PortUnavailable(String),

    /// A running process stopped responding to heartbeats.
    #[error("Model {model_id} stopped responding: {reason}")]
    HeartbeatLost { model_id: String, reason: String },

    /// Registry read/write failure.
    #[error(transparent)]
    Registry(#[from] RepositoryError),

    /// Anything else.
    #[error("Process error: {0}")]
    Internal(String),
}

/// Process control surface used by the scheduler and status queries.
#[async_trait]
pub trait ModelRuntimePort: Send + Sync {
    /// Make sure the process for `config` is ready.
    ///
    /// - `cli` / `api` modes have no persistent process: returns `Ok(None)`.
    /// - `server` mode stops any other active server first (sequentially),
    ///   then starts and readiness-polls this one, returning its target.
    async fn ensure_running(
        &self,
        config: &ModelConfig,
    ) -> Result<Option<RunningTarget>, ProcessError>;

    /// Stop the process for a model. Idempotent: stopping a stopped (or
    /// unknown) model is a no-op. Also clears `error` state.
    async fn stop(&self, model_id: &str) -> Result<(), ProcessError>;

    /// Read-only projection of registry state for one model.
    async fn status(&self, model_id: &str) -> Result<Option<ModelProcessState>, ProcessError>;
}
