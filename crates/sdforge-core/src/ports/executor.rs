//! Generation executor port.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::model_runtime::RunningTarget;
use crate::job::GenerationJob;
use crate::model::ModelConfig;

/// What a successful generation call produced.
#[derive(Debug, Clone, Default)]
pub struct GenerationOutcome {
    /// References to produced artifacts. May legitimately be empty; the
    /// scheduler treats an empty set as a failure.
    pub artifacts: Vec<String>,
    /// Wall time of the generation call.
    pub generation_time_ms: u64,
}

/// Executor call failures.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Could not reach the model process at all.
    #[error("Connection to model server failed: {0}")]
    Connect(String),

    /// The call ran past its deadline.
    #[error("Generation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The in-flight call was aborted by cancellation (cli mode kill).
    #[error("Generation was cancelled")]
    Cancelled,

    /// The model process answered with an error.
    #[error("Generation failed: {0}")]
    Failed(String),
}

impl ExecutorError {
    /// Connection-class failures are worth a bounded retry; a timed-out or
    /// explicitly failed generation is not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect(_))
    }
}

/// External collaborator that performs the actual generation call.
///
/// `target` is present for `server`/`api` execution and absent for `cli`
/// execution (which spawns its own process). `cli` implementations must
/// honor `cancel` by killing the spawned process; HTTP implementations have
/// no guaranteed mid-flight abort and may ignore it.
#[async_trait]
pub trait GenerationExecutor: Send + Sync {
    async fn generate(
        &self,
        job: &GenerationJob,
        config: &ModelConfig,
        target: Option<&RunningTarget>,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, ExecutorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connect_errors_are_retryable() {
        assert!(ExecutorError::Connect("refused".into()).is_retryable());
        assert!(!ExecutorError::Timeout { timeout_secs: 10 }.is_retryable());
        assert!(!ExecutorError::Cancelled.is_retryable());
        assert!(!ExecutorError::Failed("oom".into()).is_retryable());
    }
}
