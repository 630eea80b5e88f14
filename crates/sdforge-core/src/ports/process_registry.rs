//! Process registry port.

use async_trait::async_trait;

use super::RepositoryError;
use crate::process::{ExecMode, ModelProcessState, ProcessStatePatch};

/// Durable record of which model processes are (believed to be) running.
///
/// Mutated only by the process manager and by startup recovery; everything
/// else reads.
#[async_trait]
pub trait ProcessRegistry: Send + Sync {
    /// Current state for one model, if it was ever started.
    async fn get(&self, model_id: &str) -> Result<Option<ModelProcessState>, RepositoryError>;

    /// All tracked states.
    async fn all(&self) -> Result<Vec<ModelProcessState>, RepositoryError>;

    /// Merge a patch into the entry for `model_id`, creating it lazily.
    async fn upsert(
        &self,
        model_id: &str,
        exec_mode: ExecMode,
        patch: ProcessStatePatch,
    ) -> Result<ModelProcessState, RepositoryError>;

    /// Drop the entry entirely (housekeeping after clean shutdown).
    async fn remove(&self, model_id: &str) -> Result<(), RepositoryError>;

    /// Crash recovery for the process layer: every entry whose recorded
    /// PID fails the liveness probe (or that has no PID but a non-stopped
    /// status) is forced to `stopped` with pid/port cleared. Returns the
    /// number of entries reset.
    async fn reconcile_on_boot(
        &self,
        is_alive: &(dyn Fn(u32) -> bool + Send + Sync),
    ) -> Result<u32, RepositoryError>;
}
