//! Startup recovery: reconcile persisted state with reality after a crash
//! or restart.
//!
//! Runs once, before the scheduler starts. Order matters: orphaned server
//! processes are killed first so the GPU is actually free, then registry
//! entries are reset, then interrupted jobs are failed so clients see a
//! terminal status instead of a job stuck in `processing` forever.

use std::time::Duration;

use tracing::{info, warn};

use sdforge_core::ports::{JobRepository, ProcessRegistry, RepositoryError};

use crate::process::health::is_pid_alive;
use crate::process::kill_pid;

/// Failure reason stamped on jobs interrupted by a restart.
pub const RESTART_FAILURE_REASON: &str = "Server restarted - job cancelled";

/// What startup recovery found and fixed.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryReport {
    /// Orphaned server processes that were still alive and got killed.
    pub orphans_killed: u32,
    /// Registry entries reset to `stopped`.
    pub processes_reset: u32,
    /// Jobs moved from `pending`/`processing` to `failed`.
    pub jobs_failed: u64,
}

/// Run the full recovery pass.
pub async fn run_startup_recovery(
    registry: &dyn ProcessRegistry,
    jobs: &dyn JobRepository,
    stop_grace: Duration,
) -> Result<RecoveryReport, RepositoryError> {
    recover(registry, jobs, stop_grace, &is_pid_alive).await
}

async fn recover(
    registry: &dyn ProcessRegistry,
    jobs: &dyn JobRepository,
    stop_grace: Duration,
    is_alive: &(dyn Fn(u32) -> bool + Send + Sync),
) -> Result<RecoveryReport, RepositoryError> {
    let mut report = RecoveryReport::default();

    // Kill orphans from the previous run while we still know their PIDs
    for state in registry.all().await? {
        let Some(pid) = state.pid else { continue };
        if !is_alive(pid) {
            continue;
        }
        warn!(model_id = %state.model_id, pid = pid, "Killing orphaned model server from previous run");
        match kill_pid(pid, stop_grace).await {
            Ok(()) => report.orphans_killed += 1,
            Err(e) => {
                warn!(model_id = %state.model_id, pid = pid, error = %e, "Failed to kill orphan");
            }
        }
    }

    report.processes_reset = registry.reconcile_on_boot(is_alive).await?;
    report.jobs_failed = jobs.fail_all_unterminated(RESTART_FAILURE_REASON).await?;

    info!(
        orphans_killed = report.orphans_killed,
        processes_reset = report.processes_reset,
        jobs_failed = report.jobs_failed,
        "Startup recovery complete"
    );
    Ok(report)
}
