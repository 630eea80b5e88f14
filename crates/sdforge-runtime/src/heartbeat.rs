//! Periodic heartbeat supervision of the running model server.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sdforge_core::ports::ProcessRegistry;
use sdforge_core::{ExecMode, ProcessStatus, Settings};

use crate::process::ModelProcessManager;

/// Background task that probes the active server on a fixed interval.
///
/// The probes themselves (PID + HTTP, staleness window) live in
/// [`ModelProcessManager::heartbeat`]; this task only decides when to run
/// them and for which models.
pub struct HeartbeatMonitor {
    registry: Arc<dyn ProcessRegistry>,
    manager: Arc<ModelProcessManager>,
    interval: Duration,
}

impl HeartbeatMonitor {
    #[must_use]
    pub fn new(
        registry: Arc<dyn ProcessRegistry>,
        manager: Arc<ModelProcessManager>,
        settings: &Settings,
    ) -> Self {
        Self {
            registry,
            manager,
            interval: Duration::from_secs(settings.effective_heartbeat_interval_secs()),
        }
    }

    /// Run until `cancel` fires. Probe failures are logged, never fatal.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Heartbeat monitor started");
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Heartbeat monitor stopping");
                    return;
                }
                _ = interval.tick() => self.check_all().await,
            }
        }
    }

    async fn check_all(&self) {
        let states = match self.registry.all().await {
            Ok(states) => states,
            Err(e) => {
                warn!(error = %e, "Heartbeat could not read the process registry");
                return;
            }
        };

        for state in states {
            if state.exec_mode != ExecMode::Server || state.status != ProcessStatus::Running {
                continue;
            }
            if let Err(e) = self.manager.heartbeat(&state.model_id).await {
                warn!(model_id = %state.model_id, error = %e, "Heartbeat check failed");
            }
        }
    }
}
