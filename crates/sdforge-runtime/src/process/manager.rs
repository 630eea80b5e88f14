//! Model process manager enforcing the single-active-server policy.
//!
//! At most one `server`-mode model is ever `starting` or `running`. Switching
//! models stops the old server before the new one spawns, because both map
//! the same GPU and cannot coexist. All lifecycle operations serialize on one
//! internal lock; a long model load simply delays the next operation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use sdforge_core::ports::{
    ModelRuntimePort, ProcessError, ProcessRegistry, RunningTarget,
};
use sdforge_core::{
    ExecMode, JobEvents, ModelConfig, ModelProcessState, ProcessStatePatch, ProcessStatus,
    Settings,
};

use super::health::{is_pid_alive, wait_for_http_health};
use super::ports::{allocate_port, is_port_available};
use super::shutdown::{kill_pid, shutdown_child};
use super::spawn::{drain_output, spawn_server};

/// Tunables for process lifecycle, derived from [`Settings`].
#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    pub base_port: u16,
    pub start_timeout_secs: u64,
    pub stop_grace: Duration,
    pub heartbeat_stale_secs: u64,
}

impl ManagerConfig {
    #[must_use]
    pub const fn from_settings(settings: &Settings) -> Self {
        Self {
            base_port: settings.effective_base_port(),
            start_timeout_secs: settings.effective_start_timeout_secs(),
            stop_grace: Duration::from_secs(settings.effective_stop_grace_secs()),
            heartbeat_stale_secs: settings.effective_heartbeat_stale_secs(),
        }
    }
}

#[derive(Default)]
struct Inner {
    /// Child handles for servers this instance spawned, keyed by model id.
    children: HashMap<String, Child>,
}

/// Owns server child processes and keeps the registry in sync with reality.
pub struct ModelProcessManager {
    registry: Arc<dyn ProcessRegistry>,
    events: Arc<dyn JobEvents>,
    config: ManagerConfig,
    inner: Mutex<Inner>,
}

impl ModelProcessManager {
    #[must_use]
    pub fn new(
        registry: Arc<dyn ProcessRegistry>,
        events: Arc<dyn JobEvents>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            registry,
            events,
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    async fn set_status(
        &self,
        model_id: &str,
        exec_mode: ExecMode,
        patch: ProcessStatePatch,
    ) -> Result<ModelProcessState, ProcessError> {
        let state = self.registry.upsert(model_id, exec_mode, patch).await?;
        self.events.model_status(model_id, state.status);
        Ok(state)
    }

    /// Stop every other active server so the slot is free for `model_id`.
    async fn vacate_server_slot(
        &self,
        inner: &mut Inner,
        model_id: &str,
    ) -> Result<(), ProcessError> {
        let others: Vec<String> = self
            .registry
            .all()
            .await?
            .into_iter()
            .filter(|s| {
                s.exec_mode == ExecMode::Server && s.status.is_active() && s.model_id != model_id
            })
            .map(|s| s.model_id)
            .collect();

        for other in others {
            info!(stopping = %other, starting = %model_id, "Swapping active model server");
            self.stop_locked(inner, &other).await?;
        }
        Ok(())
    }

    async fn stop_locked(&self, inner: &mut Inner, model_id: &str) -> Result<(), ProcessError> {
        let Some(state) = self.registry.get(model_id).await? else {
            return Ok(());
        };
        if state.status == ProcessStatus::Stopped {
            return Ok(());
        }

        let child = inner.children.remove(model_id);

        // Error entries with nothing running just need their state cleared
        if state.status == ProcessStatus::Error && state.pid.is_none() && child.is_none() {
            self.set_status(model_id, state.exec_mode, ProcessStatePatch::stopped())
                .await?;
            return Ok(());
        }

        self.set_status(
            model_id,
            state.exec_mode,
            ProcessStatePatch::status(ProcessStatus::Stopping),
        )
        .await?;

        if let Some(child) = child {
            if let Err(e) = shutdown_child(child, self.config.stop_grace).await {
                warn!(model_id = %model_id, error = %e, "Error shutting down model server");
            }
        } else if let Some(pid) = state.pid {
            // No handle: the process belongs to a previous run of this daemon
            if is_pid_alive(pid) {
                if let Err(e) = kill_pid(pid, self.config.stop_grace).await {
                    warn!(model_id = %model_id, pid = pid, error = %e, "Error killing orphaned model server");
                }
            }
        }

        self.set_status(model_id, state.exec_mode, ProcessStatePatch::stopped())
            .await?;
        info!(model_id = %model_id, "Model server stopped");
        Ok(())
    }

    async fn start_locked(
        &self,
        inner: &mut Inner,
        config: &ModelConfig,
    ) -> Result<RunningTarget, ProcessError> {
        let port = self.resolve_port(config).await?;

        self.set_status(
            &config.id,
            ExecMode::Server,
            ProcessStatePatch::status(ProcessStatus::Starting),
        )
        .await?;

        let mut child = match spawn_server(config, port) {
            Ok(child) => child,
            Err(e) => {
                self.set_status(
                    &config.id,
                    ExecMode::Server,
                    ProcessStatePatch::status(ProcessStatus::Error),
                )
                .await?;
                return Err(ProcessError::SpawnFailed {
                    model_id: config.id.clone(),
                    reason: e.to_string(),
                });
            }
        };

        let pid = child.id().unwrap_or_default();
        drain_output(&mut child, &config.id);
        info!(model_id = %config.id, pid = pid, port = port, "Model server spawned, waiting for readiness");

        match wait_for_http_health(port, self.config.start_timeout_secs).await {
            Ok(()) => {
                self.set_status(
                    &config.id,
                    ExecMode::Server,
                    ProcessStatePatch::running(pid, port, Utc::now()),
                )
                .await?;
                inner.children.insert(config.id.clone(), child);
                info!(model_id = %config.id, port = port, "Model server ready");
                Ok(RunningTarget::local(port, &config.id))
            }
            Err(e) => {
                warn!(model_id = %config.id, error = %e, "Model server never became healthy, killing it");
                if let Err(kill_err) = shutdown_child(child, self.config.stop_grace).await {
                    warn!(model_id = %config.id, error = %kill_err, "Cleanup after failed start also failed");
                }
                self.set_status(
                    &config.id,
                    ExecMode::Server,
                    ProcessStatePatch::status(ProcessStatus::Error),
                )
                .await?;
                Err(ProcessError::StartTimeout {
                    model_id: config.id.clone(),
                    timeout_secs: self.config.start_timeout_secs,
                })
            }
        }
    }

    async fn resolve_port(&self, config: &ModelConfig) -> Result<u16, ProcessError> {
        if let Some(port) = config.port {
            if !is_port_available(port) {
                return Err(ProcessError::PortUnavailable(format!(
                    "configured port {port} for model {} is already in use",
                    config.id
                )));
            }
            return Ok(port);
        }

        let used: Vec<u16> = self
            .registry
            .all()
            .await?
            .into_iter()
            .filter_map(|s| s.port)
            .collect();
        allocate_port(self.config.base_port, &used)
            .map_err(|e| ProcessError::PortUnavailable(e.to_string()))
    }

    /// Periodic liveness check for one model, called by the heartbeat task.
    ///
    /// A healthy probe refreshes `last_heartbeat_at`. A failed probe is
    /// tolerated until the entry has been silent for the staleness window,
    /// then the process is marked `error` so the next dispatch restarts it.
    pub async fn heartbeat(&self, model_id: &str) -> Result<(), ProcessError> {
        let _guard = self.inner.lock().await;

        let Some(state) = self.registry.get(model_id).await? else {
            return Ok(());
        };
        if state.status != ProcessStatus::Running || state.exec_mode != ExecMode::Server {
            return Ok(());
        }

        let now = Utc::now();
        let pid_ok = state.pid.is_some_and(is_pid_alive);
        let http_ok = match state.port {
            Some(port) if pid_ok => {
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(2))
                    .build()
                    .map_err(|e| ProcessError::Internal(e.to_string()))?;
                super::health::check_http_health(&client, port).await
            }
            _ => false,
        };

        if pid_ok && http_ok {
            self.registry
                .upsert(
                    model_id,
                    state.exec_mode,
                    ProcessStatePatch {
                        last_heartbeat_at: Some(Some(now)),
                        ..ProcessStatePatch::default()
                    },
                )
                .await?;
            return Ok(());
        }

        let last_seen = state
            .last_heartbeat_at
            .or(state.started_at)
            .unwrap_or(now);
        let silent_secs = (now - last_seen).num_seconds().max(0) as u64;

        if silent_secs < self.config.heartbeat_stale_secs {
            warn!(
                model_id = %model_id,
                pid_ok = pid_ok,
                silent_secs = silent_secs,
                "Model server missed a heartbeat"
            );
            return Ok(());
        }

        warn!(model_id = %model_id, silent_secs = silent_secs, "Model server is stale, marking as errored");
        self.set_status(
            model_id,
            state.exec_mode,
            ProcessStatePatch::status(ProcessStatus::Error),
        )
        .await?;
        Err(ProcessError::HeartbeatLost {
            model_id: model_id.to_string(),
            reason: format!("no successful health check for {silent_secs}s"),
        })
    }

    /// Stop every server this manager knows about. Used at daemon shutdown.
    pub async fn shutdown_all(&self) -> Result<(), ProcessError> {
        let mut inner = self.inner.lock().await;
        let active: Vec<String> = self
            .registry
            .all()
            .await?
            .into_iter()
            .filter(|s| s.exec_mode == ExecMode::Server && s.status != ProcessStatus::Stopped)
            .map(|s| s.model_id)
            .collect();

        for model_id in active {
            if let Err(e) = self.stop_locked(&mut inner, &model_id).await {
                warn!(model_id = %model_id, error = %e, "Error stopping model server during shutdown");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ModelRuntimePort for ModelProcessManager {
    async fn ensure_running(
        &self,
        config: &ModelConfig,
    ) -> Result<Option<RunningTarget>, ProcessError> {
        if !config.is_server() {
            return Ok(None);
        }

        let mut inner = self.inner.lock().await;

        // Fast path: already running and still alive
        if let Some(state) = self.registry.get(&config.id).await? {
            if state.status == ProcessStatus::Running {
                if let (Some(pid), Some(port)) = (state.pid, state.port) {
                    if inner.children.contains_key(&config.id) || is_pid_alive(pid) {
                        debug!(model_id = %config.id, port = port, "Model server already running");
                        return Ok(Some(RunningTarget::local(port, &config.id)));
                    }
                }
                // Registry says running but the process is gone
                warn!(model_id = %config.id, "Registry entry is stale, restarting model server");
                self.stop_locked(&mut inner, &config.id).await?;
            } else if state.status != ProcessStatus::Stopped {
                // Clear stopping/error/half-started leftovers before starting
                self.stop_locked(&mut inner, &config.id).await?;
            }
        }

        self.vacate_server_slot(&mut inner, &config.id).await?;
        self.start_locked(&mut inner, config).await.map(Some)
    }

    async fn stop(&self, model_id: &str) -> Result<(), ProcessError> {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner, model_id).await
    }

    async fn status(&self, model_id: &str) -> Result<Option<ModelProcessState>, ProcessError> {
        Ok(self.registry.get(model_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdforge_core::NoopJobEvents;
    use sdforge_db::{SqliteProcessRegistry, setup_test_database};

    async fn manager() -> ModelProcessManager {
        let pool = setup_test_database().await.expect("test db");
        let registry = Arc::new(SqliteProcessRegistry::new(pool));
        let config = ManagerConfig {
            base_port: 21500,
            start_timeout_secs: 2,
            stop_grace: Duration::from_secs(1),
            heartbeat_stale_secs: 60,
        };
        ModelProcessManager::new(registry, Arc::new(NoopJobEvents), config)
    }

    fn model(id: &str, exec_mode: ExecMode, command: &str) -> ModelConfig {
        ModelConfig {
            id: id.to_string(),
            name: id.to_string(),
            exec_mode,
            command: command.to_string(),
            args: vec![],
            port: None,
            endpoint: None,
            generation_defaults: sdforge_core::GenerationDefaults::default(),
        }
    }

    #[tokio::test]
    async fn cli_and_api_models_have_no_process() {
        let manager = manager().await;

        let cli = model("sd-cli", ExecMode::Cli, "sd");
        assert!(manager.ensure_running(&cli).await.expect("cli").is_none());

        let api = model("dalle", ExecMode::Api, "");
        assert!(manager.ensure_running(&api).await.expect("api").is_none());
    }

    #[tokio::test]
    async fn stop_unknown_model_is_noop() {
        let manager = manager().await;
        manager.stop("never-started").await.expect("stop");
        assert!(manager.status("never-started").await.expect("status").is_none());
    }

    #[tokio::test]
    async fn spawn_failure_marks_error() {
        let manager = manager().await;
        let config = model("broken", ExecMode::Server, "/nonexistent/sd-server-binary");

        let err = manager.ensure_running(&config).await.expect_err("spawn must fail");
        assert!(matches!(err, ProcessError::SpawnFailed { .. }));

        let state = manager.status("broken").await.expect("status").expect("entry");
        assert_eq!(state.status, ProcessStatus::Error);
    }

    #[tokio::test]
    async fn stop_clears_error_state() {
        let manager = manager().await;
        let config = model("broken", ExecMode::Server, "/nonexistent/sd-server-binary");
        let _ = manager.ensure_running(&config).await;

        manager.stop("broken").await.expect("stop");
        let state = manager.status("broken").await.expect("status").expect("entry");
        assert_eq!(state.status, ProcessStatus::Stopped);
        assert!(state.pid.is_none());
    }

    #[tokio::test]
    async fn starting_a_server_vacates_the_active_one_first() {
        let manager = manager().await;
        // Model X holds the server slot: running entry from a previous run,
        // recorded PID long dead, no child handle held here
        manager
            .registry
            .upsert(
                "model-x",
                ExecMode::Server,
                ProcessStatePatch::running(u32::MAX - 1, 21501, Utc::now()),
            )
            .await
            .expect("upsert");

        // Y's spawn fails, which is fine: the swap happens before the spawn
        let config = model("model-y", ExecMode::Server, "/nonexistent/sd-server-binary");
        let err = manager.ensure_running(&config).await.expect_err("spawn must fail");
        assert!(matches!(err, ProcessError::SpawnFailed { .. }));

        let x = manager.status("model-x").await.expect("status").expect("entry");
        assert_eq!(x.status, ProcessStatus::Stopped);
        assert!(x.pid.is_none());
        assert!(x.port.is_none());

        let active = manager
            .registry
            .all()
            .await
            .expect("all")
            .into_iter()
            .filter(|s| s.exec_mode == ExecMode::Server && s.status.is_active())
            .count();
        assert_eq!(active, 0);
    }

    #[tokio::test]
    async fn heartbeat_ignores_non_running_entries() {
        let manager = manager().await;
        manager
            .registry
            .upsert("idle", ExecMode::Server, ProcessStatePatch::stopped())
            .await
            .expect("upsert");
        manager.heartbeat("idle").await.expect("heartbeat");
        manager.heartbeat("unknown").await.expect("heartbeat");
    }

    #[tokio::test]
    async fn stale_heartbeat_marks_error() {
        let manager = manager().await;
        // Running entry with a dead PID and a heartbeat far in the past
        let old = Utc::now() - chrono::Duration::seconds(600);
        manager
            .registry
            .upsert("sdxl", ExecMode::Server, ProcessStatePatch::running(u32::MAX - 1, 21599, old))
            .await
            .expect("upsert");

        let err = manager.heartbeat("sdxl").await.expect_err("must go stale");
        assert!(matches!(err, ProcessError::HeartbeatLost { .. }));

        let state = manager.status("sdxl").await.expect("status").expect("entry");
        assert_eq!(state.status, ProcessStatus::Error);
    }
}
