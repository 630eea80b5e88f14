//! Model process domain types.
//!
//! One [`ModelProcessState`] exists per configured model that has ever been
//! started. State is mutated only by the process manager and reset by
//! startup recovery when the recorded PID is no longer alive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a model binary is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    /// Resident process answering many jobs over a local port.
    Server,
    /// Fresh process spawned per job, torn down after it exits.
    Cli,
    /// Remote HTTP endpoint; no local process at all.
    Api,
}

impl ExecMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Cli => "cli",
            Self::Api => "api",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "server" => Some(Self::Server),
            "cli" => Some(Self::Cli),
            "api" => Some(Self::Api),
            _ => None,
        }
    }
}

/// Lifecycle of a managed model process.
///
/// `stopped -> starting -> running -> stopping -> stopped`; any state can
/// fall into `error`. `error` only clears through an explicit stop call so
/// failures stay visible until handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl ProcessStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stopped" => Some(Self::Stopped),
            "starting" => Some(Self::Starting),
            "running" => Some(Self::Running),
            "stopping" => Some(Self::Stopping),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// True while the process occupies (or is about to occupy) the single
    /// server slot.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracked state of one model process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelProcessState {
    pub model_id: String,
    pub exec_mode: ExecMode,
    pub status: ProcessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

impl ModelProcessState {
    /// A fresh, stopped entry for a model.
    #[must_use]
    pub fn stopped(model_id: impl Into<String>, exec_mode: ExecMode) -> Self {
        Self {
            model_id: model_id.into(),
            exec_mode,
            status: ProcessStatus::Stopped,
            pid: None,
            port: None,
            started_at: None,
            last_heartbeat_at: None,
        }
    }
}

/// Partial update applied to a [`ModelProcessState`].
///
/// `pid` and `port` use a double `Option` so a patch can distinguish
/// "leave unchanged" (`None`) from "clear" (`Some(None)`).
#[derive(Debug, Clone, Default)]
pub struct ProcessStatePatch {
    pub status: Option<ProcessStatus>,
    pub pid: Option<Option<u32>>,
    pub port: Option<Option<u16>>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub last_heartbeat_at: Option<Option<DateTime<Utc>>>,
}

impl ProcessStatePatch {
    /// Patch that only changes the status.
    #[must_use]
    pub fn status(status: ProcessStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Patch recording a successful start.
    #[must_use]
    pub fn running(pid: u32, port: u16, now: DateTime<Utc>) -> Self {
        Self {
            status: Some(ProcessStatus::Running),
            pid: Some(Some(pid)),
            port: Some(Some(port)),
            started_at: Some(Some(now)),
            last_heartbeat_at: Some(Some(now)),
        }
    }

    /// Patch recording a clean stop: status `stopped`, pid/port cleared.
    #[must_use]
    pub fn stopped() -> Self {
        Self {
            status: Some(ProcessStatus::Stopped),
            pid: Some(None),
            port: Some(None),
            started_at: Some(None),
            last_heartbeat_at: Some(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_mode_roundtrip() {
        for mode in [ExecMode::Server, ExecMode::Cli, ExecMode::Api] {
            assert_eq!(ExecMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(ExecMode::parse("gpu"), None);
    }

    #[test]
    fn only_starting_and_running_are_active() {
        assert!(ProcessStatus::Starting.is_active());
        assert!(ProcessStatus::Running.is_active());
        assert!(!ProcessStatus::Stopped.is_active());
        assert!(!ProcessStatus::Stopping.is_active());
        assert!(!ProcessStatus::Error.is_active());
    }

    #[test]
    fn stopped_patch_clears_pid_and_port() {
        let patch = ProcessStatePatch::stopped();
        assert_eq!(patch.status, Some(ProcessStatus::Stopped));
        assert_eq!(patch.pid, Some(None));
        assert_eq!(patch.port, Some(None));
    }
}
