//! Settings domain types and validation.
//!
//! Pure domain types with no infrastructure dependencies. All fields are
//! optional to support partial configs and graceful defaults; use the
//! `effective_*()` accessors to read resolved values.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default scheduler tick interval in milliseconds.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 2_000;

/// Default base port for model server allocation.
pub const DEFAULT_BASE_PORT: u16 = 1400;

/// Default model start (readiness) timeout in seconds.
pub const DEFAULT_START_TIMEOUT_SECS: u64 = 120;

/// Default grace period before escalating a stop to a hard kill.
pub const DEFAULT_STOP_GRACE_SECS: u64 = 5;

/// Default heartbeat check interval in seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// Default heartbeat staleness threshold in seconds.
pub const DEFAULT_HEARTBEAT_STALE_SECS: u64 = 60;

/// Default generation call deadline in seconds.
pub const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 600;

/// Default number of extra attempts for retryable executor failures.
pub const DEFAULT_EXECUTOR_RETRIES: u32 = 2;

/// Default base backoff between executor retries in milliseconds.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 1_000;

/// Application settings structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Scheduler polling interval in milliseconds.
    pub tick_interval_ms: Option<u64>,
    /// First port in the server allocation range.
    pub base_port: Option<u16>,
    /// Seconds to wait for a spawned server to become ready.
    pub start_timeout_secs: Option<u64>,
    /// Seconds to wait for graceful exit before force-terminating.
    pub stop_grace_secs: Option<u64>,
    /// Seconds between heartbeat checks of a running server.
    pub heartbeat_interval_secs: Option<u64>,
    /// Seconds without a successful heartbeat before a running server is
    /// marked errored.
    pub heartbeat_stale_secs: Option<u64>,
    /// Deadline for a single generation call in seconds.
    pub generation_timeout_secs: Option<u64>,
    /// Extra attempts for retryable executor failures.
    pub executor_retries: Option<u32>,
    /// Base backoff between executor retries, doubled per attempt.
    pub retry_backoff_ms: Option<u64>,
}

/// Settings validation failures.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Invalid setting {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

impl Settings {
    #[must_use]
    pub const fn effective_tick_interval_ms(&self) -> u64 {
        match self.tick_interval_ms {
            Some(v) => v,
            None => DEFAULT_TICK_INTERVAL_MS,
        }
    }

    #[must_use]
    pub const fn effective_base_port(&self) -> u16 {
        match self.base_port {
            Some(v) => v,
            None => DEFAULT_BASE_PORT,
        }
    }

    #[must_use]
    pub const fn effective_start_timeout_secs(&self) -> u64 {
        match self.start_timeout_secs {
            Some(v) => v,
            None => DEFAULT_START_TIMEOUT_SECS,
        }
    }

    #[must_use]
    pub const fn effective_stop_grace_secs(&self) -> u64 {
        match self.stop_grace_secs {
            Some(v) => v,
            None => DEFAULT_STOP_GRACE_SECS,
        }
    }

    #[must_use]
    pub const fn effective_heartbeat_interval_secs(&self) -> u64 {
        match self.heartbeat_interval_secs {
            Some(v) => v,
            None => DEFAULT_HEARTBEAT_INTERVAL_SECS,
        }
    }

    #[must_use]
    pub const fn effective_heartbeat_stale_secs(&self) -> u64 {
        match self.heartbeat_stale_secs {
            Some(v) => v,
            None => DEFAULT_HEARTBEAT_STALE_SECS,
        }
    }

    #[must_use]
    pub const fn effective_generation_timeout_secs(&self) -> u64 {
        match self.generation_timeout_secs {
            Some(v) => v,
            None => DEFAULT_GENERATION_TIMEOUT_SECS,
        }
    }

    #[must_use]
    pub const fn effective_executor_retries(&self) -> u32 {
        match self.executor_retries {
            Some(v) => v,
            None => DEFAULT_EXECUTOR_RETRIES,
        }
    }

    #[must_use]
    pub const fn effective_retry_backoff_ms(&self) -> u64 {
        match self.retry_backoff_ms {
            Some(v) => v,
            None => DEFAULT_RETRY_BACKOFF_MS,
        }
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if let Some(port) = self.base_port {
            if port < 1024 {
                return Err(SettingsError::Invalid {
                    field: "basePort",
                    reason: format!("{port} is a privileged port, use >= 1024"),
                });
            }
        }
        if self.effective_tick_interval_ms() == 0 {
            return Err(SettingsError::Invalid {
                field: "tickIntervalMs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.effective_heartbeat_stale_secs() < self.effective_heartbeat_interval_secs() {
            return Err(SettingsError::Invalid {
                field: "heartbeatStaleSecs",
                reason: "must be at least the heartbeat interval".to_string(),
            });
        }
        Ok(())
    }
}
