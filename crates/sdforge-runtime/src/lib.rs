//! Runtime layer for sdforge: model process management, generation
//! executors, the queue scheduler, heartbeat supervision, and startup
//! recovery.

#![deny(unsafe_code)]

pub mod events;
pub mod executor;
pub mod heartbeat;
pub mod process;
pub mod recovery;
pub mod scheduler;

pub use events::BroadcastJobEvents;
pub use executor::{CliExecutor, ExecutorRouter, HttpExecutor};
pub use heartbeat::HeartbeatMonitor;
pub use process::{ManagerConfig, ModelProcessManager};
pub use recovery::{RESTART_FAILURE_REASON, RecoveryReport, run_startup_recovery};
pub use scheduler::{CancelHub, QueueScheduler, SchedulerConfig, SchedulerError, request_cancel};
