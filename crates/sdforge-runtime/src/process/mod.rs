//! Model process lifecycle: spawning, health, shutdown, and the manager
//! that enforces the single-active-server policy.

pub mod health;
pub mod manager;
pub mod ports;
pub mod shutdown;
pub mod spawn;

pub use manager::{ManagerConfig, ModelProcessManager};
pub use shutdown::{kill_pid, shutdown_child};
