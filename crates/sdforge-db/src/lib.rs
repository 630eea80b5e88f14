//! `SQLite` persistence adapters for sdforge.
//!
//! Implements the `JobRepository` and `ProcessRegistry` ports from
//! `sdforge-core` on top of sqlx/SQLite, plus schema setup.

#![deny(unsafe_code)]

pub mod repositories;
pub mod setup;

// Re-export repository implementations
pub use repositories::{SqliteJobRepository, SqliteProcessRegistry};

// Re-export setup functions for convenient access
pub use setup::setup_database;
#[cfg(any(test, feature = "test-utils"))]
pub use setup::setup_test_database;
