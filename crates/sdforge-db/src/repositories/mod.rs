//! `SQLite` repository implementations of the core ports.

mod row_mappers;
mod sqlite_job_repository;
mod sqlite_process_registry;

pub use sqlite_job_repository::SqliteJobRepository;
pub use sqlite_process_registry::SqliteProcessRegistry;
