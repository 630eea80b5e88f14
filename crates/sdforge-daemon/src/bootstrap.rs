//! Daemon bootstrap - the composition root.
//!
//! This module is the ONLY place where infrastructure is wired together:
//! database pool and repositories (sdforge-db), process manager and
//! scheduler (sdforge-runtime), and the static model catalog. Everything
//! else works against the ports from sdforge-core.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use sdforge_core::ports::{JobRepository, ModelCatalog, ProcessRegistry};
use sdforge_core::{ModelConfig, Settings, StaticCatalog};
use sdforge_db::{SqliteJobRepository, SqliteProcessRegistry, setup_database};
use sdforge_runtime::{
    BroadcastJobEvents, CancelHub, ExecutorRouter, HeartbeatMonitor, ManagerConfig,
    ModelProcessManager, QueueScheduler, SchedulerConfig,
};

/// Single-host image-generation job scheduler daemon.
#[derive(Debug, Parser)]
#[command(name = "sdforged", version, about)]
pub struct Args {
    /// Path to the SQLite database file.
    #[arg(long, env = "SDFORGE_DB", default_value = "sdforge.db")]
    pub db: PathBuf,

    /// Path to the model catalog: a JSON array of model configurations.
    #[arg(long, env = "SDFORGE_MODELS")]
    pub models: PathBuf,

    /// Optional settings overrides (JSON object, camelCase keys).
    #[arg(long, env = "SDFORGE_SETTINGS")]
    pub settings: Option<PathBuf>,
}

/// Fully composed daemon: every long-lived component, ready to run.
pub struct Daemon {
    pub settings: Settings,
    pub jobs: Arc<dyn JobRepository>,
    pub registry: Arc<dyn ProcessRegistry>,
    pub events: Arc<BroadcastJobEvents>,
    pub manager: Arc<ModelProcessManager>,
    pub heartbeat: HeartbeatMonitor,
    pub scheduler: QueueScheduler,
}

/// Load settings from the override file, or defaults when absent.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let settings = match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading settings from {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing settings from {}", path.display()))?
        }
        None => Settings::default(),
    };
    settings.validate()?;
    Ok(settings)
}

/// Load the model catalog from a JSON array of model configs.
pub fn load_catalog(path: &Path) -> Result<StaticCatalog> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading model catalog from {}", path.display()))?;
    let configs: Vec<ModelConfig> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing model catalog from {}", path.display()))?;
    Ok(StaticCatalog::new(configs))
}

/// Wire everything together.
pub async fn bootstrap(args: &Args) -> Result<Daemon> {
    let settings = load_settings(args.settings.as_deref())?;
    let catalog = load_catalog(&args.models)?;
    info!(models = catalog.len(), db = %args.db.display(), "Bootstrapping sdforge daemon");

    let pool = setup_database(&args.db).await?;
    let jobs: Arc<dyn JobRepository> = Arc::new(SqliteJobRepository::new(pool.clone()));
    let registry: Arc<dyn ProcessRegistry> = Arc::new(SqliteProcessRegistry::new(pool));

    let events = Arc::new(BroadcastJobEvents::new());
    let cancel_hub = Arc::new(CancelHub::default());

    let manager = Arc::new(ModelProcessManager::new(
        registry.clone(),
        events.clone(),
        ManagerConfig::from_settings(&settings),
    ));
    let heartbeat = HeartbeatMonitor::new(registry.clone(), manager.clone(), &settings);

    let catalog: Arc<dyn ModelCatalog> = Arc::new(catalog);
    let scheduler = QueueScheduler::new(
        jobs.clone(),
        catalog,
        manager.clone(),
        Arc::new(ExecutorRouter::new()),
        events.clone(),
        cancel_hub,
        SchedulerConfig::from_settings(&settings),
    );

    Ok(Daemon {
        settings,
        jobs,
        registry,
        events,
        manager,
        heartbeat,
        scheduler,
    })
}
