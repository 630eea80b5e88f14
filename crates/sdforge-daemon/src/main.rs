//! sdforged - the sdforge daemon entry point.
//!
//! Startup order: bootstrap, recovery, then the background tasks. Recovery
//! must finish before the scheduler's first tick so it never dispatches
//! against stale state from a previous run.

mod bootstrap;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use bootstrap::{Args, Daemon, bootstrap};
use sdforge_runtime::run_startup_recovery;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let daemon = bootstrap(&args).await?;
    run(daemon).await
}

async fn run(daemon: Daemon) -> Result<()> {
    let stop_grace = Duration::from_secs(daemon.settings.effective_stop_grace_secs());
    run_startup_recovery(daemon.registry.as_ref(), daemon.jobs.as_ref(), stop_grace).await?;

    let shutdown = CancellationToken::new();

    // Surface status changes in the logs; this is the daemon's only event
    // consumer until an API layer subscribes
    let mut event_rx = daemon.events.subscribe();
    let event_log_task = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => {
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    info!(target: "sdforge::events", "{json}");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Event log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let heartbeat = daemon.heartbeat;
    let heartbeat_task = tokio::spawn({
        let token = shutdown.child_token();
        async move { heartbeat.run(token).await }
    });

    let scheduler_result = tokio::select! {
        result = daemon.scheduler.run(shutdown.child_token()) => {
            // Only a persistently failing store gets here
            if let Err(e) = &result {
                error!(error = %e, "Scheduler exited with an error");
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    };
    shutdown.cancel();
    let _ = heartbeat_task.await;
    event_log_task.abort();

    // Stop any running model server and drop its registry rows so the next
    // start begins from a clean slate
    if let Err(e) = daemon.manager.shutdown_all().await {
        warn!(error = %e, "Error stopping model servers during shutdown");
    }
    match daemon.registry.all().await {
        Ok(states) => {
            for state in states {
                if let Err(e) = daemon.registry.remove(&state.model_id).await {
                    warn!(model_id = %state.model_id, error = %e, "Error removing registry entry");
                }
            }
        }
        Err(e) => warn!(error = %e, "Error reading registry during shutdown"),
    }

    scheduler_result?;
    info!("sdforged stopped");
    Ok(())
}
