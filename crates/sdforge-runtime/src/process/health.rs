//! Health check utilities for model server processes.

use anyhow::{Result, anyhow};
use sysinfo::{Pid, ProcessStatus, System};
use tokio::time::{Duration, sleep};
use tracing::{debug, info};

/// Poll a model server's `/health` endpoint until it returns 200 OK or the
/// timeout elapses. Used while a freshly spawned server loads its weights.
pub async fn wait_for_http_health(port: u16, timeout_secs: u64) -> Result<()> {
    let health_url = format!("http://127.0.0.1:{port}/health");
    info!("Waiting for model server to be ready at {health_url}");

    let max_attempts = timeout_secs;
    let mut attempt = 0;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;

    loop {
        attempt += 1;
        sleep(Duration::from_secs(1)).await;

        match client.get(&health_url).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    info!("Model server is ready on port {port}");
                    return Ok(());
                }
                debug!("Health check returned status {status} (expected 200), retrying...");

                // A clear error from another service means we bound the wrong port
                if (status.as_u16() == 403 || status.as_u16() == 404) && attempt > 3 {
                    return Err(anyhow!(
                        "Port {port} appears to be in use by another service (status {status})"
                    ));
                }
            }
            Err(e) => {
                debug!("Health check failed: {e}, retrying...");
            }
        }

        if attempt >= max_attempts {
            return Err(anyhow!(
                "Model server failed to become healthy within {max_attempts}s on port {port}"
            ));
        }
    }
}

/// Single-shot health probe against a running server.
pub async fn check_http_health(client: &reqwest::Client, port: u16) -> bool {
    let health_url = format!("http://127.0.0.1:{port}/health");
    match client.get(&health_url).send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

/// Check whether a process is alive using sysinfo.
pub fn is_pid_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(sysinfo::ProcessesToUpdate::All, false);

    let pid = Pid::from_u32(pid);
    system.process(pid).is_some_and(|process| {
        matches!(
            process.status(),
            ProcessStatus::Run | ProcessStatus::Sleep | ProcessStatus::Idle
        )
    })
}
