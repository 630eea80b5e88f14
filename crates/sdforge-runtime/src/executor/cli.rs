//! CLI executor: one spawned process per job.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sdforge_core::ports::{ExecutorError, GenerationExecutor, GenerationOutcome, RunningTarget};
use sdforge_core::{GenerationJob, ModelConfig};

use crate::process::shutdown_child;

use super::request::GenerateRequest;

/// Grace given to a CLI process between SIGTERM and SIGKILL on cancel.
const CANCEL_GRACE: Duration = Duration::from_secs(2);

/// Runs the configured binary once per job and reads artifact paths from its
/// stdout, one per line. Cancellation kills the process.
pub struct CliExecutor;

impl CliExecutor {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for CliExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Append the job's parameters as conventional flags after the configured
/// static arguments.
fn build_command(config: &ModelConfig, request: &GenerateRequest) -> Command {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);

    if let Some(prompt) = &request.prompt {
        cmd.arg("--prompt").arg(prompt);
    }
    if let Some(negative) = &request.negative_prompt {
        cmd.arg("--negative-prompt").arg(negative);
    }
    if let Some(input) = &request.input_asset {
        cmd.arg("--input").arg(input);
    }
    if let Some(mask) = &request.mask_asset {
        cmd.arg("--mask").arg(mask);
    }
    cmd.arg("--width").arg(request.width.to_string());
    cmd.arg("--height").arg(request.height.to_string());
    if let Some(steps) = request.steps {
        cmd.arg("--steps").arg(steps.to_string());
    }
    if let Some(guidance) = request.guidance {
        cmd.arg("--guidance").arg(guidance.to_string());
    }
    if let Some(sampler) = &request.sampler {
        cmd.arg("--sampler").arg(sampler);
    }
    if let Some(seed) = request.seed {
        cmd.arg("--seed").arg(seed.to_string());
    }

    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Collect a pipe's lines in the background so the child never blocks on a
/// full pipe while we wait on it.
fn collect_lines(reader: impl AsyncRead + Unpin + Send + 'static) -> JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let mut collected = Vec::new();
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            collected.push(line);
        }
        collected
    })
}

async fn drain(handle: JoinHandle<Vec<String>>) -> Vec<String> {
    handle.await.unwrap_or_default()
}

async fn kill_and_reap(child: Child, job: &GenerationJob) {
    if let Err(e) = shutdown_child(child, CANCEL_GRACE).await {
        warn!(job_id = %job.id, error = %e, "Error killing CLI generation process");
    }
}

#[async_trait]
impl GenerationExecutor for CliExecutor {
    async fn generate(
        &self,
        job: &GenerationJob,
        config: &ModelConfig,
        _target: Option<&RunningTarget>,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, ExecutorError> {
        let request = GenerateRequest::from_job(job, config);
        let mut child = build_command(config, &request)
            .spawn()
            .map_err(|e| ExecutorError::Connect(format!("failed to spawn {}: {e}", config.command)))?;

        debug!(job_id = %job.id, command = %config.command, "Spawned CLI generation process");
        let started = Instant::now();

        let stdout = child.stdout.take().map(collect_lines);
        let stderr = child.stderr.take().map(collect_lines);

        let status = tokio::select! {
            () = cancel.cancelled() => {
                kill_and_reap(child, job).await;
                return Err(ExecutorError::Cancelled);
            }
            () = tokio::time::sleep(deadline) => {
                kill_and_reap(child, job).await;
                return Err(ExecutorError::Timeout { timeout_secs: deadline.as_secs() });
            }
            status = child.wait() => {
                status.map_err(|e| ExecutorError::Failed(format!("wait failed: {e}")))?
            }
        };

        let stdout_lines = match stdout {
            Some(handle) => drain(handle).await,
            None => Vec::new(),
        };

        if !status.success() {
            let stderr_lines = match stderr {
                Some(handle) => drain(handle).await,
                None => Vec::new(),
            };
            let detail = stderr_lines.last().cloned().unwrap_or_else(|| status.to_string());
            return Err(ExecutorError::Failed(format!(
                "{} exited with {status}: {detail}",
                config.command
            )));
        }

        let artifacts: Vec<String> = stdout_lines
            .into_iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();

        Ok(GenerationOutcome {
            artifacts,
            generation_time_ms: started.elapsed().as_millis() as u64,
        })
    }
}
