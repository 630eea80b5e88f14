//! HTTP executor for `server` and `api` models.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sdforge_core::ports::{ExecutorError, GenerationExecutor, GenerationOutcome, RunningTarget};
use sdforge_core::{GenerationJob, ModelConfig};

use super::request::{GenerateRequest, GenerateResponse};

/// Posts generation requests to a model server over HTTP.
///
/// There is no guaranteed mid-flight abort for HTTP generation; the
/// cancellation token is ignored and the scheduler reconciles the job status
/// after the call resolves.
pub struct HttpExecutor {
    client: reqwest::Client,
}

impl HttpExecutor {
    #[must_use]
    pub fn new() -> Self {
        // Per-request timeouts come from the job deadline, not the client
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationExecutor for HttpExecutor {
    async fn generate(
        &self,
        job: &GenerationJob,
        config: &ModelConfig,
        target: Option<&RunningTarget>,
        deadline: Duration,
        _cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, ExecutorError> {
        let target = target.ok_or_else(|| {
            ExecutorError::Failed(format!("no running target for model {}", config.id))
        })?;
        let url = format!("{}/generate", target.base_url.trim_end_matches('/'));
        let request = GenerateRequest::from_job(job, config);

        debug!(job_id = %job.id, url = %url, "Posting generation request");
        let started = Instant::now();

        let response = self
            .client
            .post(&url)
            .json(&request)
            .timeout(deadline)
            .send()
            .await
            .map_err(|e| classify_send_error(&e, deadline))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = if body.is_empty() {
                status.to_string()
            } else {
                format!("{status}: {body}")
            };
            return Err(ExecutorError::Failed(detail));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ExecutorError::Failed(format!("invalid response body: {e}")))?;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(GenerationOutcome {
            artifacts: parsed.artifacts,
            generation_time_ms: parsed.generation_time_ms.unwrap_or(elapsed_ms),
        })
    }
}

fn classify_send_error(e: &reqwest::Error, deadline: Duration) -> ExecutorError {
    if e.is_timeout() {
        ExecutorError::Timeout {
            timeout_secs: deadline.as_secs(),
        }
    } else if e.is_connect() {
        ExecutorError::Connect(e.to_string())
    } else {
        ExecutorError::Failed(e.to_string())
    }
}
