//! Generation executors: how a dispatched job actually produces images.
//!
//! - [`HttpExecutor`] posts to a local model server or a remote `api`
//!   endpoint.
//! - [`CliExecutor`] spawns the configured binary once per job.
//! - [`ExecutorRouter`] picks one of the two based on the model's exec mode.

mod cli;
mod http;
mod request;

pub use cli::CliExecutor;
pub use http::HttpExecutor;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use sdforge_core::ports::{ExecutorError, GenerationExecutor, GenerationOutcome, RunningTarget};
use sdforge_core::{ExecMode, GenerationJob, ModelConfig};

/// Routes each job to the executor matching its model's exec mode.
pub struct ExecutorRouter {
    http: HttpExecutor,
    cli: CliExecutor,
}

impl ExecutorRouter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            http: HttpExecutor::new(),
            cli: CliExecutor::new(),
        }
    }
}

impl Default for ExecutorRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationExecutor for ExecutorRouter {
    async fn generate(
        &self,
        job: &GenerationJob,
        config: &ModelConfig,
        target: Option<&RunningTarget>,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, ExecutorError> {
        match config.exec_mode {
            ExecMode::Server | ExecMode::Api => {
                self.http.generate(job, config, target, deadline, cancel).await
            }
            ExecMode::Cli => self.cli.generate(job, config, target, deadline, cancel).await,
        }
    }
}
