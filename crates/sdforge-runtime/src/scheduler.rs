//! Queue scheduler: polls for pending jobs and drives them to a terminal
//! status, one at a time.
//!
//! Single-flight is the core guarantee here. The host has one GPU, so at
//! most one job is ever `processing`; everything else waits in FIFO order.
//! The scheduler is the only component that moves jobs between statuses.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sdforge_core::ports::{
    CatalogError, ExecutorError, GenerationExecutor, GenerationOutcome, JobError, JobRepository,
    ModelCatalog, ModelRuntimePort, RepositoryError, RunningTarget,
};
use sdforge_core::{
    CancelOutcome, ExecMode, GenerationJob, JobEvents, JobId, JobResult, JobStatus, ModelConfig,
    Settings, TransitionFields,
};

/// Consecutive tick failures tolerated before the scheduler gives up.
/// Transient storage hiccups self-heal; a persistently broken store should
/// take the daemon down rather than spin forever.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Scheduler-fatal errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Job(#[from] JobError),
}

/// Scheduler tunables, derived from [`Settings`].
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub generation_timeout: Duration,
    pub executor_retries: u32,
    pub retry_backoff: Duration,
}

impl SchedulerConfig {
    #[must_use]
    pub const fn from_settings(settings: &Settings) -> Self {
        Self {
            tick_interval: Duration::from_millis(settings.effective_tick_interval_ms()),
            generation_timeout: Duration::from_secs(settings.effective_generation_timeout_secs()),
            executor_retries: settings.effective_executor_retries(),
            retry_backoff: Duration::from_millis(settings.effective_retry_backoff_ms()),
        }
    }
}

/// Cancellation tokens for in-flight jobs.
///
/// Cancellation must reach the executor (to kill a CLI process) while the
/// durable `cancel_requested` flag covers crashes. This hub is the in-memory
/// half of that pair.
#[derive(Default)]
pub struct CancelHub {
    active: StdMutex<HashMap<JobId, CancellationToken>>,
}

impl CancelHub {
    fn register(&self, id: JobId) -> CancellationToken {
        let token = CancellationToken::new();
        self.active
            .lock()
            .expect("cancel hub lock poisoned")
            .insert(id, token.clone());
        token
    }

    fn deregister(&self, id: JobId) {
        self.active
            .lock()
            .expect("cancel hub lock poisoned")
            .remove(&id);
    }

    /// Fire the token for an in-flight job. Returns false when the job is
    /// not currently executing here (cancellation then rests on the durable
    /// flag alone).
    pub fn request(&self, id: JobId) -> bool {
        self.active
            .lock()
            .expect("cancel hub lock poisoned")
            .get(&id)
            .map(|token| {
                token.cancel();
                true
            })
            .unwrap_or(false)
    }
}

/// Apply a cancellation request and propagate it to the in-flight call.
///
/// Pending jobs cancel immediately; processing jobs get the durable flag plus
/// a token fire so CLI processes die promptly. The scheduler settles the
/// final status once the in-flight call resolves.
pub async fn request_cancel(
    jobs: &dyn JobRepository,
    hub: &CancelHub,
    events: &dyn JobEvents,
    id: JobId,
) -> Result<CancelOutcome, JobError> {
    let outcome = jobs.cancel(id).await?;
    match &outcome {
        CancelOutcome::Cancelled(job) => {
            info!(job_id = %id, "Cancelled pending job");
            events.job_status(job);
        }
        CancelOutcome::AbortRequested(_) => {
            let fired = hub.request(id);
            info!(job_id = %id, token_fired = fired, "Requested abort of in-flight job");
        }
        CancelOutcome::NotCancellable(status) => {
            debug!(job_id = %id, status = %status, "Job already terminal, nothing to cancel");
        }
    }
    Ok(outcome)
}

/// Polling dispatcher for generation jobs.
pub struct QueueScheduler {
    jobs: Arc<dyn JobRepository>,
    catalog: Arc<dyn ModelCatalog>,
    runtime: Arc<dyn ModelRuntimePort>,
    executor: Arc<dyn GenerationExecutor>,
    events: Arc<dyn JobEvents>,
    cancel_hub: Arc<CancelHub>,
    config: SchedulerConfig,
}

impl QueueScheduler {
    #[must_use]
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        catalog: Arc<dyn ModelCatalog>,
        runtime: Arc<dyn ModelRuntimePort>,
        executor: Arc<dyn GenerationExecutor>,
        events: Arc<dyn JobEvents>,
        cancel_hub: Arc<CancelHub>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            jobs,
            catalog,
            runtime,
            executor,
            events,
            cancel_hub,
            config,
        }
    }

    /// Poll loop. Runs until `cancel` fires or the store fails persistently.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), SchedulerError> {
        info!(
            tick_interval_ms = self.config.tick_interval.as_millis() as u64,
            "Scheduler started"
        );
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_failures = 0u32;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Scheduler stopping");
                    return Ok(());
                }
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(()) => consecutive_failures = 0,
                        Err(e) => {
                            consecutive_failures += 1;
                            error!(
                                error = %e,
                                consecutive = consecutive_failures,
                                "Scheduler tick failed"
                            );
                            if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                                return Err(e);
                            }
                        }
                    }
                }
            }
        }
    }

    /// One dispatch attempt: claim the oldest pending job (if the slot is
    /// free) and drive it to a terminal status.
    pub async fn tick(&self) -> Result<(), SchedulerError> {
        if self.jobs.count_processing().await? > 0 {
            debug!("A job is already processing, skipping tick");
            return Ok(());
        }
        let Some(job) = self.jobs.dequeue_next().await? else {
            return Ok(());
        };

        let Some(job) = self.claim(job.id).await? else {
            return Ok(());
        };
        info!(job_id = %job.id, model_id = %job.model_id, kind = %job.kind.as_str(), "Dispatching job");

        let config = match self.catalog.get(&job.model_id).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                return self
                    .finish_failed(job.id, format!("Model not found: {}", job.model_id))
                    .await;
            }
            Err(CatalogError::Internal(reason)) => {
                return self
                    .finish_failed(job.id, format!("Model catalog error: {reason}"))
                    .await;
            }
        };

        let token = self.cancel_hub.register(job.id);
        // A cancel may have landed between the claim and the token
        // registration; re-check the durable flag so it still fires
        match self.jobs.cancel_requested(job.id).await {
            Ok(true) => token.cancel(),
            Ok(false) => {}
            Err(e) => {
                self.cancel_hub.deregister(job.id);
                return Err(SchedulerError::Repository(e));
            }
        }
        let result = self.run_job(&job, &config, &token).await;
        self.cancel_hub.deregister(job.id);

        // A read failure here must not lose the outcome we already have;
        // the token and the executor result still carry most cancellations
        let durable_cancel = match self.jobs.cancel_requested(job.id).await {
            Ok(flag) => flag,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Could not read cancel flag, settling on executor outcome");
                false
            }
        };

        // Cancellation wins over whatever the executor returned: the user
        // asked for the job to stop, so late artifacts are discarded.
        let cancelled = token.is_cancelled()
            || matches!(&result, Err(RunFailure::Cancelled))
            || durable_cancel;
        if cancelled {
            let job = self
                .jobs
                .transition(job.id, JobStatus::Cancelled, TransitionFields::default())
                .await?;
            info!(job_id = %job.id, "Job cancelled");
            self.events.job_status(&job);
            return Ok(());
        }

        match result {
            Ok(result) => {
                let job = self
                    .jobs
                    .transition(job.id, JobStatus::Completed, TransitionFields::completed(result))
                    .await?;
                info!(job_id = %job.id, "Job completed");
                self.events.job_status(&job);
                Ok(())
            }
            Err(RunFailure::Cancelled) => unreachable!("handled above"),
            Err(RunFailure::Failed(reason)) => self.finish_failed(job.id, reason).await,
        }
    }

    /// Move a dequeued job to `processing`. Returns `None` when the job was
    /// cancelled (or removed) between dequeue and claim.
    async fn claim(&self, id: JobId) -> Result<Option<GenerationJob>, SchedulerError> {
        let fields = TransitionFields {
            progress: Some(0.0),
            ..TransitionFields::default()
        };
        match self.jobs.transition(id, JobStatus::Processing, fields).await {
            Ok(job) => {
                self.events.job_status(&job);
                Ok(Some(job))
            }
            Err(JobError::InvalidTransition { from, to }) => {
                debug!(job_id = %id, from = %from, to = %to, "Job moved before claim, skipping");
                Ok(None)
            }
            Err(JobError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn run_job(
        &self,
        job: &GenerationJob,
        config: &ModelConfig,
        token: &CancellationToken,
    ) -> Result<JobResult, RunFailure> {
        let load_start = Instant::now();
        let target = match config.exec_mode {
            ExecMode::Server => self
                .runtime
                .ensure_running(config)
                .await
                .map_err(|e| RunFailure::Failed(e.to_string()))?,
            ExecMode::Api => match &config.endpoint {
                Some(endpoint) => Some(RunningTarget::remote(endpoint.clone(), &config.id)),
                None => {
                    return Err(RunFailure::Failed(format!(
                        "api model {} has no endpoint configured",
                        config.id
                    )));
                }
            },
            ExecMode::Cli => None,
        };
        let model_loading_time_ms = load_start.elapsed().as_millis() as u64;

        let outcome = self
            .execute_with_retry(job, config, target.as_ref(), token)
            .await
            .map_err(|e| match e {
                ExecutorError::Cancelled => RunFailure::Cancelled,
                other => RunFailure::Failed(other.to_string()),
            })?;

        if outcome.artifacts.is_empty() {
            return Err(RunFailure::Failed(
                "Generation completed but no images were produced".to_string(),
            ));
        }

        Ok(JobResult {
            artifacts: outcome.artifacts,
            model_loading_time_ms,
            generation_time_ms: outcome.generation_time_ms,
        })
    }

    /// Call the executor, retrying connection-class failures with doubling
    /// backoff. Retries never survive a cancellation request.
    async fn execute_with_retry(
        &self,
        job: &GenerationJob,
        config: &ModelConfig,
        target: Option<&RunningTarget>,
        token: &CancellationToken,
    ) -> Result<GenerationOutcome, ExecutorError> {
        let mut attempt: u32 = 0;
        loop {
            match self
                .executor
                .generate(job, config, target, self.config.generation_timeout, token)
                .await
            {
                Err(e)
                    if e.is_retryable()
                        && attempt < self.config.executor_retries
                        && !token.is_cancelled() =>
                {
                    attempt += 1;
                    let backoff = self.config.retry_backoff * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        job_id = %job.id,
                        attempt = attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Retryable generation failure, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
                other => return other,
            }
        }
    }

    async fn finish_failed(&self, id: JobId, reason: String) -> Result<(), SchedulerError> {
        warn!(job_id = %id, reason = %reason, "Job failed");
        let job = self
            .jobs
            .transition(id, JobStatus::Failed, TransitionFields::failed(reason))
            .await?;
        self.events.job_status(&job);
        Ok(())
    }
}

enum RunFailure {
    Cancelled,
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use sdforge_core::ports::ProcessError;
    use sdforge_core::{
        GenerationDefaults, JobParams, ModelProcessState, NewJob, NoopJobEvents, SamplingParams,
        StaticCatalog,
    };
    use sdforge_db::{SqliteJobRepository, setup_test_database};

    fn model(id: &str, exec_mode: ExecMode) -> ModelConfig {
        ModelConfig {
            id: id.to_string(),
            name: id.to_string(),
            exec_mode,
            command: "sd-server".to_string(),
            args: vec![],
            port: None,
            endpoint: match exec_mode {
                ExecMode::Api => Some("http://10.0.0.5:7860".to_string()),
                _ => None,
            },
            generation_defaults: GenerationDefaults::default(),
        }
    }

    fn new_job(model_id: &str, prompt: &str) -> NewJob {
        NewJob {
            model_id: model_id.to_string(),
            params: JobParams::Generate {
                prompt: prompt.to_string(),
                negative_prompt: None,
                sampling: SamplingParams::default(),
            },
        }
    }

    /// Runtime stub that always reports a ready local server.
    struct StubRuntime {
        ensure_calls: AtomicUsize,
    }

    impl StubRuntime {
        fn new() -> Self {
            Self {
                ensure_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ModelRuntimePort for StubRuntime {
        async fn ensure_running(
            &self,
            config: &ModelConfig,
        ) -> Result<Option<RunningTarget>, ProcessError> {
            self.ensure_calls.fetch_add(1, Ordering::SeqCst);
            if config.is_server() {
                Ok(Some(RunningTarget::local(1400, &config.id)))
            } else {
                Ok(None)
            }
        }

        async fn stop(&self, _model_id: &str) -> Result<(), ProcessError> {
            Ok(())
        }

        async fn status(
            &self,
            _model_id: &str,
        ) -> Result<Option<ModelProcessState>, ProcessError> {
            Ok(None)
        }
    }

    /// Runtime stub whose starts always fail.
    struct BrokenRuntime;

    #[async_trait]
    impl ModelRuntimePort for BrokenRuntime {
        async fn ensure_running(
            &self,
            config: &ModelConfig,
        ) -> Result<Option<RunningTarget>, ProcessError> {
            Err(ProcessError::StartTimeout {
                model_id: config.id.clone(),
                timeout_secs: 120,
            })
        }

        async fn stop(&self, _model_id: &str) -> Result<(), ProcessError> {
            Ok(())
        }

        async fn status(
            &self,
            _model_id: &str,
        ) -> Result<Option<ModelProcessState>, ProcessError> {
            Ok(None)
        }
    }

    /// One scripted step per generate call.
    enum Step {
        Succeed(Vec<&'static str>),
        ConnectError,
        Fail(&'static str),
        /// Block until the cancellation token fires, then report cancelled.
        WaitForCancel,
    }

    struct ScriptedExecutor {
        script: StdMutex<VecDeque<Step>>,
        calls: AtomicUsize,
    }

    impl ScriptedExecutor {
        fn new(steps: impl IntoIterator<Item = Step>) -> Self {
            Self {
                script: StdMutex::new(steps.into_iter().collect()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl GenerationExecutor for ScriptedExecutor {
        async fn generate(
            &self,
            _job: &GenerationJob,
            _config: &ModelConfig,
            _target: Option<&RunningTarget>,
            _deadline: Duration,
            cancel: &CancellationToken,
        ) -> Result<GenerationOutcome, ExecutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self
                .script
                .lock()
                .expect("script lock")
                .pop_front()
                .expect("executor called more times than scripted");
            match step {
                Step::Succeed(artifacts) => Ok(GenerationOutcome {
                    artifacts: artifacts.into_iter().map(String::from).collect(),
                    generation_time_ms: 42,
                }),
                Step::ConnectError => Err(ExecutorError::Connect("connection refused".into())),
                Step::Fail(reason) => Err(ExecutorError::Failed(reason.into())),
                Step::WaitForCancel => {
                    cancel.cancelled().await;
                    Err(ExecutorError::Cancelled)
                }
            }
        }
    }

    /// Job store wrapper whose cancel-flag reads always fail.
    struct CancelFlagOutage {
        inner: Arc<SqliteJobRepository>,
    }

    #[async_trait]
    impl JobRepository for CancelFlagOutage {
        async fn enqueue(&self, job: NewJob) -> Result<GenerationJob, JobError> {
            self.inner.enqueue(job).await
        }

        async fn get(&self, id: JobId) -> Result<Option<GenerationJob>, RepositoryError> {
            self.inner.get(id).await
        }

        async fn dequeue_next(&self) -> Result<Option<GenerationJob>, RepositoryError> {
            self.inner.dequeue_next().await
        }

        async fn count_processing(&self) -> Result<u64, RepositoryError> {
            self.inner.count_processing().await
        }

        async fn transition(
            &self,
            id: JobId,
            next: JobStatus,
            fields: TransitionFields,
        ) -> Result<GenerationJob, JobError> {
            self.inner.transition(id, next, fields).await
        }

        async fn cancel(&self, id: JobId) -> Result<CancelOutcome, JobError> {
            self.inner.cancel(id).await
        }

        async fn cancel_requested(&self, _id: JobId) -> Result<bool, RepositoryError> {
            Err(RepositoryError::Storage("disk I/O error".to_string()))
        }

        async fn fail_all_unterminated(&self, reason: &str) -> Result<u64, RepositoryError> {
            self.inner.fail_all_unterminated(reason).await
        }
    }

    struct Fixture {
        jobs: Arc<SqliteJobRepository>,
        scheduler: QueueScheduler,
        hub: Arc<CancelHub>,
    }

    async fn fixture(
        models: Vec<ModelConfig>,
        runtime: Arc<dyn ModelRuntimePort>,
        executor: Arc<dyn GenerationExecutor>,
        retries: u32,
    ) -> Fixture {
        let pool = setup_test_database().await.expect("test db");
        let jobs = Arc::new(SqliteJobRepository::new(pool));
        let hub = Arc::new(CancelHub::default());
        let config = SchedulerConfig {
            tick_interval: Duration::from_millis(10),
            generation_timeout: Duration::from_secs(5),
            executor_retries: retries,
            retry_backoff: Duration::from_millis(1),
        };
        let scheduler = QueueScheduler::new(
            jobs.clone(),
            Arc::new(StaticCatalog::new(models)),
            runtime,
            executor,
            Arc::new(NoopJobEvents),
            hub.clone(),
            config,
        );
        Fixture {
            jobs,
            scheduler,
            hub,
        }
    }

    #[tokio::test]
    async fn jobs_complete_in_fifo_order() {
        let executor = Arc::new(ScriptedExecutor::new([
            Step::Succeed(vec!["/out/a.png"]),
            Step::Succeed(vec!["/out/b.png"]),
        ]));
        let f = fixture(
            vec![model("sdxl", ExecMode::Server)],
            Arc::new(StubRuntime::new()),
            executor,
            0,
        )
        .await;

        let first = f.jobs.enqueue(new_job("sdxl", "first")).await.expect("enqueue");
        let second = f.jobs.enqueue(new_job("sdxl", "second")).await.expect("enqueue");

        f.scheduler.tick().await.expect("tick");
        let a = f.jobs.get(first.id).await.expect("get").expect("job");
        assert_eq!(a.status, JobStatus::Completed);
        assert_eq!(
            a.result.as_ref().expect("result").artifacts,
            vec!["/out/a.png"]
        );
        let b = f.jobs.get(second.id).await.expect("get").expect("job");
        assert_eq!(b.status, JobStatus::Pending);

        f.scheduler.tick().await.expect("tick");
        let b = f.jobs.get(second.id).await.expect("get").expect("job");
        assert_eq!(b.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn tick_skips_while_a_job_is_processing() {
        let executor = Arc::new(ScriptedExecutor::new([]));
        let f = fixture(
            vec![model("sdxl", ExecMode::Server)],
            Arc::new(StubRuntime::new()),
            executor.clone(),
            0,
        )
        .await;

        let stuck = f.jobs.enqueue(new_job("sdxl", "stuck")).await.expect("enqueue");
        f.jobs
            .transition(stuck.id, JobStatus::Processing, TransitionFields::default())
            .await
            .expect("transition");
        f.jobs.enqueue(new_job("sdxl", "waiting")).await.expect("enqueue");

        f.scheduler.tick().await.expect("tick");
        // The executor was never called: the slot is occupied
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_model_fails_the_job() {
        let executor = Arc::new(ScriptedExecutor::new([]));
        let f = fixture(vec![], Arc::new(StubRuntime::new()), executor, 0).await;

        let job = f.jobs.enqueue(new_job("ghost", "anything")).await.expect("enqueue");
        f.scheduler.tick().await.expect("tick");

        let job = f.jobs.get(job.id).await.expect("get").expect("job");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("Model not found: ghost"));
    }

    #[tokio::test]
    async fn empty_artifacts_fail_the_job() {
        let executor = Arc::new(ScriptedExecutor::new([Step::Succeed(vec![])]));
        let f = fixture(
            vec![model("sdxl", ExecMode::Server)],
            Arc::new(StubRuntime::new()),
            executor,
            0,
        )
        .await;

        let job = f.jobs.enqueue(new_job("sdxl", "void")).await.expect("enqueue");
        f.scheduler.tick().await.expect("tick");

        let job = f.jobs.get(job.id).await.expect("get").expect("job");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error.as_deref(),
            Some("Generation completed but no images were produced")
        );
    }

    #[tokio::test]
    async fn model_start_failure_fails_the_job() {
        let executor = Arc::new(ScriptedExecutor::new([]));
        let f = fixture(
            vec![model("sdxl", ExecMode::Server)],
            Arc::new(BrokenRuntime),
            executor,
            0,
        )
        .await;

        let job = f.jobs.enqueue(new_job("sdxl", "never runs")).await.expect("enqueue");
        f.scheduler.tick().await.expect("tick");

        let job = f.jobs.get(job.id).await.expect("get").expect("job");
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.expect("error").contains("failed to become ready"));
    }

    #[tokio::test]
    async fn connection_failures_are_retried() {
        let executor = Arc::new(ScriptedExecutor::new([
            Step::ConnectError,
            Step::Succeed(vec!["/out/retry.png"]),
        ]));
        let f = fixture(
            vec![model("sdxl", ExecMode::Server)],
            Arc::new(StubRuntime::new()),
            executor.clone(),
            2,
        )
        .await;

        let job = f.jobs.enqueue(new_job("sdxl", "flaky")).await.expect("enqueue");
        f.scheduler.tick().await.expect("tick");

        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
        let job = f.jobs.get(job.id).await.expect("get").expect("job");
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let executor = Arc::new(ScriptedExecutor::new([
            Step::ConnectError,
            Step::ConnectError,
            Step::ConnectError,
        ]));
        let f = fixture(
            vec![model("sdxl", ExecMode::Server)],
            Arc::new(StubRuntime::new()),
            executor.clone(),
            2,
        )
        .await;

        let job = f.jobs.enqueue(new_job("sdxl", "down")).await.expect("enqueue");
        f.scheduler.tick().await.expect("tick");

        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
        let job = f.jobs.get(job.id).await.expect("get").expect("job");
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn explicit_failures_are_not_retried() {
        let executor = Arc::new(ScriptedExecutor::new([Step::Fail("CUDA out of memory")]));
        let f = fixture(
            vec![model("sdxl", ExecMode::Server)],
            Arc::new(StubRuntime::new()),
            executor.clone(),
            2,
        )
        .await;

        let job = f.jobs.enqueue(new_job("sdxl", "oom")).await.expect("enqueue");
        f.scheduler.tick().await.expect("tick");

        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        let job = f.jobs.get(job.id).await.expect("get").expect("job");
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.expect("error").contains("CUDA out of memory"));
    }

    #[tokio::test]
    async fn api_models_use_the_configured_endpoint() {
        let executor = Arc::new(ScriptedExecutor::new([Step::Succeed(vec!["/out/api.png"])]));
        let runtime = Arc::new(StubRuntime::new());
        let f = fixture(
            vec![model("remote", ExecMode::Api)],
            runtime.clone(),
            executor,
            0,
        )
        .await;

        let job = f.jobs.enqueue(new_job("remote", "remote gen")).await.expect("enqueue");
        f.scheduler.tick().await.expect("tick");

        // api mode never touches the process runtime
        assert_eq!(runtime.ensure_calls.load(Ordering::SeqCst), 0);
        let job = f.jobs.get(job.id).await.expect("get").expect("job");
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn cancelling_a_pending_job_skips_dispatch() {
        let executor = Arc::new(ScriptedExecutor::new([]));
        let f = fixture(
            vec![model("sdxl", ExecMode::Server)],
            Arc::new(StubRuntime::new()),
            executor.clone(),
            0,
        )
        .await;

        let job = f.jobs.enqueue(new_job("sdxl", "doomed")).await.expect("enqueue");
        let outcome = request_cancel(f.jobs.as_ref(), &f.hub, &NoopJobEvents, job.id)
            .await
            .expect("cancel");
        assert!(matches!(outcome, CancelOutcome::Cancelled(_)));

        f.scheduler.tick().await.expect("tick");
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
        let job = f.jobs.get(job.id).await.expect("get").expect("job");
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn unreadable_cancel_flag_fails_the_tick_before_dispatch() {
        let pool = setup_test_database().await.expect("test db");
        let inner = Arc::new(SqliteJobRepository::new(pool));
        let executor = Arc::new(ScriptedExecutor::new([]));
        let scheduler = QueueScheduler::new(
            Arc::new(CancelFlagOutage {
                inner: inner.clone(),
            }),
            Arc::new(StaticCatalog::new(vec![model("sdxl", ExecMode::Server)])),
            Arc::new(StubRuntime::new()),
            executor.clone(),
            Arc::new(NoopJobEvents),
            Arc::new(CancelHub::default()),
            SchedulerConfig {
                tick_interval: Duration::from_millis(10),
                generation_timeout: Duration::from_secs(5),
                executor_retries: 0,
                retry_backoff: Duration::from_millis(1),
            },
        );

        let job = inner.enqueue(new_job("sdxl", "flag outage")).await.expect("enqueue");
        let err = scheduler.tick().await.expect_err("flag read failure must surface");
        assert!(matches!(err, SchedulerError::Repository(_)));

        // A possible cancel request is never silently dropped: the job is
        // not dispatched and the tick reports the failure
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
        let job = inner.get(job.id).await.expect("get").expect("job");
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn cancelling_an_in_flight_job_aborts_it() {
        let executor = Arc::new(ScriptedExecutor::new([Step::WaitForCancel]));
        let f = fixture(
            vec![model("sdxl", ExecMode::Server)],
            Arc::new(StubRuntime::new()),
            executor,
            0,
        )
        .await;

        let job = f.jobs.enqueue(new_job("sdxl", "long running")).await.expect("enqueue");
        let jobs = f.jobs.clone();
        let hub = f.hub.clone();
        let job_id = job.id;

        let canceller = tokio::spawn(async move {
            // Wait until the job is actually claimed, then cancel it
            loop {
                let current = jobs.get(job_id).await.expect("get").expect("job");
                if current.status == JobStatus::Processing {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            let outcome = request_cancel(jobs.as_ref(), &hub, &NoopJobEvents, job_id)
                .await
                .expect("cancel");
            assert!(matches!(outcome, CancelOutcome::AbortRequested(_)));
        });

        f.scheduler.tick().await.expect("tick");
        canceller.await.expect("canceller");

        let job = f.jobs.get(job.id).await.expect("get").expect("job");
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.cancel_requested);
    }
}
