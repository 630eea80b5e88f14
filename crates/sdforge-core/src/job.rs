//! Generation job domain types.
//!
//! A [`GenerationJob`] is a single requested image-generation task with its
//! own lifecycle. Jobs are created `Pending`, picked up by the scheduler one
//! at a time, and always end in a terminal status. The legal transition
//! graph is owned by [`JobStatus::can_transition_to`]; every store
//! implementation must enforce it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique job identifier (UUID v4, serialized as a string).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an id from its string form.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// What kind of generation a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Generate,
    Edit,
    Variation,
}

impl JobKind {
    /// Stable string form used in storage and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Edit => "edit",
            Self::Variation => "variation",
        }
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Stable string form used in storage and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the storage string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// True once a job can never change status again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// The legal transition graph:
    /// `pending -> processing`, `pending -> cancelled`,
    /// `processing -> {completed, failed, cancelled}`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing | Self::Cancelled)
                | (Self::Processing, Self::Completed | Self::Failed | Self::Cancelled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sampling parameters shared by every job kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SamplingParams {
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Diffusion steps; model default when absent.
    pub steps: Option<u32>,
    /// Classifier-free guidance scale.
    pub guidance: Option<f32>,
    /// Sampler name (model-specific).
    pub sampler: Option<String>,
    /// RNG seed. Assigned at enqueue time when absent so every job is
    /// reproducible.
    pub seed: Option<u32>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            steps: None,
            guidance: None,
            sampler: None,
            seed: None,
        }
    }
}

/// Per-kind job parameters.
///
/// A tagged union so each kind carries exactly its required fields and the
/// required-field set is checked at construction time, not at dispatch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobParams {
    /// Text-to-image.
    Generate {
        prompt: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        negative_prompt: Option<String>,
        #[serde(flatten)]
        sampling: SamplingParams,
    },
    /// Prompt-guided edit of an existing image, optionally masked.
    Edit {
        prompt: String,
        input_asset: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mask_asset: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        negative_prompt: Option<String>,
        #[serde(flatten)]
        sampling: SamplingParams,
    },
    /// Variations of an existing image.
    Variation {
        input_asset: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
        #[serde(flatten)]
        sampling: SamplingParams,
    },
}

impl JobParams {
    /// The kind this parameter set belongs to.
    #[must_use]
    pub const fn kind(&self) -> JobKind {
        match self {
            Self::Generate { .. } => JobKind::Generate,
            Self::Edit { .. } => JobKind::Edit,
            Self::Variation { .. } => JobKind::Variation,
        }
    }

    /// Shared sampling parameters.
    #[must_use]
    pub const fn sampling(&self) -> &SamplingParams {
        match self {
            Self::Generate { sampling, .. }
            | Self::Edit { sampling, .. }
            | Self::Variation { sampling, .. } => sampling,
        }
    }

    fn sampling_mut(&mut self) -> &mut SamplingParams {
        match self {
            Self::Generate { sampling, .. }
            | Self::Edit { sampling, .. }
            | Self::Variation { sampling, .. } => sampling,
        }
    }

    /// Check the kind-specific required fields.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Generate { prompt, .. } if prompt.trim().is_empty() => {
                Err("generate jobs require a non-empty prompt".to_string())
            }
            Self::Edit { prompt, .. } if prompt.trim().is_empty() => {
                Err("edit jobs require a non-empty prompt".to_string())
            }
            Self::Edit { input_asset, .. } if input_asset.trim().is_empty() => {
                Err("edit jobs require an input asset".to_string())
            }
            Self::Variation { input_asset, .. } if input_asset.trim().is_empty() => {
                Err("variation jobs require an input asset".to_string())
            }
            _ => {
                let s = self.sampling();
                if s.width == 0 || s.height == 0 {
                    return Err("image dimensions must be non-zero".to_string());
                }
                Ok(())
            }
        }
    }
}

/// A validated job submission, ready for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    /// Model the job runs against.
    pub model_id: String,
    /// Kind-tagged parameters.
    pub params: JobParams,
}

impl NewJob {
    /// Validate required fields and assign a random seed when absent.
    ///
    /// This is the only place seeds are assigned; afterwards every job has
    /// a concrete seed and reruns are reproducible.
    pub fn validated(mut self) -> Result<Self, String> {
        if self.model_id.trim().is_empty() {
            return Err("modelId is required".to_string());
        }
        self.params.validate()?;
        let sampling = self.params.sampling_mut();
        if sampling.seed.is_none() {
            sampling.seed = Some(rand::random::<u32>());
        }
        Ok(self)
    }
}

/// Result payload of a successfully completed job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    /// References to produced artifacts (image paths or URLs).
    pub artifacts: Vec<String>,
    /// Time spent ensuring the model process was ready.
    pub model_loading_time_ms: u64,
    /// Time spent in the generation call itself.
    pub generation_time_ms: u64,
}

/// A persisted generation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationJob {
    pub id: JobId,
    pub kind: JobKind,
    pub model_id: String,
    pub params: JobParams,
    pub status: JobStatus,
    /// Progress in `[0.0, 1.0]`.
    pub progress: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    /// True once cancellation was requested while the job was in flight.
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    /// Set once, on the first `pending -> processing` transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set once, on any transition into a terminal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Set on every mutation.
    pub updated_at: DateTime<Utc>,
}

/// Optional fields merged into a job during a status transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub progress: Option<f32>,
    pub error: Option<String>,
    pub result: Option<JobResult>,
}

impl TransitionFields {
    /// Fields for a failure transition.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Fields for a successful completion.
    #[must_use]
    pub fn completed(result: JobResult) -> Self {
        Self {
            progress: Some(1.0),
            result: Some(result),
            ..Self::default()
        }
    }
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// The job was pending and is now cancelled.
    Cancelled(GenerationJob),
    /// The job is processing; abort was requested but the in-flight call
    /// must resolve before the job reaches `cancelled`. For server/api
    /// execution there is no guaranteed mid-flight abort.
    AbortRequested(GenerationJob),
    /// The job is already terminal; nothing was mutated.
    NotCancellable(JobStatus),
}
