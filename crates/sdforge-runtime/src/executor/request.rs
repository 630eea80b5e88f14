//! Wire payloads shared by the generation executors.

use serde::{Deserialize, Serialize};

use sdforge_core::{GenerationJob, JobParams, ModelConfig};

/// Request body posted to a model server's `/generate` endpoint.
///
/// Kind-specific fields are optional and omitted when absent; `steps`,
/// `guidance` and `sampler` fall back to the model's configured defaults.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_asset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_asset: Option<String>,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampler: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
}

impl GenerateRequest {
    /// Flatten a job's tagged params into the wire shape, applying model
    /// defaults for unset sampling fields.
    #[must_use]
    pub fn from_job(job: &GenerationJob, config: &ModelConfig) -> Self {
        let sampling = job.params.sampling();
        let defaults = &config.generation_defaults;

        let (prompt, negative_prompt, input_asset, mask_asset) = match &job.params {
            JobParams::Generate {
                prompt,
                negative_prompt,
                ..
            } => (Some(prompt.clone()), negative_prompt.clone(), None, None),
            JobParams::Edit {
                prompt,
                input_asset,
                mask_asset,
                negative_prompt,
                ..
            } => (
                Some(prompt.clone()),
                negative_prompt.clone(),
                Some(input_asset.clone()),
                mask_asset.clone(),
            ),
            JobParams::Variation {
                input_asset, prompt, ..
            } => (prompt.clone(), None, Some(input_asset.clone()), None),
        };

        Self {
            kind: job.kind.as_str(),
            prompt,
            negative_prompt,
            input_asset,
            mask_asset,
            width: sampling.width,
            height: sampling.height,
            steps: sampling.steps.or(defaults.steps),
            guidance: sampling.guidance.or(defaults.guidance),
            sampler: sampling.sampler.clone().or_else(|| defaults.sampler.clone()),
            seed: sampling.seed,
        }
    }
}

/// Response body from a model server's `/generate` endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub generation_time_ms: Option<u64>,
}
