//! Model configuration types.
//!
//! A [`ModelConfig`] describes how to launch (or reach) one image-generation
//! model. Configs are supplied by an external catalog and are read-only from
//! the core's perspective.

use serde::{Deserialize, Serialize};

use crate::process::ExecMode;

/// Default values applied to generation requests for a model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationDefaults {
    pub steps: Option<u32>,
    pub guidance: Option<f32>,
    pub sampler: Option<String>,
}

/// Launch/routing configuration for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    /// Stable identifier referenced by jobs.
    pub id: String,
    /// Human-readable name for logs and events.
    pub name: String,
    /// How the model is executed.
    pub exec_mode: ExecMode,
    /// Binary to spawn (`server` and `cli` modes).
    #[serde(default)]
    pub command: String,
    /// Arguments passed to the binary. The literal `{port}` is replaced
    /// with the injected listen port for `server` mode.
    #[serde(default)]
    pub args: Vec<String>,
    /// Pinned listen port; allocated from the base-port range when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Remote endpoint for `api` mode (e.g. `http://10.0.0.5:7860`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub generation_defaults: GenerationDefaults,
}

impl ModelConfig {
    /// True when this model occupies the exclusive local server slot.
    #[must_use]
    pub const fn is_server(&self) -> bool {
        matches!(self.exec_mode, ExecMode::Server)
    }
}
