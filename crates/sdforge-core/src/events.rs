//! Canonical event union and the notifier port.
//!
//! Events are serialized with a `type` tag for frontend compatibility:
//!
//! ```json
//! { "type": "job_status_changed", "jobId": "…", "status": "processing" }
//! ```
//!
//! Publication is fire-and-forget: the core never waits for delivery and a
//! failed or missing subscriber must never affect job dispatch.

use serde::{Deserialize, Serialize};

use crate::job::{GenerationJob, JobStatus};
use crate::process::ProcessStatus;

/// Canonical event types emitted by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppEvent {
    /// A job changed status.
    JobStatusChanged {
        #[serde(rename = "jobId")]
        job_id: String,
        status: JobStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A managed model process changed status.
    ModelStatusChanged {
        #[serde(rename = "modelId")]
        model_id: String,
        status: ProcessStatus,
    },
}

impl AppEvent {
    /// Build the job event from a freshly-transitioned job record.
    #[must_use]
    pub fn from_job(job: &GenerationJob) -> Self {
        Self::JobStatusChanged {
            job_id: job.id.to_string(),
            status: job.status,
            progress: Some(job.progress),
            error: job.error.clone(),
        }
    }
}

/// Port for emitting status-change events to the external notifier.
///
/// Object-safe and infallible by design: adapters swallow and log their own
/// delivery errors.
pub trait JobEvents: Send + Sync {
    /// A job transitioned; called after every status change.
    fn job_status(&self, job: &GenerationJob);

    /// A model process transitioned.
    fn model_status(&self, model_id: &str, status: ProcessStatus);
}

/// No-op notifier for tests and headless contexts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopJobEvents;

impl JobEvents for NoopJobEvents {
    fn job_status(&self, _job: &GenerationJob) {}
    fn model_status(&self, _model_id: &str, _status: ProcessStatus) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_event_carries_type_tag() {
        let event = AppEvent::JobStatusChanged {
            job_id: "abc".to_string(),
            status: JobStatus::Processing,
            progress: Some(0.0),
            error: None,
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "job_status_changed");
        assert_eq!(json["jobId"], "abc");
        assert_eq!(json["status"], "processing");
    }

    #[test]
    fn model_event_carries_type_tag() {
        let event = AppEvent::ModelStatusChanged {
            model_id: "sdxl".to_string(),
            status: ProcessStatus::Running,
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "model_status_changed");
        assert_eq!(json["modelId"], "sdxl");
    }
}
