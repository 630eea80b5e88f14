//! Broadcast-based event notifier.
//!
//! Fans status changes out to any number of subscribers (API layer, logs,
//! tests). Lagging or absent subscribers never block dispatch; `send` errors
//! just mean nobody is listening right now.

use tokio::sync::broadcast;
use tracing::debug;

use sdforge_core::{AppEvent, GenerationJob, JobEvents, ProcessStatus};

const CHANNEL_CAPACITY: usize = 256;

/// [`JobEvents`] adapter over a tokio broadcast channel.
pub struct BroadcastJobEvents {
    sender: broadcast::Sender<AppEvent>,
}

impl BroadcastJobEvents {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Open a new subscription; only events sent after this call are seen.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    fn publish(&self, event: AppEvent) {
        if self.sender.send(event).is_err() {
            debug!("No event subscribers connected");
        }
    }
}

impl Default for BroadcastJobEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl JobEvents for BroadcastJobEvents {
    fn job_status(&self, job: &GenerationJob) {
        self.publish(AppEvent::from_job(job));
    }

    fn model_status(&self, model_id: &str, status: ProcessStatus) {
        self.publish(AppEvent::ModelStatusChanged {
            model_id: model_id.to_string(),
            status,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_model_events() {
        let events = BroadcastJobEvents::new();
        let mut rx = events.subscribe();

        events.model_status("sdxl", ProcessStatus::Running);

        let event = rx.recv().await.expect("event");
        assert_eq!(
            event,
            AppEvent::ModelStatusChanged {
                model_id: "sdxl".to_string(),
                status: ProcessStatus::Running,
            }
        );
    }

    #[test]
    fn publish_without_subscribers_is_harmless() {
        let events = BroadcastJobEvents::new();
        events.model_status("sdxl", ProcessStatus::Stopped);
    }
}
