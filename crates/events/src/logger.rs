//! Background consumer that traces every event on the bus.

use tokio::sync::broadcast;

use crate::bus::EngineEvent;

pub struct EventLogger;

impl EventLogger {
    /// Run the logging loop until the bus is dropped.
    pub async fn run(mut receiver: broadcast::Receiver<EngineEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => Self::log(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event logger lagged, some events were not logged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, event logger shutting down");
                    break;
                }
            }
        }
    }

    fn log(event: &EngineEvent) {
        match event {
            EngineEvent::JobStateChanged {
                job_id,
                project_id,
                old_state,
                new_state,
                ..
            } => {
                tracing::info!(
                    %job_id,
                    %project_id,
                    old_state = %old_state,
                    new_state = %new_state,
                    "Job state changed"
                );
            }
            EngineEvent::TaskStateChanged {
                task_id,
                job_id,
                old_state,
                new_state,
                ..
            } => {
                tracing::debug!(
                    %task_id,
                    %job_id,
                    old_state = ?old_state,
                    new_state = %new_state,
                    "Task state changed"
                );
            }
        }
    }
}
