//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between the job service, which
//! publishes state changes, and the subscribers that react to them.
//! `publish` never blocks; subscribers that do I/O hand it to their own
//! background tasks.

use chrono::Utc;
use serde::Serialize;
use spool_core::status::{JobState, TaskState};
use spool_core::types::{DbId, Timestamp};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// EngineEvent
// ---------------------------------------------------------------------------

/// A state change published by the engine.
///
/// The variant set is closed: every consumer matches on it exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    JobStateChanged {
        job_id: DbId,
        project_id: DbId,
        old_state: JobState,
        new_state: JobState,
        at: Timestamp,
    },
    TaskStateChanged {
        task_id: DbId,
        job_id: DbId,
        /// `None` when the writer did not observe the prior state.
        old_state: Option<TaskState>,
        new_state: TaskState,
        at: Timestamp,
    },
}

impl EngineEvent {
    pub fn job_state_changed(
        job_id: DbId,
        project_id: DbId,
        old_state: JobState,
        new_state: JobState,
    ) -> Self {
        EngineEvent::JobStateChanged {
            job_id,
            project_id,
            old_state,
            new_state,
            at: Utc::now(),
        }
    }

    pub fn task_state_changed(
        task_id: DbId,
        job_id: DbId,
        old_state: Option<TaskState>,
        new_state: TaskState,
    ) -> Self {
        EngineEvent::TaskStateChanged {
            task_id,
            job_id,
            old_state,
            new_state,
            at: Utc::now(),
        }
    }

    /// Dot-separated event name, e.g. `"job.state_changed"`.
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::JobStateChanged { .. } => "job.state_changed",
            EngineEvent::TaskStateChanged { .. } => "task.state_changed",
        }
    }

    /// The job the event belongs to.
    pub fn job_id(&self) -> DbId {
        match self {
            EngineEvent::JobStateChanged { job_id, .. }
            | EngineEvent::TaskStateChanged { job_id, .. } => *job_id,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`EngineEvent`].
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// With no subscribers the event is dropped.
    pub fn publish(&self, event: EngineEvent) {
        // SendError only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use spool_core::types::new_id;

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let (job_id, project_id) = (new_id(), new_id());

        bus.publish(EngineEvent::job_state_changed(
            job_id,
            project_id,
            JobState::InProgress,
            JobState::Cancelled,
        ));

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.event_type(), "job.state_changed");
        assert_eq!(received.job_id(), job_id);
        match received {
            EngineEvent::JobStateChanged { new_state, .. } => {
                assert_eq!(new_state, JobState::Cancelled)
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let event = EngineEvent::task_state_changed(
            new_id(),
            new_id(),
            Some(TaskState::Running),
            TaskState::Success,
        );
        bus.publish(event.clone());

        assert_eq!(rx1.recv().await.unwrap(), event);
        assert_eq!(rx2.recv().await.unwrap(), event);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(EngineEvent::task_state_changed(
            new_id(),
            new_id(),
            None,
            TaskState::Waiting,
        ));
    }

    #[test]
    fn serializes_with_type_tag() {
        let event = EngineEvent::task_state_changed(
            new_id(),
            new_id(),
            None,
            TaskState::Skipped,
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "task_state_changed");
        assert!(json["old_state"].is_null());
    }
}
