//! Stop-state decision for tasks reported as stopped by a worker.

use crate::protocol::TaskStoppedEvent;
use crate::status::TaskState;

/// Exit status a worker uses for failures worth retrying automatically.
pub const DEFAULT_HARD_FAILURE_EXIT_CODE: i32 = 9;

/// Automatic retries granted per task.
pub const DEFAULT_AUTO_RETRY_LIMIT: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub hard_failure_exit_code: i32,
    pub auto_retry_limit: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            hard_failure_exit_code: DEFAULT_HARD_FAILURE_EXIT_CODE,
            auto_retry_limit: DEFAULT_AUTO_RETRY_LIMIT,
        }
    }
}

impl RetryPolicy {
    /// Whether a failed run may go back to `Waiting` on its own.
    ///
    /// `run_count` includes the run that just failed, so the task gets
    /// `auto_retry_limit` retries and fails for good on the run after that.
    pub fn is_auto_retryable(&self, event: &TaskStoppedEvent, run_count: i32) -> bool {
        !event.manual_kill
            && event.exit_status == self.hard_failure_exit_code
            && run_count <= self.auto_retry_limit
    }

    /// The state a stopped task moves to.
    pub fn stop_state(&self, event: &TaskStoppedEvent, run_count: i32) -> TaskState {
        if let Some(state) = event.new_state {
            return state;
        }
        if event.exit_status == 0 {
            return TaskState::Success;
        }
        if self.is_auto_retryable(event, run_count) {
            TaskState::Waiting
        } else {
            TaskState::Failure
        }
    }

    /// Whether a stop that lands in `new_state` is a whole-task failure
    /// worth recording.
    pub fn is_hard_failure(event: &TaskStoppedEvent, new_state: TaskState) -> bool {
        new_state == TaskState::Failure && !event.manual_kill
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            hard_failure_exit_code: 9,
            auto_retry_limit: 2,
        }
    }

    #[test]
    fn zero_exit_is_success() {
        assert_eq!(policy().stop_state(&TaskStoppedEvent::exited(0), 1), TaskState::Success);
    }

    #[test]
    fn hard_failure_retries_until_limit() {
        let event = TaskStoppedEvent::exited(9);
        assert_eq!(policy().stop_state(&event, 1), TaskState::Waiting);
        assert_eq!(policy().stop_state(&event, 2), TaskState::Waiting);
        assert_eq!(policy().stop_state(&event, 3), TaskState::Failure);
    }

    #[test]
    fn other_exit_codes_fail_immediately() {
        assert_eq!(policy().stop_state(&TaskStoppedEvent::exited(1), 1), TaskState::Failure);
    }

    #[test]
    fn manual_kill_is_never_auto_retried() {
        let event = TaskStoppedEvent {
            exit_status: 9,
            manual_kill: true,
            ..Default::default()
        };
        assert_eq!(policy().stop_state(&event, 1), TaskState::Failure);
        assert!(!RetryPolicy::is_hard_failure(&event, TaskState::Failure));
    }

    #[test]
    fn explicit_state_wins() {
        let event = TaskStoppedEvent {
            exit_status: 9,
            new_state: Some(TaskState::Skipped),
            ..Default::default()
        };
        assert_eq!(policy().stop_state(&event, 1), TaskState::Skipped);
    }

    #[test]
    fn only_failure_counts_as_hard_failure() {
        let event = TaskStoppedEvent::exited(9);
        assert!(RetryPolicy::is_hard_failure(&event, TaskState::Failure));
        assert!(!RetryPolicy::is_hard_failure(&event, TaskState::Waiting));
    }
}
