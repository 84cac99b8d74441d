//! State enums mapping to SMALLINT columns.
//!
//! Each variant's discriminant is the value stored in the database. Values
//! are stable; new variants are appended, never renumbered.

use crate::error::CoreError;

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Every variant, in id order.
            pub const ALL: &'static [$name] = &[$( $name::$variant ),+];

            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            pub fn name(self) -> &'static str {
                match self {
                    $( $name::$variant => stringify!($variant) ),+
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl TryFrom<StatusId> for $name {
            type Error = CoreError;

            fn try_from(value: StatusId) -> Result<Self, Self::Error> {
                $( if value == $val { return Ok($name::$variant); } )+
                Err(CoreError::Validation(format!(
                    concat!("unknown ", stringify!($name), " id {}"),
                    value
                )))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

define_status_enum! {
    /// Job lifecycle state.
    JobState {
        InProgress = 1,
        Cancelled = 2,
        Success = 3,
        Failure = 4,
    }
}

define_status_enum! {
    /// Task lifecycle state.
    ///
    /// `Depend -> Waiting -> Queued -> Running -> {Success | Failure | Waiting | Skipped}`
    TaskState {
        Waiting = 1,
        Running = 2,
        Success = 3,
        Failure = 4,
        Skipped = 5,
        Queued = 6,
        Depend = 7,
    }
}

define_status_enum! {
    /// Kind of dependency edge.
    DependType {
        JobOnJob = 1,
        TaskOnTask = 2,
    }
}

define_status_enum! {
    /// An Active depend blocks its depend-er; Inactive is resolved.
    DependState {
        Active = 1,
        Inactive = 2,
    }
}

define_status_enum! {
    /// Locked workers receive no new tasks.
    LockState {
        Unlocked = 1,
        Locked = 2,
    }
}

define_status_enum! {
    /// Worker liveness as judged by heartbeats.
    WorkerState {
        Up = 1,
        Down = 2,
    }
}

impl JobState {
    /// Jobs in any state but `InProgress` are finished.
    pub fn is_finished(self) -> bool {
        !matches!(self, JobState::InProgress)
    }
}

impl TaskState {
    /// States that are not terminal. A job with tasks in any of these is not finished.
    pub const PENDING: &'static [TaskState] = &[
        TaskState::Depend,
        TaskState::Waiting,
        TaskState::Queued,
        TaskState::Running,
    ];

    /// States in which the task is bound to a worker.
    pub const DISPATCHED: &'static [TaskState] = &[TaskState::Queued, TaskState::Running];

    pub fn is_dispatched(self) -> bool {
        Self::DISPATCHED.contains(&self)
    }

    pub fn is_finished(self) -> bool {
        matches!(
            self,
            TaskState::Success | TaskState::Failure | TaskState::Skipped
        )
    }

    /// Success states release whatever depends on the task.
    pub fn is_success(self) -> bool {
        matches!(self, TaskState::Success | TaskState::Skipped)
    }

    /// The states a task may move into `self` from through a state
    /// transition call.
    ///
    /// `Depend -> Waiting` is absent: it happens only through dependency
    /// resolution. Nothing transitions into `Depend`.
    pub fn allowed_sources(self) -> &'static [TaskState] {
        match self {
            TaskState::Waiting => &[
                TaskState::Queued,
                TaskState::Running,
                TaskState::Success,
                TaskState::Failure,
                TaskState::Skipped,
            ],
            TaskState::Queued => &[TaskState::Waiting],
            TaskState::Running => &[TaskState::Queued],
            TaskState::Success => &[TaskState::Queued, TaskState::Running],
            TaskState::Failure => &[TaskState::Queued, TaskState::Running],
            TaskState::Skipped => &[
                TaskState::Depend,
                TaskState::Waiting,
                TaskState::Queued,
                TaskState::Running,
                TaskState::Failure,
            ],
            TaskState::Depend => &[],
        }
    }

    pub fn can_transition(from: TaskState, to: TaskState) -> bool {
        to.allowed_sources().contains(&from)
    }

    /// Resolve the set of states a conditional update may match.
    ///
    /// With an expected old state the set is that single state, or empty when
    /// the transition is not allowed at all. Without one it is every allowed
    /// source.
    pub fn transition_sources(self, expected_old: Option<TaskState>) -> Vec<TaskState> {
        match expected_old {
            Some(old) if TaskState::can_transition(old, self) => vec![old],
            Some(_) => Vec::new(),
            None => self.allowed_sources().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn ids_round_trip_through_try_from() {
        for state in TaskState::ALL {
            assert_eq!(TaskState::try_from(state.id()).unwrap(), *state);
        }
        for state in JobState::ALL {
            assert_eq!(JobState::try_from(state.id()).unwrap(), *state);
        }
    }

    #[test]
    fn unknown_id_is_validation_error() {
        assert_matches!(TaskState::try_from(42), Err(CoreError::Validation(_)));
    }

    #[test]
    fn display_uses_variant_name() {
        assert_eq!(TaskState::Queued.to_string(), "Queued");
        assert_eq!(JobState::InProgress.to_string(), "InProgress");
    }

    #[test]
    fn pending_and_finished_partition_task_states() {
        for state in TaskState::ALL {
            assert_ne!(TaskState::PENDING.contains(state), state.is_finished());
        }
    }

    #[test]
    fn dispatch_path_transitions_are_allowed() {
        assert!(TaskState::can_transition(TaskState::Waiting, TaskState::Queued));
        assert!(TaskState::can_transition(TaskState::Queued, TaskState::Running));
        assert!(TaskState::can_transition(TaskState::Running, TaskState::Success));
        assert!(TaskState::can_transition(TaskState::Queued, TaskState::Failure));
        assert!(TaskState::can_transition(TaskState::Running, TaskState::Waiting));
    }

    #[test]
    fn depend_only_leaves_through_resolution_or_skip() {
        assert!(!TaskState::can_transition(TaskState::Depend, TaskState::Waiting));
        assert!(!TaskState::can_transition(TaskState::Depend, TaskState::Queued));
        assert!(TaskState::can_transition(TaskState::Depend, TaskState::Skipped));
        for state in TaskState::ALL {
            assert!(!TaskState::can_transition(*state, TaskState::Depend));
        }
    }

    #[test]
    fn waiting_cannot_skip_straight_to_running() {
        assert!(!TaskState::can_transition(TaskState::Waiting, TaskState::Running));
        assert!(!TaskState::can_transition(TaskState::Success, TaskState::Running));
    }

    #[test]
    fn transition_sources_respects_expected_old() {
        assert_eq!(
            TaskState::Queued.transition_sources(Some(TaskState::Waiting)),
            vec![TaskState::Waiting]
        );
        assert!(TaskState::Queued
            .transition_sources(Some(TaskState::Running))
            .is_empty());
        assert_eq!(
            TaskState::Running.transition_sources(None),
            vec![TaskState::Queued]
        );
    }
}
