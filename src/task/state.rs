//! Task lifecycle state management

use std::time::Instant;

/// Execution mode of a registered task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskMode {
    /// Not subject to scheduling deadlines
    Background,
    /// Subject to the scheduler's timing guarantees
    RealTime,
}

impl std::fmt::Display for TaskMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskMode::Background => write!(f, "Background"),
            TaskMode::RealTime => write!(f, "RealTime"),
        }
    }
}

/// Controller state machine
///
/// `Unregistered -> Registered(Background) -> Registered(RealTime) ->
/// Registered(Background) -> Deregistered`. Every arrow is one explicit call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// No scheduler-visible state exists yet
    Unregistered,

    /// Admitted by the scheduler, running in background mode
    Background {
        /// When the task was admitted
        registered_at: Instant,
    },

    /// Executing as a real-time task
    RealTime {
        /// When real-time mode was entered (release grid anchor)
        entered_at: Instant,
    },

    /// Scheduler state released; terminal
    Deregistered,
}

impl TaskState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &TaskState) -> bool {
        use TaskState::*;

        match (self, target) {
            (Unregistered, Background { .. }) => true,
            (Background { .. }, RealTime { .. }) => true,
            (RealTime { .. }, Background { .. }) => true,
            (Background { .. }, Deregistered) => true,

            // Deregistered is terminal and nothing is implicit
            _ => false,
        }
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            TaskState::Unregistered => "Unregistered",
            TaskState::Background { .. } => "Registered(Background)",
            TaskState::RealTime { .. } => "Registered(RealTime)",
            TaskState::Deregistered => "Deregistered",
        }
    }

    /// Current mode, if registered
    pub fn mode(&self) -> Option<TaskMode> {
        match self {
            TaskState::Background { .. } => Some(TaskMode::Background),
            TaskState::RealTime { .. } => Some(TaskMode::RealTime),
            TaskState::Unregistered | TaskState::Deregistered => None,
        }
    }

    pub fn is_real_time(&self) -> bool {
        matches!(self, TaskState::RealTime { .. })
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
