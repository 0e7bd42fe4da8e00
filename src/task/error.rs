use std::time::Duration;
use thiserror::Error;

use super::clock::Release;

/// Failure to bind the task to the scheduler
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("real-time scheduler unavailable: {0}")]
    Unavailable(String),
    #[error("scheduler rejected task parameters: {reason}")]
    Rejected { reason: String },
    #[error("task is already registered")]
    AlreadyRegistered,
    #[error("task was deregistered and cannot register again")]
    Deregistered,
}

/// Failure to move between lifecycle states
#[derive(Debug, Error)]
pub enum ModeTransitionError {
    #[error("invalid task state transition {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
    #[error("task handle {0} is not registered with this controller")]
    UnknownHandle(u32),
    #[error("scheduler refused mode change: {0}")]
    Native(#[from] std::io::Error),
}

/// A job finished after its absolute deadline
///
/// Carries the release that was observed after the late job so the loop can
/// keep going.
#[derive(Debug, Clone, Copy, Error)]
#[error("job {missed} missed its deadline by {late_by:?}")]
pub struct OverrunSignal {
    /// Activation number of the job that finished late
    pub missed: u64,
    /// How far past the absolute deadline the job completed
    pub late_by: Duration,
    /// The release observed after the late job
    pub next: Release,
}

/// Failure of a period wait
#[derive(Debug, Error)]
pub enum WaitError {
    #[error(transparent)]
    Overrun(#[from] OverrunSignal),
    #[error(transparent)]
    Mode(#[from] ModeTransitionError),
}
