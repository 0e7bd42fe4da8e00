//! Periodic real-time task
//!
//! The lifecycle is a strict sequence: declare parameters, register with the
//! scheduler, enter real-time mode, run the release/wait/invoke loop, leave
//! real-time mode and deregister.

pub mod clock;
pub mod controller;
pub mod error;
pub mod health;
pub mod job;
pub mod params;
pub mod scheduler;
pub mod state;

pub use clock::{MonotonicClock, PeriodClock, Release};
pub use controller::{RealTimeTaskController, RunSummary, StopReason, TaskHandle};
pub use error::{ModeTransitionError, OverrunSignal, RegistrationError, WaitError};
pub use health::{HealthSummary, TaskHealth};
pub use job::{FrameCursor, JobOutcome, JobState, PeriodicJob};
pub use params::{BudgetPolicy, TaskClass, TaskPriority, TaskTimingParameters};
pub use scheduler::{AnyScheduler, BackendKind, SchedulerBackend, TaskId};
pub use state::{TaskMode, TaskState};
