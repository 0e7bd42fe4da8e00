//! Scheduler backends
//!
//! The controller talks to the operating system's real-time scheduler only
//! through [`SchedulerBackend`]. Every native call returns a typed result so
//! that a failed registration or mode change can abort the task instead of
//! silently continuing without timing guarantees.

#[cfg(target_os = "linux")]
mod deadline;
pub mod simulated;

#[cfg(target_os = "linux")]
pub use deadline::DeadlineScheduler;
pub use simulated::SimulatedScheduler;

use super::error::RegistrationError;
use super::params::TaskTimingParameters;
use super::state::TaskMode;

/// Scheduler-visible identity of a registered task (a thread id on Linux)
pub type TaskId = u32;

/// Native boundary used by the task controller
pub trait SchedulerBackend {
    /// Name of this backend for logging
    fn name(&self) -> &'static str;

    /// Admit the calling execution context with the given parameters
    fn admit(&mut self, params: &TaskTimingParameters) -> Result<TaskId, RegistrationError>;

    /// Switch the admitted task between background and real-time execution
    fn set_mode(
        &mut self,
        task: TaskId,
        params: &TaskTimingParameters,
        mode: TaskMode,
    ) -> std::io::Result<()>;

    /// Drop all scheduler-visible state for the task
    fn release(&mut self, task: TaskId) -> std::io::Result<()>;
}

impl<B: SchedulerBackend + ?Sized> SchedulerBackend for &mut B {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn admit(&mut self, params: &TaskTimingParameters) -> Result<TaskId, RegistrationError> {
        (**self).admit(params)
    }

    fn set_mode(
        &mut self,
        task: TaskId,
        params: &TaskTimingParameters,
        mode: TaskMode,
    ) -> std::io::Result<()> {
        (**self).set_mode(task, params, mode)
    }

    fn release(&mut self, task: TaskId) -> std::io::Result<()> {
        (**self).release(task)
    }
}

/// Which backend the application should drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Linux `SCHED_DEADLINE`
    Deadline,
    /// In-process admission control, no kernel guarantees
    Simulated,
}

impl Default for BackendKind {
    fn default() -> Self {
        if cfg!(target_os = "linux") {
            BackendKind::Deadline
        } else {
            BackendKind::Simulated
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deadline" | "sched_deadline" => Ok(BackendKind::Deadline),
            "simulated" | "sim" => Ok(BackendKind::Simulated),
            other => Err(format!("unknown scheduler backend '{other}'")),
        }
    }
}

/// Backend chosen at run time
pub enum AnyScheduler {
    #[cfg(target_os = "linux")]
    Deadline(DeadlineScheduler),
    Simulated(SimulatedScheduler),
}

impl AnyScheduler {
    pub fn new(kind: BackendKind) -> Result<Self, RegistrationError> {
        match kind {
            #[cfg(target_os = "linux")]
            BackendKind::Deadline => Ok(AnyScheduler::Deadline(DeadlineScheduler::new())),
            #[cfg(not(target_os = "linux"))]
            BackendKind::Deadline => Err(RegistrationError::Unavailable(
                "SCHED_DEADLINE is only available on Linux".to_string(),
            )),
            BackendKind::Simulated => Ok(AnyScheduler::Simulated(SimulatedScheduler::new())),
        }
    }

    fn inner(&mut self) -> &mut dyn SchedulerBackend {
        match self {
            #[cfg(target_os = "linux")]
            AnyScheduler::Deadline(backend) => backend,
            AnyScheduler::Simulated(backend) => backend,
        }
    }
}

impl SchedulerBackend for AnyScheduler {
    fn name(&self) -> &'static str {
        match self {
            #[cfg(target_os = "linux")]
            AnyScheduler::Deadline(backend) => backend.name(),
            AnyScheduler::Simulated(backend) => backend.name(),
        }
    }

    fn admit(&mut self, params: &TaskTimingParameters) -> Result<TaskId, RegistrationError> {
        self.inner().admit(params)
    }

    fn set_mode(
        &mut self,
        task: TaskId,
        params: &TaskTimingParameters,
        mode: TaskMode,
    ) -> std::io::Result<()> {
        self.inner().set_mode(task, params, mode)
    }

    fn release(&mut self, task: TaskId) -> std::io::Result<()> {
        self.inner().release(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("deadline".parse::<BackendKind>(), Ok(BackendKind::Deadline));
        assert_eq!("Simulated".parse::<BackendKind>(), Ok(BackendKind::Simulated));
        assert!("edf".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_any_scheduler_simulated() {
        let mut scheduler = AnyScheduler::new(BackendKind::Simulated).unwrap();
        assert_eq!(scheduler.name(), "simulated");
        let params = TaskTimingParameters::default();
        let id = scheduler.admit(&params).unwrap();
        scheduler.set_mode(id, &params, TaskMode::RealTime).unwrap();
        scheduler.set_mode(id, &params, TaskMode::Background).unwrap();
        scheduler.release(id).unwrap();
    }
}
