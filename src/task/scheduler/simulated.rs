//! In-process scheduler
//!
//! Performs the same admission checks a deadline scheduler would and tracks
//! the mode of the single admitted task, without asking the kernel for any
//! guarantee. Used on hosts without a real-time scheduler and in tests.

use std::io;

use super::{SchedulerBackend, TaskId};
use crate::task::error::RegistrationError;
use crate::task::params::TaskTimingParameters;
use crate::task::state::TaskMode;

/// Calls observed by the simulated scheduler, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerEvent {
    Admitted(TaskId),
    ModeChanged(TaskId, TaskMode),
    Released(TaskId),
}

pub struct SimulatedScheduler {
    available: bool,
    deny_mode_changes: bool,
    next_id: TaskId,
    admitted: Option<(TaskId, TaskMode)>,
    events: Vec<SchedulerEvent>,
}

impl SimulatedScheduler {
    pub fn new() -> Self {
        Self {
            available: true,
            deny_mode_changes: false,
            next_id: 1,
            admitted: None,
            events: Vec::new(),
        }
    }

    /// A scheduler whose subsystem is missing
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// A scheduler that admits tasks but refuses to switch their mode
    pub fn denying_mode_changes() -> Self {
        Self {
            deny_mode_changes: true,
            ..Self::new()
        }
    }

    pub fn events(&self) -> &[SchedulerEvent] {
        &self.events
    }

    /// Mode of the admitted task, if any
    pub fn mode(&self) -> Option<TaskMode> {
        self.admitted.map(|(_, mode)| mode)
    }

    fn check_task(&self, task: TaskId) -> io::Result<TaskMode> {
        match self.admitted {
            Some((id, mode)) if id == task => Ok(mode),
            _ => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("task {task} is not admitted"),
            )),
        }
    }
}

impl Default for SimulatedScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerBackend for SimulatedScheduler {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn admit(&mut self, params: &TaskTimingParameters) -> Result<TaskId, RegistrationError> {
        if !self.available {
            return Err(RegistrationError::Unavailable(
                "simulated scheduler disabled".to_string(),
            ));
        }
        if self.admitted.is_some() {
            return Err(RegistrationError::AlreadyRegistered);
        }
        if !params.is_consistent() {
            return Err(RegistrationError::Rejected {
                reason: format!(
                    "expected cost ({:?}) <= deadline ({:?}) <= period ({:?})",
                    params.execution_cost, params.relative_deadline, params.period
                ),
            });
        }
        if params.utilization() > 1.0 {
            return Err(RegistrationError::Rejected {
                reason: format!("utilization {:.3} exceeds 1.0", params.utilization()),
            });
        }

        let id = self.next_id;
        self.next_id += 1;
        self.admitted = Some((id, TaskMode::Background));
        self.events.push(SchedulerEvent::Admitted(id));
        Ok(id)
    }

    fn set_mode(
        &mut self,
        task: TaskId,
        _params: &TaskTimingParameters,
        mode: TaskMode,
    ) -> io::Result<()> {
        self.check_task(task)?;
        if self.deny_mode_changes {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "mode change denied",
            ));
        }
        self.admitted = Some((task, mode));
        self.events.push(SchedulerEvent::ModeChanged(task, mode));
        Ok(())
    }

    fn release(&mut self, task: TaskId) -> io::Result<()> {
        if self.check_task(task)? == TaskMode::RealTime {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "task must return to background before release",
            ));
        }
        self.admitted = None;
        self.events.push(SchedulerEvent::Released(task));
        Ok(())
    }
}
