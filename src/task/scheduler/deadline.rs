//! Linux `SCHED_DEADLINE` backend
//!
//! Registration binds the calling thread and checks that the kernel exposes
//! `sched_getattr`; entering real-time mode switches the thread to
//! `SCHED_DEADLINE` with runtime/deadline/period taken from the task
//! parameters, and leaving it restores `SCHED_OTHER`.
//!
//! Switching to `SCHED_DEADLINE` needs `CAP_SYS_NICE`. Without it the mode
//! change fails with `EPERM` and the task aborts.

use std::io;
use std::mem;

use log::{debug, warn};

use super::{SchedulerBackend, TaskId};
use crate::task::error::RegistrationError;
use crate::task::params::{BudgetPolicy, TaskTimingParameters};
use crate::task::state::TaskMode;

const SCHED_DEADLINE: u32 = 6;
const SCHED_FLAG_RECLAIM: u64 = 0x02;

/// Smallest runtime the kernel accepts (2^10 ns)
const MIN_RUNTIME_NS: u64 = 1 << 10;

/// `struct sched_attr` from `include/uapi/linux/sched/types.h`
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct SchedAttr {
    size: u32,
    sched_policy: u32,
    sched_flags: u64,
    sched_nice: i32,
    sched_priority: u32,
    sched_runtime: u64,
    sched_deadline: u64,
    sched_period: u64,
}

impl SchedAttr {
    fn new() -> Self {
        Self {
            size: mem::size_of::<SchedAttr>() as u32,
            ..Default::default()
        }
    }

    fn deadline(params: &TaskTimingParameters) -> Self {
        Self {
            sched_policy: SCHED_DEADLINE,
            sched_flags: match params.budget_policy {
                // The kernel always throttles a task at its runtime; without
                // enforcement the task may reclaim unused bandwidth instead.
                BudgetPolicy::NoEnforcement => SCHED_FLAG_RECLAIM,
                BudgetPolicy::Enforcement => 0,
            },
            sched_runtime: params.execution_cost.as_nanos() as u64,
            sched_deadline: params.relative_deadline.as_nanos() as u64,
            sched_period: params.period.as_nanos() as u64,
            ..Self::new()
        }
    }

    fn background() -> Self {
        Self {
            sched_policy: libc::SCHED_OTHER as u32,
            ..Self::new()
        }
    }
}

fn sched_setattr(tid: TaskId, attr: &SchedAttr) -> io::Result<()> {
    let ret = unsafe {
        libc::syscall(
            libc::SYS_sched_setattr,
            tid as libc::pid_t,
            attr as *const SchedAttr,
            0 as libc::c_uint,
        )
    };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn sched_getattr(tid: TaskId) -> io::Result<SchedAttr> {
    let mut attr = SchedAttr::new();
    let ret = unsafe {
        libc::syscall(
            libc::SYS_sched_getattr,
            tid as libc::pid_t,
            &mut attr as *mut SchedAttr,
            mem::size_of::<SchedAttr>() as libc::c_uint,
            0 as libc::c_uint,
        )
    };
    if ret == 0 {
        Ok(attr)
    } else {
        Err(io::Error::last_os_error())
    }
}

fn current_tid() -> TaskId {
    unsafe { libc::syscall(libc::SYS_gettid) as TaskId }
}

pub struct DeadlineScheduler {
    task: Option<TaskId>,
}

impl DeadlineScheduler {
    pub fn new() -> Self {
        Self { task: None }
    }

    fn check_task(&self, task: TaskId) -> io::Result<()> {
        if self.task == Some(task) {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("thread {task} is not registered"),
            ))
        }
    }
}

impl Default for DeadlineScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerBackend for DeadlineScheduler {
    fn name(&self) -> &'static str {
        "SCHED_DEADLINE"
    }

    fn admit(&mut self, params: &TaskTimingParameters) -> Result<TaskId, RegistrationError> {
        if self.task.is_some() {
            return Err(RegistrationError::AlreadyRegistered);
        }

        let tid = current_tid();
        let current = sched_getattr(tid)
            .map_err(|e| RegistrationError::Unavailable(format!("sched_getattr: {e}")))?;
        debug!(
            "DeadlineScheduler: thread {} currently uses policy {}",
            tid, current.sched_policy
        );

        if !params.is_consistent() {
            return Err(RegistrationError::Rejected {
                reason: format!(
                    "runtime ({:?}) <= deadline ({:?}) <= period ({:?}) does not hold",
                    params.execution_cost, params.relative_deadline, params.period
                ),
            });
        }
        if (params.execution_cost.as_nanos() as u64) < MIN_RUNTIME_NS {
            return Err(RegistrationError::Rejected {
                reason: format!("runtime {:?} is below 1024ns", params.execution_cost),
            });
        }
        if params.period.as_nanos() >= 1u128 << 63 {
            return Err(RegistrationError::Rejected {
                reason: "period does not fit in 63 bits of nanoseconds".to_string(),
            });
        }

        if let Some(cpu) = params.cpu {
            warn!(
                "DeadlineScheduler: partition hint cpu={} ignored, SCHED_DEADLINE schedules globally",
                cpu
            );
        }
        debug!(
            "DeadlineScheduler: class={} priority={} are advisory and not used by SCHED_DEADLINE",
            params.task_class, params.priority.0
        );

        self.task = Some(tid);
        Ok(tid)
    }

    fn set_mode(
        &mut self,
        task: TaskId,
        params: &TaskTimingParameters,
        mode: TaskMode,
    ) -> io::Result<()> {
        self.check_task(task)?;
        let attr = match mode {
            TaskMode::RealTime => SchedAttr::deadline(params),
            TaskMode::Background => SchedAttr::background(),
        };
        sched_setattr(task, &attr)
    }

    fn release(&mut self, task: TaskId) -> io::Result<()> {
        self.check_task(task)?;
        let attr = sched_getattr(task)?;
        if attr.sched_policy == SCHED_DEADLINE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "thread still runs under SCHED_DEADLINE",
            ));
        }
        self.task = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_sched_attr_layout() {
        // SCHED_ATTR_SIZE_VER0
        assert_eq!(mem::size_of::<SchedAttr>(), 48);
    }

    #[test]
    fn test_deadline_attr_from_params() {
        let params = TaskTimingParameters::default();
        let attr = SchedAttr::deadline(&params);
        assert_eq!(attr.sched_policy, SCHED_DEADLINE);
        assert_eq!(attr.sched_runtime, 10_000_000);
        assert_eq!(attr.sched_deadline, 100_000_000);
        assert_eq!(attr.sched_period, 100_000_000);
        assert_eq!(attr.sched_flags, SCHED_FLAG_RECLAIM);

        let enforced = params.with_budget_policy(BudgetPolicy::Enforcement);
        assert_eq!(SchedAttr::deadline(&enforced).sched_flags, 0);
    }

    #[test]
    fn test_admit_rejects_tiny_runtime() {
        let mut sched = DeadlineScheduler::new();
        let params = TaskTimingParameters::default().with_execution_cost(Duration::from_nanos(10));
        match sched.admit(&params) {
            Err(RegistrationError::Rejected { .. }) | Err(RegistrationError::Unavailable(_)) => {}
            other => panic!("unexpected admission result: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_task_mode_change() {
        let mut sched = DeadlineScheduler::new();
        let params = TaskTimingParameters::default();
        assert!(sched.set_mode(1, &params, TaskMode::RealTime).is_err());
    }
}
