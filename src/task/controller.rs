//! Real-time task controller
//!
//! Owns the timing parameters, the scheduler registration and the
//! background/real-time mode, and drives the release/wait/invoke loop.
//! Every lifecycle step is one explicit call; calls made out of order fail
//! with [`ModeTransitionError::InvalidTransition`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::clock::{PeriodClock, Release};
use super::error::{ModeTransitionError, OverrunSignal, RegistrationError, WaitError};
use super::health::TaskHealth;
use super::job::JobOutcome;
use super::params::{BudgetPolicy, TaskTimingParameters};
use super::scheduler::{SchedulerBackend, TaskId};
use super::state::{TaskMode, TaskState};

/// Proof of registration
///
/// Not `Clone`: deregistering consumes it.
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    params: TaskTimingParameters,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn params(&self) -> &TaskTimingParameters {
        &self.params
    }
}

/// Why the job loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The job reported `Terminate`
    Terminated,
    /// The configured job limit was reached
    JobLimit,
}

/// Result of a completed job loop
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub jobs: u64,
    pub overruns: u64,
    pub stopped_by: StopReason,
}

pub struct RealTimeTaskController<B, C> {
    backend: B,
    clock: C,
    state: TaskState,
    registered_at: Option<Instant>,
    task: Option<(TaskId, TaskTimingParameters)>,
    /// Release grid anchor, as an offset from the clock base
    anchor: Duration,
    /// Release of the job currently (or most recently) executing
    current: Option<Release>,
    health: Arc<TaskHealth>,
}

impl<B: SchedulerBackend, C: PeriodClock> RealTimeTaskController<B, C> {
    pub fn new(backend: B, clock: C, health: Arc<TaskHealth>) -> Self {
        Self {
            backend,
            clock,
            state: TaskState::Unregistered,
            registered_at: None,
            task: None,
            anchor: Duration::ZERO,
            current: None,
            health,
        }
    }

    /// Default parameters; callers override fields with the `with_*` methods
    pub fn declare_parameters() -> TaskTimingParameters {
        TaskTimingParameters::default()
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn mode(&self) -> Option<TaskMode> {
        self.state.mode()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn health(&self) -> Arc<TaskHealth> {
        self.health.clone()
    }

    /// Bind the calling execution context to the scheduler
    pub fn register_task(
        &mut self,
        params: TaskTimingParameters,
    ) -> Result<TaskHandle, RegistrationError> {
        match self.state {
            TaskState::Unregistered => {}
            TaskState::Deregistered => return Err(RegistrationError::Deregistered),
            _ => return Err(RegistrationError::AlreadyRegistered),
        }

        if !params.is_consistent() {
            warn!(
                "Controller: parameters violate cost <= deadline <= period ({})",
                params
            );
        }

        let id = self.backend.admit(&params)?;
        let now = Instant::now();
        self.state = TaskState::Background { registered_at: now };
        self.registered_at = Some(now);
        self.task = Some((id, params));

        info!(
            "Controller: task {} registered with {} ({})",
            id,
            self.backend.name(),
            params
        );
        Ok(TaskHandle { id, params })
    }

    fn check_handle(&self, handle: &TaskHandle) -> Result<TaskTimingParameters, ModeTransitionError> {
        match self.task {
            Some((id, params)) if id == handle.id => Ok(params),
            _ => Err(ModeTransitionError::UnknownHandle(handle.id)),
        }
    }

    fn check_transition(&self, target: &TaskState) -> Result<(), ModeTransitionError> {
        if self.state.can_transition_to(target) {
            Ok(())
        } else {
            Err(ModeTransitionError::InvalidTransition {
                from: self.state.description(),
                to: target.description(),
            })
        }
    }

    /// Switch from background to real-time mode
    ///
    /// Anchors the release grid at the current instant; the first
    /// [`await_next_period`](Self::await_next_period) returns one period later.
    pub fn enter_real_time(&mut self, handle: &TaskHandle) -> Result<(), ModeTransitionError> {
        let target = TaskState::RealTime {
            entered_at: Instant::now(),
        };
        self.check_transition(&target)?;
        let params = self.check_handle(handle)?;

        self.backend.set_mode(handle.id, &params, TaskMode::RealTime)?;

        self.anchor = self.clock.now();
        self.current = None;
        self.state = target;
        info!("Controller: task {} entered real-time mode", handle.id);
        Ok(())
    }

    /// Block until the next periodic release
    ///
    /// The only suspension point of the task. Each call advances the release
    /// grid by exactly one period. A previous job that finished past its
    /// absolute deadline is counted; under [`BudgetPolicy::Enforcement`] it is
    /// also reported as an [`OverrunSignal`] that still carries the new
    /// release.
    pub fn await_next_period(&mut self) -> Result<Release, WaitError> {
        let Some((_, params)) = self.task.filter(|_| self.state.is_real_time()) else {
            return Err(ModeTransitionError::InvalidTransition {
                from: self.state.description(),
                to: "Release",
            }
            .into());
        };

        let missed = self.complete_current_job(&params);

        // Each release is one period after the previous one on the grid.
        // Saturates instead of wrapping back towards the anchor.
        let (index, scheduled) = match self.current {
            Some(previous) => (
                previous.index.saturating_add(1),
                previous.scheduled.saturating_add(params.period),
            ),
            None => (1, self.anchor.saturating_add(params.period)),
        };
        self.clock.sleep_until(scheduled);
        let release = Release {
            index,
            scheduled,
            observed: self.clock.now(),
        };
        self.health.record_release(release.lateness());
        self.current = Some(release);
        debug!(
            "Controller: release {} (late by {:?})",
            index,
            release.lateness()
        );

        match missed {
            Some((missed, late_by)) if params.budget_policy == BudgetPolicy::Enforcement => {
                Err(OverrunSignal {
                    missed,
                    late_by,
                    next: release,
                }
                .into())
            }
            _ => Ok(release),
        }
    }

    /// Check the deadline of the job released last; returns its index and
    /// lateness if it missed
    fn complete_current_job(&mut self, params: &TaskTimingParameters) -> Option<(u64, Duration)> {
        let release = self.current?;
        let finished = self.clock.now();
        let deadline = release.absolute_deadline(params.relative_deadline);
        if finished <= deadline {
            return None;
        }

        let late_by = finished - deadline;
        self.health.record_deadline_miss();
        warn!(
            "Controller: job {} missed its deadline by {:?}",
            release.index, late_by
        );
        Some((release.index, late_by))
    }

    /// Switch from real-time back to background mode
    pub fn exit_real_time(&mut self, handle: &TaskHandle) -> Result<(), ModeTransitionError> {
        let registered_at = self.registered_at.unwrap_or_else(Instant::now);
        let target = TaskState::Background { registered_at };
        self.check_transition(&target)?;
        let params = self.check_handle(handle)?;

        // The last job's deadline is checked before leaving real-time mode
        self.complete_current_job(&params);
        self.current = None;

        self.backend.set_mode(handle.id, &params, TaskMode::Background)?;
        let previous = std::mem::replace(&mut self.state, target);
        if let TaskState::RealTime { entered_at } = previous {
            info!(
                "Controller: task {} returned to background mode after {:?} in real-time mode",
                handle.id,
                entered_at.elapsed()
            );
        }
        Ok(())
    }

    /// Release all scheduler-visible state
    pub fn deregister(&mut self, handle: TaskHandle) -> Result<(), ModeTransitionError> {
        self.check_transition(&TaskState::Deregistered)?;
        self.check_handle(&handle)?;

        self.backend.release(handle.id)?;
        let previous = std::mem::replace(&mut self.state, TaskState::Deregistered);
        self.task = None;
        match previous {
            TaskState::Background { registered_at } => info!(
                "Controller: task {} deregistered after {:?}",
                handle.id,
                registered_at.elapsed()
            ),
            _ => info!("Controller: task {} deregistered", handle.id),
        }
        Ok(())
    }

    /// Drive the release/wait/invoke loop until the job terminates
    ///
    /// Overrun signals are logged and the loop continues at the release they
    /// carry. `max_jobs` optionally caps the number of invocations.
    pub fn run<F>(&mut self, mut job: F, max_jobs: Option<u64>) -> Result<RunSummary, ModeTransitionError>
    where
        F: FnMut() -> JobOutcome,
    {
        let budget = self
            .task
            .map(|(_, params)| params.execution_cost)
            .unwrap_or_default();
        let mut jobs = 0u64;
        let mut overruns = 0u64;

        let stopped_by = loop {
            if max_jobs.is_some_and(|limit| jobs >= limit) {
                break StopReason::JobLimit;
            }

            match self.await_next_period() {
                Ok(_) => {}
                Err(WaitError::Overrun(signal)) => {
                    overruns += 1;
                    warn!("Controller: {}, continuing at release {}", signal, signal.next.index);
                }
                Err(WaitError::Mode(e)) => return Err(e),
            }

            let started = self.clock.now();
            let outcome = job();
            let elapsed = self.clock.now().saturating_sub(started);
            self.health.record_job(elapsed, budget);
            jobs += 1;

            if elapsed > budget {
                debug!(
                    "Controller: job {} ran {:?}, budget {:?}",
                    jobs, elapsed, budget
                );
            }

            if outcome == JobOutcome::Terminate {
                break StopReason::Terminated;
            }
        };

        info!("Controller: job loop stopped after {} jobs ({:?})", jobs, stopped_by);
        Ok(RunSummary {
            jobs,
            overruns,
            stopped_by,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::clock::ManualClock;
    use crate::task::params::TaskPriority;
    use crate::task::scheduler::SimulatedScheduler;
    use crate::task::scheduler::simulated::SchedulerEvent;

    const PERIOD: Duration = Duration::from_millis(100);

    fn controller() -> (RealTimeTaskController<SimulatedScheduler, ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let controller = RealTimeTaskController::new(
            SimulatedScheduler::new(),
            clock.clone(),
            Arc::new(TaskHealth::new()),
        );
        (controller, clock)
    }

    #[test]
    fn test_register_and_enter_real_time() {
        let (mut ctl, _) = controller();
        assert_eq!(ctl.state(), TaskState::Unregistered);

        let params = RealTimeTaskController::<SimulatedScheduler, ManualClock>::declare_parameters()
            .with_priority(TaskPriority(3));
        let handle = ctl.register_task(params).unwrap();
        assert_eq!(ctl.mode(), Some(TaskMode::Background));
        assert_eq!(handle.params().priority, TaskPriority(3));

        ctl.enter_real_time(&handle).unwrap();
        assert_eq!(ctl.mode(), Some(TaskMode::RealTime));
        assert_eq!(ctl.backend().mode(), Some(TaskMode::RealTime));
    }

    #[test]
    fn test_consistent_parameters_always_enter_real_time() {
        for (cost, deadline, period) in [(1, 1, 1), (10, 100, 100), (5, 20, 40), (40, 40, 40)] {
            let (mut ctl, _) = controller();
            let params = TaskTimingParameters::default()
                .with_execution_cost(Duration::from_millis(cost))
                .with_relative_deadline(Duration::from_millis(deadline))
                .with_period(Duration::from_millis(period));
            let handle = ctl.register_task(params).unwrap();
            ctl.enter_real_time(&handle).unwrap();
            assert_eq!(ctl.mode(), Some(TaskMode::RealTime));
        }
    }

    #[test]
    fn test_full_lifecycle() {
        let (mut ctl, _) = controller();
        let handle = ctl.register_task(TaskTimingParameters::default()).unwrap();
        let id = handle.id();
        ctl.enter_real_time(&handle).unwrap();
        ctl.await_next_period().unwrap();
        ctl.exit_real_time(&handle).unwrap();
        ctl.deregister(handle).unwrap();

        assert_eq!(ctl.state(), TaskState::Deregistered);
        assert_eq!(
            ctl.backend().events(),
            &[
                SchedulerEvent::Admitted(id),
                SchedulerEvent::ModeChanged(id, TaskMode::RealTime),
                SchedulerEvent::ModeChanged(id, TaskMode::Background),
                SchedulerEvent::Released(id),
            ]
        );
    }

    #[test]
    fn test_out_of_order_calls_fail() {
        let (mut ctl, _) = controller();

        // Waiting before registration
        assert!(matches!(
            ctl.await_next_period(),
            Err(WaitError::Mode(ModeTransitionError::InvalidTransition { .. }))
        ));

        let handle = ctl.register_task(TaskTimingParameters::default()).unwrap();

        // Waiting and leaving real-time mode while still in background
        assert!(matches!(
            ctl.await_next_period(),
            Err(WaitError::Mode(ModeTransitionError::InvalidTransition { .. }))
        ));
        assert!(matches!(
            ctl.exit_real_time(&handle),
            Err(ModeTransitionError::InvalidTransition { .. })
        ));

        ctl.enter_real_time(&handle).unwrap();
        assert!(matches!(
            ctl.enter_real_time(&handle),
            Err(ModeTransitionError::InvalidTransition { .. })
        ));

        // Re-registration without deregistering
        assert!(matches!(
            ctl.register_task(TaskTimingParameters::default()),
            Err(RegistrationError::AlreadyRegistered)
        ));

        ctl.exit_real_time(&handle).unwrap();
        ctl.deregister(handle).unwrap();

        assert!(matches!(
            ctl.register_task(TaskTimingParameters::default()),
            Err(RegistrationError::Deregistered)
        ));
    }

    #[test]
    fn test_deregister_from_real_time_fails() {
        let (mut ctl, _) = controller();
        let handle = ctl.register_task(TaskTimingParameters::default()).unwrap();
        ctl.enter_real_time(&handle).unwrap();
        assert!(matches!(
            ctl.deregister(handle),
            Err(ModeTransitionError::InvalidTransition { .. })
        ));
        assert_eq!(ctl.mode(), Some(TaskMode::RealTime));
    }

    #[test]
    fn test_registration_failure_leaves_unregistered() {
        let mut ctl = RealTimeTaskController::new(
            SimulatedScheduler::unavailable(),
            ManualClock::new(),
            Arc::new(TaskHealth::new()),
        );
        assert!(matches!(
            ctl.register_task(TaskTimingParameters::default()),
            Err(RegistrationError::Unavailable(_))
        ));
        assert_eq!(ctl.state(), TaskState::Unregistered);
    }

    #[test]
    fn test_denied_mode_change_keeps_background() {
        let mut ctl = RealTimeTaskController::new(
            SimulatedScheduler::denying_mode_changes(),
            ManualClock::new(),
            Arc::new(TaskHealth::new()),
        );
        let handle = ctl.register_task(TaskTimingParameters::default()).unwrap();
        assert!(matches!(
            ctl.enter_real_time(&handle),
            Err(ModeTransitionError::Native(_))
        ));
        assert_eq!(ctl.mode(), Some(TaskMode::Background));
    }

    #[test]
    fn test_periodic_releases_are_spaced_by_period() {
        let (mut ctl, clock) = controller();
        clock.advance(Duration::from_millis(7));
        let handle = ctl.register_task(TaskTimingParameters::default()).unwrap();
        ctl.enter_real_time(&handle).unwrap();

        let releases: Vec<Release> = (0..5).map(|_| ctl.await_next_period().unwrap()).collect();

        for (k, release) in releases.iter().enumerate() {
            assert_eq!(release.index, k as u64 + 1);
            assert_eq!(
                release.scheduled,
                Duration::from_millis(7) + PERIOD * (k as u32 + 1)
            );
            assert_eq!(release.lateness(), Duration::ZERO);
        }
        for pair in releases.windows(2) {
            assert_eq!(pair[1].observed - pair[0].observed, PERIOD);
        }
        assert_eq!(clock.sleeps(), 5);
    }

    #[test]
    fn test_release_grid_past_u32_index() {
        let (mut ctl, clock) = controller();
        let period = Duration::from_millis(1);
        let params = TaskTimingParameters::default()
            .with_period(period)
            .with_relative_deadline(period)
            .with_execution_cost(Duration::from_micros(100));
        let handle = ctl.register_task(params).unwrap();
        ctl.enter_real_time(&handle).unwrap();

        let last = period * u32::MAX;
        clock.advance(last);
        ctl.current = Some(Release {
            index: u32::MAX as u64,
            scheduled: last,
            observed: last,
        });

        let release = ctl.await_next_period().unwrap();
        assert_eq!(release.index, u32::MAX as u64 + 1);
        assert_eq!(release.scheduled, last + period);
        assert_eq!(release.lateness(), Duration::ZERO);
        assert_eq!(clock.now(), last + period);
        assert_eq!(clock.sleeps(), 1);
        assert_eq!(ctl.health().deadline_misses(), 0);

        let following = ctl.await_next_period().unwrap();
        assert_eq!(following.scheduled - release.scheduled, period);
    }

    #[test]
    fn test_overrun_without_enforcement_is_counted() {
        let (mut ctl, clock) = controller();
        let handle = ctl.register_task(TaskTimingParameters::default()).unwrap();
        ctl.enter_real_time(&handle).unwrap();

        ctl.await_next_period().unwrap();
        clock.advance(Duration::from_millis(130)); // past the 100ms deadline
        let release = ctl.await_next_period().unwrap();

        assert_eq!(ctl.health().deadline_misses(), 1);
        // The overrun delays observation; the grid is unchanged
        assert_eq!(release.index, 2);
        assert_eq!(release.scheduled, PERIOD * 2);
        assert_eq!(release.lateness(), Duration::from_millis(30));
    }

    #[test]
    fn test_overrun_with_enforcement_is_signalled() {
        let (mut ctl, clock) = controller();
        let params = TaskTimingParameters::default().with_budget_policy(BudgetPolicy::Enforcement);
        let handle = ctl.register_task(params).unwrap();
        ctl.enter_real_time(&handle).unwrap();

        ctl.await_next_period().unwrap();
        clock.advance(Duration::from_millis(150));
        let signal = match ctl.await_next_period() {
            Err(WaitError::Overrun(signal)) => signal,
            other => panic!("expected overrun, got {other:?}"),
        };
        assert_eq!(signal.missed, 1);
        assert_eq!(signal.late_by, Duration::from_millis(50));
        assert_eq!(signal.next.index, 2);

        // The following period is on time again
        assert!(ctl.await_next_period().is_ok());
        assert_eq!(ctl.health().deadline_misses(), 1);
    }

    #[test]
    fn test_run_until_terminate() {
        let (mut ctl, clock) = controller();
        let handle = ctl.register_task(TaskTimingParameters::default()).unwrap();
        ctl.enter_real_time(&handle).unwrap();

        let mut remaining = 3;
        let work = clock.clone();
        let summary = ctl
            .run(
                || {
                    work.advance(Duration::from_millis(5));
                    remaining -= 1;
                    if remaining == 0 {
                        JobOutcome::Terminate
                    } else {
                        JobOutcome::Continue
                    }
                },
                None,
            )
            .unwrap();

        assert_eq!(summary.jobs, 3);
        assert_eq!(summary.stopped_by, StopReason::Terminated);
        assert_eq!(summary.overruns, 0);
        assert_eq!(ctl.health().jobs_invoked(), 3);
        assert_eq!(ctl.health().max_job_time(), Duration::from_millis(5));
        assert_eq!(clock.now(), PERIOD * 3 + Duration::from_millis(5));
    }

    #[test]
    fn test_run_continues_after_overrun() {
        let (mut ctl, clock) = controller();
        let params = TaskTimingParameters::default().with_budget_policy(BudgetPolicy::Enforcement);
        let handle = ctl.register_task(params).unwrap();
        ctl.enter_real_time(&handle).unwrap();

        let mut invocation = 0;
        let work = clock.clone();
        let summary = ctl
            .run(
                || {
                    invocation += 1;
                    if invocation == 2 {
                        work.advance(Duration::from_millis(120));
                    }
                    if invocation == 4 {
                        JobOutcome::Terminate
                    } else {
                        JobOutcome::Continue
                    }
                },
                None,
            )
            .unwrap();

        assert_eq!(summary.jobs, 4);
        assert_eq!(summary.overruns, 1);
        assert_eq!(ctl.health().budget_overruns(), 1);
        assert_eq!(ctl.health().deadline_misses(), 1);
    }

    #[test]
    fn test_run_job_limit() {
        let (mut ctl, _) = controller();
        let handle = ctl.register_task(TaskTimingParameters::default()).unwrap();
        ctl.enter_real_time(&handle).unwrap();

        let summary = ctl.run(|| JobOutcome::Continue, Some(4)).unwrap();
        assert_eq!(summary.jobs, 4);
        assert_eq!(summary.stopped_by, StopReason::JobLimit);
    }

    #[test]
    fn test_run_requires_real_time() {
        let (mut ctl, _) = controller();
        ctl.register_task(TaskTimingParameters::default()).unwrap();
        let mut called = false;
        let result = ctl.run(
            || {
                called = true;
                JobOutcome::Terminate
            },
            None,
        );
        assert!(result.is_err());
        assert!(!called);
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let (mut ctl, _) = controller();
        let (mut other, _) = controller();
        let _mine = ctl.register_task(TaskTimingParameters::default()).unwrap();
        let mut foreign = other.register_task(TaskTimingParameters::default()).unwrap();
        foreign.id += 100;
        assert!(matches!(
            ctl.enter_real_time(&foreign),
            Err(ModeTransitionError::UnknownHandle(_))
        ));
    }
}
