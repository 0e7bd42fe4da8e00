//! Task timing parameters
//!
//! The values submitted to the scheduler when the task registers. Once a
//! handle has been issued for a set of parameters they are frozen for that
//! activation; changing them means deregistering and registering again.

use std::fmt;
use std::time::Duration;

/// What the scheduler should do when a job exceeds its execution budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BudgetPolicy {
    /// Overruns are tolerated and only reported
    #[default]
    NoEnforcement,
    /// Overruns are capped by the scheduler and surfaced as overrun signals
    Enforcement,
}

/// Scheduling-class hint. Advisory; most policies ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskClass {
    HardRealTime,
    #[default]
    SoftRealTime,
    BestEffort,
}

impl TaskClass {
    pub fn description(&self) -> &'static str {
        match self {
            TaskClass::HardRealTime => "hard",
            TaskClass::SoftRealTime => "soft",
            TaskClass::BestEffort => "best-effort",
        }
    }
}

impl std::str::FromStr for TaskClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hard" => Ok(TaskClass::HardRealTime),
            "soft" => Ok(TaskClass::SoftRealTime),
            "best-effort" | "besteffort" | "be" => Ok(TaskClass::BestEffort),
            other => Err(format!("unknown task class '{other}'")),
        }
    }
}

impl fmt::Display for TaskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Fixed priority (lower number = higher priority)
///
/// Only meaningful under fixed-priority policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TaskPriority(pub u8);

impl TaskPriority {
    pub const LOWEST: TaskPriority = TaskPriority(255);
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::LOWEST
    }
}

/// Timing parameters of a periodic task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTimingParameters {
    /// Nominal inter-release interval
    pub period: Duration,
    /// Declared worst-case execution budget per period
    pub execution_cost: Duration,
    /// Time after release by which the job must finish
    pub relative_deadline: Duration,
    pub budget_policy: BudgetPolicy,
    pub task_class: TaskClass,
    pub priority: TaskPriority,
    /// Partition hint for partitioned schedulers
    pub cpu: Option<usize>,
}

/// Default period (ms)
pub const DEFAULT_PERIOD_MS: u64 = 100;
/// Default relative deadline (ms)
pub const DEFAULT_RELATIVE_DEADLINE_MS: u64 = 100;
/// Default execution cost (ms)
pub const DEFAULT_EXEC_COST_MS: u64 = 10;

impl Default for TaskTimingParameters {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(DEFAULT_PERIOD_MS),
            execution_cost: Duration::from_millis(DEFAULT_EXEC_COST_MS),
            relative_deadline: Duration::from_millis(DEFAULT_RELATIVE_DEADLINE_MS),
            budget_policy: BudgetPolicy::NoEnforcement,
            task_class: TaskClass::SoftRealTime,
            priority: TaskPriority::LOWEST,
            cpu: None,
        }
    }
}

impl TaskTimingParameters {
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_execution_cost(mut self, cost: Duration) -> Self {
        self.execution_cost = cost;
        self
    }

    pub fn with_relative_deadline(mut self, deadline: Duration) -> Self {
        self.relative_deadline = deadline;
        self
    }

    pub fn with_budget_policy(mut self, policy: BudgetPolicy) -> Self {
        self.budget_policy = policy;
        self
    }

    pub fn with_task_class(mut self, class: TaskClass) -> Self {
        self.task_class = class;
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_cpu(mut self, cpu: Option<usize>) -> Self {
        self.cpu = cpu;
        self
    }

    /// `execution_cost <= relative_deadline <= period` and a non-zero period
    ///
    /// This is the expected relationship; violating it is a configuration
    /// error that the scheduler backend decides how to treat.
    pub fn is_consistent(&self) -> bool {
        !self.period.is_zero()
            && self.execution_cost <= self.relative_deadline
            && self.relative_deadline <= self.period
    }

    /// CPU utilization (cost / period)
    pub fn utilization(&self) -> f64 {
        if self.period.is_zero() {
            0.0
        } else {
            self.execution_cost.as_secs_f64() / self.period.as_secs_f64()
        }
    }
}

impl fmt::Display for TaskTimingParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "period={:?} cost={:?} deadline={:?} policy={:?} class={} priority={}",
            self.period,
            self.execution_cost,
            self.relative_deadline,
            self.budget_policy,
            self.task_class,
            self.priority.0
        )?;
        if let Some(cpu) = self.cpu {
            write!(f, " cpu={cpu}")?;
        }
        Ok(())
    }
}
