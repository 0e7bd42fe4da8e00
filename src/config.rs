use std::path::PathBuf;
use std::time::Duration;

use clap::ArgMatches;

use crate::media::TargetFormat;
use crate::task::job::DEFAULT_FRAME_QUOTA;
use crate::task::{BackendKind, BudgetPolicy, TaskClass, TaskPriority, TaskTimingParameters};

/// Everything the application needs to set up and run the task
#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub path: Option<PathBuf>,
    pub params: TaskTimingParameters,
    /// Frames decoded per period
    pub quota: u32,
    pub format: TargetFormat,
    pub scheduler: BackendKind,
    pub max_jobs: Option<u64>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        TaskConfig {
            path: None,
            params: TaskTimingParameters::default(),
            quota: DEFAULT_FRAME_QUOTA,
            format: TargetFormat::default(),
            scheduler: BackendKind::default(),
            max_jobs: None,
        }
    }
}

impl TaskConfig {
    /// Defaults overridden by whatever the command line supplies
    pub fn from_matches(matches: &ArgMatches) -> Self {
        let defaults = TaskConfig::default();
        let millis = |id: &str| matches.get_one::<u64>(id).copied().map(Duration::from_millis);

        let mut params = defaults.params;
        if let Some(period) = millis("period-ms") {
            params = params.with_period(period);
        }
        if let Some(deadline) = millis("deadline-ms") {
            params = params.with_relative_deadline(deadline);
        }
        if let Some(cost) = millis("cost-ms") {
            params = params.with_execution_cost(cost);
        }
        if matches.get_flag("enforce") {
            params = params.with_budget_policy(BudgetPolicy::Enforcement);
        }
        if let Some(class) = matches.get_one::<TaskClass>("class") {
            params = params.with_task_class(*class);
        }
        if let Some(priority) = matches.get_one::<u8>("priority") {
            params = params.with_priority(TaskPriority(*priority));
        }
        params = params.with_cpu(matches.get_one::<usize>("cpu").copied());

        TaskConfig {
            path: matches.get_one::<PathBuf>("path").cloned(),
            params,
            quota: matches.get_one::<u32>("quota").copied().unwrap_or(defaults.quota),
            format: matches
                .get_one::<TargetFormat>("format")
                .copied()
                .unwrap_or(defaults.format),
            scheduler: matches
                .get_one::<BackendKind>("scheduler")
                .copied()
                .unwrap_or(defaults.scheduler),
            max_jobs: matches.get_one::<u64>("max-jobs").copied(),
        }
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}
