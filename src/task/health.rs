//! Health counters for the periodic task
//!
//! Written from the job loop only; the summary is read after the task has
//! left real-time mode.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Health metrics for a periodic task
pub struct TaskHealth {
    /// Number of job invocations
    pub jobs_invoked: AtomicU64,

    /// Frames fully reconstructed by the decoder
    pub frames_decoded: AtomicU64,

    /// Frames written into the converted buffer
    pub frames_converted: AtomicU64,

    /// Frames whose conversion was skipped
    pub conversion_failures: AtomicU64,

    /// Packets dropped because they belong to another stream
    pub packets_skipped: AtomicU64,

    /// Decoded frames the source discarded before the job took them
    pub frames_dropped: AtomicU64,

    /// Fatal decode or read errors
    pub decode_failures: AtomicU64,

    /// Jobs that finished after their absolute deadline
    pub deadline_misses: AtomicU64,

    /// Jobs that ran longer than the declared execution cost
    pub budget_overruns: AtomicU64,

    /// Worst observed job execution time (microseconds)
    pub max_job_us: AtomicU64,

    /// Worst observed release lateness (microseconds)
    pub max_lateness_us: AtomicU64,

    /// Sum of release lateness (microseconds), for the mean
    pub total_lateness_us: AtomicU64,

    /// Observed releases
    pub releases: AtomicU64,
}

impl TaskHealth {
    pub fn new() -> Self {
        Self {
            jobs_invoked: AtomicU64::new(0),
            frames_decoded: AtomicU64::new(0),
            frames_converted: AtomicU64::new(0),
            conversion_failures: AtomicU64::new(0),
            packets_skipped: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            deadline_misses: AtomicU64::new(0),
            budget_overruns: AtomicU64::new(0),
            max_job_us: AtomicU64::new(0),
            max_lateness_us: AtomicU64::new(0),
            total_lateness_us: AtomicU64::new(0),
            releases: AtomicU64::new(0),
        }
    }

    pub fn record_job(&self, elapsed: Duration, budget: Duration) {
        self.jobs_invoked.fetch_add(1, Ordering::Relaxed);
        self.max_job_us
            .fetch_max(elapsed.as_micros() as u64, Ordering::Relaxed);
        if elapsed > budget {
            self.budget_overruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_frame_decoded(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_converted(&self) {
        self.frames_converted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conversion_failure(&self) {
        self.conversion_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_packet_skipped(&self) {
        self.packets_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the source's running total of dropped frames
    pub fn record_frames_dropped(&self, total: u64) {
        self.frames_dropped.fetch_max(total, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deadline_miss(&self) {
        self.deadline_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_release(&self, lateness: Duration) {
        let us = lateness.as_micros() as u64;
        self.releases.fetch_add(1, Ordering::Relaxed);
        self.total_lateness_us.fetch_add(us, Ordering::Relaxed);
        self.max_lateness_us.fetch_max(us, Ordering::Relaxed);
    }

    pub fn jobs_invoked(&self) -> u64 {
        self.jobs_invoked.load(Ordering::Relaxed)
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded.load(Ordering::Relaxed)
    }

    pub fn frames_converted(&self) -> u64 {
        self.frames_converted.load(Ordering::Relaxed)
    }

    pub fn conversion_failures(&self) -> u64 {
        self.conversion_failures.load(Ordering::Relaxed)
    }

    pub fn packets_skipped(&self) -> u64 {
        self.packets_skipped.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    pub fn deadline_misses(&self) -> u64 {
        self.deadline_misses.load(Ordering::Relaxed)
    }

    pub fn budget_overruns(&self) -> u64 {
        self.budget_overruns.load(Ordering::Relaxed)
    }

    pub fn max_job_time(&self) -> Duration {
        Duration::from_micros(self.max_job_us.load(Ordering::Relaxed))
    }

    pub fn max_lateness(&self) -> Duration {
        Duration::from_micros(self.max_lateness_us.load(Ordering::Relaxed))
    }

    /// Mean release lateness over all observed releases
    pub fn mean_lateness(&self) -> Duration {
        let releases = self.releases.load(Ordering::Relaxed);
        if releases == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.total_lateness_us.load(Ordering::Relaxed) / releases)
    }

    /// Fraction of jobs that missed their deadline, as a percentage
    pub fn deadline_miss_rate(&self) -> f64 {
        let jobs = self.jobs_invoked();
        if jobs == 0 {
            return 0.0;
        }
        (self.deadline_misses() as f64 / jobs as f64) * 100.0
    }

    /// Get a summary of health metrics
    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            jobs_invoked: self.jobs_invoked(),
            frames_decoded: self.frames_decoded(),
            frames_converted: self.frames_converted(),
            conversion_failures: self.conversion_failures(),
            packets_skipped: self.packets_skipped(),
            frames_dropped: self.frames_dropped(),
            decode_failures: self.decode_failures(),
            deadline_misses: self.deadline_misses(),
            budget_overruns: self.budget_overruns(),
            deadline_miss_rate: self.deadline_miss_rate(),
            max_job_time: self.max_job_time(),
            max_lateness: self.max_lateness(),
            mean_lateness: self.mean_lateness(),
        }
    }
}

impl Default for TaskHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone)]
pub struct HealthSummary {
    pub jobs_invoked: u64,
    pub frames_decoded: u64,
    pub frames_converted: u64,
    pub conversion_failures: u64,
    pub packets_skipped: u64,
    pub frames_dropped: u64,
    pub decode_failures: u64,
    pub deadline_misses: u64,
    pub budget_overruns: u64,
    pub deadline_miss_rate: f64,
    pub max_job_time: Duration,
    pub max_lateness: Duration,
    pub mean_lateness: Duration,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} jobs ({} deadline misses, {:.2}%, {} budget overruns), {} frames decoded, {} converted, {} conversion failures, {} packets skipped, {} frames dropped, {} decode failures, max job {:?}, lateness max {:?} mean {:?}",
            self.jobs_invoked,
            self.deadline_misses,
            self.deadline_miss_rate,
            self.budget_overruns,
            self.frames_decoded,
            self.frames_converted,
            self.conversion_failures,
            self.packets_skipped,
            self.frames_dropped,
            self.decode_failures,
            self.max_job_time,
            self.max_lateness,
            self.mean_lateness
        )
    }
}
