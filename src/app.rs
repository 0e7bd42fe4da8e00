//! Application runner
//!
//! Parses the command line, performs every allocation and native setup call
//! before the task goes real-time, drives the job loop and tears everything
//! down in reverse order.

use std::ffi::OsString;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::{Arg, ArgAction, Command, value_parser};
use log::{error, info, warn};
use thiserror::Error;

use crate::config::{TaskConfig, app_name, version};
use crate::media::{FrameStage, MediaSource, SourceError, TargetFormat};
use crate::task::{
    BackendKind, FrameCursor, JobState, MonotonicClock, PeriodClock, PeriodicJob,
    RealTimeTaskController, RunSummary, SchedulerBackend, TaskClass, TaskHandle, TaskHealth,
};

pub const EXIT_OK: i32 = 0;
pub const EXIT_SETUP: i32 = 1;
pub const EXIT_SCHEDULER: i32 = 2;

#[derive(Debug, Error)]
pub enum AppError {
    /// Anything that fails before the task registers
    #[error("{0:#}")]
    Setup(anyhow::Error),
    /// Registration or a mode transition failed; the task cannot keep its
    /// timing guarantees
    #[error("{0:#}")]
    Scheduler(anyhow::Error),
}

impl AppError {
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Setup(_) => EXIT_SETUP,
            AppError::Scheduler(_) => EXIT_SCHEDULER,
        }
    }
}

/// What a completed run produced
#[derive(Debug, Clone, Copy)]
pub struct RunReport {
    pub run: RunSummary,
    pub frames: FrameCursor,
}

pub fn cli() -> Command {
    Command::new(app_name())
        .version(version())
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("path")
                .value_name("PATH")
                .help("Video file decoded by the periodic task")
                .value_parser(value_parser!(std::path::PathBuf)),
        )
        .arg(
            Arg::new("period-ms")
                .long("period-ms")
                .value_name("MS")
                .help("Release period in milliseconds [default: 100]")
                .value_parser(value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("deadline-ms")
                .long("deadline-ms")
                .value_name("MS")
                .help("Relative deadline in milliseconds [default: 100]")
                .value_parser(value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("cost-ms")
                .long("cost-ms")
                .value_name("MS")
                .help("Execution cost budget in milliseconds [default: 10]")
                .value_parser(value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("quota")
                .long("quota")
                .value_name("FRAMES")
                .help("Frames decoded per period [default: 10]")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("enforce")
                .long("enforce")
                .help("Enforce the execution budget")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("class")
                .long("class")
                .value_name("CLASS")
                .help("Task class: hard, soft or best-effort [default: soft]")
                .value_parser(|s: &str| s.parse::<TaskClass>()),
        )
        .arg(
            Arg::new("priority")
                .long("priority")
                .value_name("N")
                .help("Fixed priority, 1 is highest [default: 255]")
                .value_parser(value_parser!(u8).range(1..)),
        )
        .arg(
            Arg::new("cpu")
                .long("cpu")
                .value_name("N")
                .help("Partition (CPU) hint")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("format")
                .long("format")
                .value_name("FORMAT")
                .help("Converted pixel format: rgb24, bgr24 or rgba [default: rgb24]")
                .value_parser(|s: &str| s.parse::<TargetFormat>()),
        )
        .arg(
            Arg::new("scheduler")
                .long("scheduler")
                .value_name("BACKEND")
                .help("Scheduler backend: deadline or simulated")
                .value_parser(|s: &str| s.parse::<BackendKind>()),
        )
        .arg(
            Arg::new("max-jobs")
                .long("max-jobs")
                .value_name("N")
                .help("Stop after N job invocations")
                .value_parser(value_parser!(u64)),
        )
}

/// Parse `args`, run the task and return the process exit status
pub fn run<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    run_with_output(args, &mut io::stderr())
}

/// Same as [`run`], with usage and error text written to `err`
///
/// Help and version output requested on the command line still goes to
/// stdout.
pub fn run_with_output<I, T, W>(args: I, err: &mut W) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
    W: Write,
{
    let matches = match cli().try_get_matches_from(args) {
        Ok(matches) => matches,
        Err(e) if e.use_stderr() => {
            let _ = write!(err, "{}", e.render());
            return EXIT_SETUP;
        }
        Err(e) => {
            let _ = e.print();
            return EXIT_OK;
        }
    };
    let config = TaskConfig::from_matches(&matches);

    if config.path.is_none() {
        let _ = writeln!(err, "{}", cli().render_usage());
        return EXIT_OK;
    }

    let backend = match crate::task::AnyScheduler::new(config.scheduler) {
        Ok(backend) => backend,
        Err(e) => {
            error!("Scheduler backend unavailable: {}", e);
            let _ = writeln!(err, "{}: {}", app_name(), e);
            return EXIT_SCHEDULER;
        }
    };

    match execute(&config, open_source, backend, MonotonicClock::new()) {
        Ok(report) => {
            info!(
                "{} finished: {} jobs, {} frames ({:?})",
                app_name(),
                report.run.jobs,
                report.frames,
                report.run.stopped_by
            );
            EXIT_OK
        }
        Err(e) => {
            error!("{}", e);
            let _ = writeln!(err, "{}: {}", app_name(), e);
            e.exit_code()
        }
    }
}

#[cfg(feature = "ffmpeg")]
fn open_source(path: &Path) -> Result<crate::media::FfmpegSource, SourceError> {
    crate::media::FfmpegSource::open(path)
}

#[cfg(not(feature = "ffmpeg"))]
fn open_source(path: &Path) -> Result<NoDecoder, SourceError> {
    Err(SourceError::Open {
        path: path.to_path_buf(),
        reason: "built without the ffmpeg feature".to_string(),
    })
}

/// Placeholder source type when no decoder backend is compiled in
#[cfg(not(feature = "ffmpeg"))]
pub enum NoDecoder {}

#[cfg(not(feature = "ffmpeg"))]
impl crate::media::MediaSource for NoDecoder {
    type Packet = NoDecoderPacket;
    type Frame = NoDecoderPacket;

    fn find_streams(&mut self) -> Result<(), SourceError> {
        match *self {}
    }

    fn select_video_stream(&mut self) -> Result<crate::media::StreamIndex, SourceError> {
        match *self {}
    }

    fn open_decoder(
        &mut self,
        _stream: crate::media::StreamIndex,
    ) -> Result<crate::media::StreamGeometry, SourceError> {
        match *self {}
    }

    fn read_packet(&mut self) -> Result<Option<NoDecoderPacket>, SourceError> {
        match *self {}
    }

    fn decode(
        &mut self,
        packet: NoDecoderPacket,
    ) -> Result<Option<NoDecoderPacket>, crate::media::DecodeError> {
        match packet {}
    }
}

#[cfg(not(feature = "ffmpeg"))]
pub enum NoDecoderPacket {}

#[cfg(not(feature = "ffmpeg"))]
impl crate::media::StreamPacket for NoDecoderPacket {
    fn stream_index(&self) -> crate::media::StreamIndex {
        match *self {}
    }
}

#[cfg(not(feature = "ffmpeg"))]
impl crate::media::DecodedFrame for NoDecoderPacket {
    fn with_view<R>(&self, _f: impl FnOnce(&crate::media::FrameView<'_>) -> R) -> R {
        match *self {}
    }
}

/// Set up, run and tear down the task
///
/// Every setup step completes before registration; a setup failure never
/// reaches the scheduler.
pub fn execute<S, O, B, C>(
    config: &TaskConfig,
    open: O,
    backend: B,
    clock: C,
) -> Result<RunReport, AppError>
where
    S: MediaSource,
    O: FnOnce(&Path) -> Result<S, SourceError>,
    B: SchedulerBackend,
    C: PeriodClock,
{
    let setup = AppError::Setup;
    let path = config
        .path
        .as_deref()
        .ok_or_else(|| setup(anyhow!("no input file given")))?;

    let mut source = open(path).map_err(|e| setup(e.into()))?;
    source
        .find_streams()
        .context("couldn't find stream information")
        .map_err(setup)?;
    let stream = source
        .select_video_stream()
        .context("didn't find a video stream")
        .map_err(setup)?;
    let geometry = source
        .open_decoder(stream)
        .context("couldn't open the video decoder")
        .map_err(setup)?;
    let frames = FrameStage::setup(geometry.width, geometry.height, config.format)
        .context("couldn't allocate frame buffers")
        .map_err(setup)?;
    info!(
        "Video stream {}: {}x{} {} -> {}",
        stream, geometry.width, geometry.height, geometry.layout, config.format
    );

    let health = Arc::new(TaskHealth::new());
    let mut state = JobState::new(source, stream, frames, health.clone());
    let job = PeriodicJob::new(config.quota);

    let mut controller = RealTimeTaskController::new(backend, clock, health.clone());
    let handle = controller
        .register_task(config.params)
        .context("task registration failed")
        .map_err(AppError::Scheduler)?;

    if let Err(e) = controller.enter_real_time(&handle) {
        abandon(&mut controller, handle, false);
        return Err(AppError::Scheduler(
            anyhow::Error::new(e).context("couldn't enter real-time mode"),
        ));
    }

    let run = match controller.run(|| job.invoke(&mut state), config.max_jobs) {
        Ok(run) => run,
        Err(e) => {
            abandon(&mut controller, handle, true);
            return Err(AppError::Scheduler(
                anyhow::Error::new(e).context("job loop aborted"),
            ));
        }
    };

    controller
        .exit_real_time(&handle)
        .context("couldn't leave real-time mode")
        .map_err(AppError::Scheduler)?;
    controller
        .deregister(handle)
        .context("task deregistration failed")
        .map_err(AppError::Scheduler)?;

    let frames = state.cursor();
    let (source, buffers) = state.into_parts();
    let freed = buffers.teardown();
    source.close();
    info!("Released {} bytes of frame buffers", freed);
    info!("{}", health.summary());

    Ok(RunReport { run, frames })
}

/// Best-effort return to background mode and deregistration after a failure
fn abandon<B: SchedulerBackend, C: PeriodClock>(
    controller: &mut RealTimeTaskController<B, C>,
    handle: TaskHandle,
    in_real_time: bool,
) {
    if in_real_time {
        if let Err(e) = controller.exit_real_time(&handle) {
            warn!("Couldn't return to background mode: {}", e);
            return;
        }
    }
    if let Err(e) = controller.deregister(handle) {
        warn!("Couldn't deregister task: {}", e);
    }
}
