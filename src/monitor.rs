//! The monitor loop: one worker thread per job that pumps log lines through
//! the extractor, updates the tracker and timing history, and emits
//! [`RenderEvent`]s.
//!
//! Per iteration: refresh the sub-second elapsed/ETA tick, read one line
//! with a bounded timeout, dispatch whatever events it yields, and check the
//! cancellation/exit conditions. Lines are processed strictly in arrival
//! order; frame-state transitions are order-dependent. The `Finished` event
//! is emitted exactly once on every path out of the loop, including
//! internal errors, so the presentation layer is never left waiting.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use time::OffsetDateTime;
use time::macros::format_description;

use crate::error::RopwatchResult;
use crate::estimate::{self, TimingHistory, format_duration};
use crate::events::{EventSink, OutputColor, OutputStyle, RenderEvent};
use crate::frames::FrameRange;
use crate::job::{DriverScript, RenderJob};
use crate::parse::{LogEvent, RangeSource, extract_events, normalize_line};
use crate::process::{
    CommandSpec, LineReader, ProcessPhase, ReadLine, RenderProcess, spawn_render,
};
use crate::rop::RopSettings;
use crate::track::FrameTracker;

/// Tunables for the monitor loop.
#[derive(Clone, Copy, Debug)]
pub struct MonitorConfig {
    /// Bounded wait for one log line; cancellation/exit checks run at this
    /// cadence when the renderer is quiet.
    pub read_timeout: Duration,
    /// How often elapsed/ETA refresh even with no new log output.
    pub tick_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(100),
            tick_interval: Duration::from_millis(500),
        }
    }
}

/// Control surface for a running monitored job.
#[derive(Debug)]
pub struct MonitorHandle {
    process: Arc<RenderProcess>,
    sink: EventSink,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Graceful stop: the renderer finishes its current frame, the loop
    /// drains remaining output. A second call escalates to [`Self::kill`].
    pub fn interrupt(&self) {
        match self.process.interrupt() {
            ProcessPhase::Interrupting => {
                self.sink.output(
                    "\n Interrupt requested... Current frame will finish before stopping. \n\n",
                    OutputStyle::colored(OutputColor::Warning).bold().centered(),
                );
            }
            _ => self.emit_kill_notice(),
        }
    }

    /// Hard stop: terminate the process group immediately.
    pub fn kill(&self) {
        self.emit_kill_notice();
        self.process.kill();
    }

    fn emit_kill_notice(&self) {
        self.sink.output(
            "\n Force kill requested... Stopping render immediately. \n\n",
            OutputStyle::colored(OutputColor::Warning).bold().centered(),
        );
    }

    pub fn is_running(&self) -> bool {
        self.process.is_running()
    }

    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    /// Wait for the monitor thread to finish (it exits shortly after the
    /// process does).
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::warn!("monitor worker thread panicked");
        }
    }
}

/// Start monitoring `job`: write the driver script, spawn `hython`, start
/// the worker thread. Only a spawn failure is returned; everything after is
/// reported through the event channel.
#[tracing::instrument(skip(config, sink))]
pub fn spawn_monitor(
    job: &RenderJob,
    config: MonitorConfig,
    sink: EventSink,
) -> RopwatchResult<MonitorHandle> {
    spawn_monitor_seeded(job, None, config, sink)
}

/// [`spawn_monitor`] with the job's ROP settings already probed. The seed
/// only pre-announces a non-authoritative total; log-derived discovery and
/// explicit ranges keep their usual precedence.
pub fn spawn_monitor_seeded(
    job: &RenderJob,
    seed: Option<RopSettings>,
    config: MonitorConfig,
    sink: EventSink,
) -> RopwatchResult<MonitorHandle> {
    job.validate()?;
    let driver = DriverScript::write()?;
    let spec = job.command(driver.path());
    spawn_with(spec, job.frame_range, seed, config, sink, Some(driver))
}

/// Monitor an arbitrary command that emits renderer-style log output.
/// Useful for harnesses standing in for `hython`.
pub fn spawn_monitor_with_command(
    spec: CommandSpec,
    explicit_range: Option<FrameRange>,
    config: MonitorConfig,
    sink: EventSink,
) -> RopwatchResult<MonitorHandle> {
    spawn_with(spec, explicit_range, None, config, sink, None)
}

fn spawn_with(
    spec: CommandSpec,
    explicit_range: Option<FrameRange>,
    seed: Option<RopSettings>,
    config: MonitorConfig,
    sink: EventSink,
    driver: Option<DriverScript>,
) -> RopwatchResult<MonitorHandle> {
    let (process, reader) = spawn_render(&spec)?;
    let process = Arc::new(process);

    let mut tracker = match explicit_range {
        Some(range) => FrameTracker::with_explicit_range(range),
        None => FrameTracker::new(),
    };
    if explicit_range.is_none()
        && let Some(settings) = seed
    {
        tracker.on_frame_range_announced(
            settings.start,
            settings.end,
            None,
            RangeSource::RopMetadata,
        );
    }

    emit_start_banner(&sink, &spec);
    sink.emit(RenderEvent::Progress {
        done: 0,
        total: tracker.total_frames().max(1),
    });
    sink.emit(RenderEvent::TimeLabels {
        estimate: estimate::snapshot(&TimingHistory::new(), 0, 0, 0.0),
        eta: None,
    });

    let worker_process = Arc::clone(&process);
    let worker_sink = sink.clone();
    let thread = std::thread::Builder::new()
        .name("ropwatch-monitor".to_string())
        .spawn(move || {
            // The driver temp file must outlive the subprocess.
            let _driver = driver;
            let mut worker = MonitorWorker::new(worker_process, reader, tracker, worker_sink, config);
            // The consumer must get its Finished even if the loop blows up.
            let exit_code =
                match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| worker.run())) {
                    Ok(code) => code,
                    Err(_) => {
                        tracing::warn!("monitor loop panicked; finishing job anyway");
                        None
                    }
                };
            worker.finish(exit_code);
        })
        .map_err(|e| crate::error::RopwatchError::spawn(format!("failed to start monitor thread: {e}")))?;

    Ok(MonitorHandle {
        process,
        sink,
        thread: Some(thread),
    })
}

fn emit_start_banner(sink: &EventSink, spec: &CommandSpec) {
    let banner_format = format_description!(
        "[hour repr:12 padding:none]:[minute] [period] on [month repr:short] [day], [year]"
    );
    let started_at = now_local().format(&banner_format).unwrap_or_default();
    sink.output(
        format!("\n\n RENDER STARTED AT {started_at} \n\n"),
        OutputStyle::colored(OutputColor::Info).bold().centered(),
    );
    sink.output(
        format!("{}\n\n", spec.display_line()),
        OutputStyle::colored(OutputColor::Command),
    );
    sink.output("Loading scene...\n", OutputStyle::colored(OutputColor::Muted));
}

fn now_local() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn format_clock(t: OffsetDateTime) -> String {
    let clock = format_description!("[hour repr:12 padding:none]:[minute]:[second] [period]");
    t.format(&clock).unwrap_or_default()
}

struct MonitorWorker {
    process: Arc<RenderProcess>,
    reader: LineReader,
    tracker: FrameTracker,
    history: TimingHistory,
    sink: EventSink,
    config: MonitorConfig,
    started: Instant,
    last_tick: Instant,
    /// Last wall-clock ETA shown; retained so the display never flickers
    /// back to "no ETA" once one was valid.
    last_eta: Option<OffsetDateTime>,
    /// Wall-clock start of the most recently started frame, for the header.
    frame_started_wall: Option<(i64, OffsetDateTime)>,
}

impl MonitorWorker {
    fn new(
        process: Arc<RenderProcess>,
        reader: LineReader,
        tracker: FrameTracker,
        sink: EventSink,
        config: MonitorConfig,
    ) -> Self {
        let now = Instant::now();
        Self {
            process,
            reader,
            tracker,
            history: TimingHistory::new(),
            sink,
            config,
            started: now,
            last_tick: now,
            last_eta: None,
            frame_started_wall: None,
        }
    }

    /// The loop proper. Any error funnels into the same finish path as a
    /// clean exit so the consumer always gets its `Finished`.
    fn run(&mut self) -> Option<i32> {
        loop {
            if self.last_tick.elapsed() >= self.config.tick_interval {
                self.emit_time_labels();
                self.last_tick = Instant::now();
            }

            match self.reader.read_line(self.config.read_timeout) {
                ReadLine::Line(raw) => {
                    let line = normalize_line(&raw);
                    self.sink.emit(RenderEvent::RawLine(line.clone()));
                    for event in extract_events(&line) {
                        self.dispatch(event);
                    }
                }
                ReadLine::Timeout => {
                    match self.process.phase() {
                        ProcessPhase::Killed => break,
                        ProcessPhase::Interrupting if !self.tracker.frame_in_progress() => break,
                        _ => {}
                    }
                    // Quiet and already exited: stop even if some grandchild
                    // still holds the pipe open.
                    if !self.process.is_running() {
                        break;
                    }
                }
                ReadLine::Closed => break,
            }
        }

        self.process
            .wait_exit(Duration::from_secs(2))
            .and_then(|status| status.code())
    }

    fn dispatch(&mut self, event: LogEvent) {
        match event {
            LogEvent::SavedFile { path } | LogEvent::OutputFileAnnounced { path } => {
                self.sink.emit(RenderEvent::ImageProduced { path: path.into() });
            }
            LogEvent::RangeAnnounced {
                start,
                end,
                step,
                source,
            } => {
                if self.tracker.on_frame_range_announced(start, end, step, source) {
                    self.emit_progress();
                    // First estimate the moment the job size is known.
                    self.emit_time_labels();
                }
            }
            LogEvent::FrameStarted { frame, .. } => {
                self.frame_started_wall = Some((frame, now_local()));
                if self.tracker.on_frame_started(frame) {
                    self.emit_progress();
                }
            }
            LogEvent::FrameSkipped => {
                if let Some(frame) = self.tracker.on_frame_skipped() {
                    self.sink.emit(RenderEvent::FrameSkipped { frame });
                    self.emit_progress();
                    self.emit_time_labels();
                }
            }
            LogEvent::FrameLoadingOptions => {
                if let Some(started) = self.tracker.on_frame_loading_options() {
                    if let Some(skips) = started.flushed_skips {
                        self.emit_skip_report(&skips);
                    }
                    self.emit_frame_header(started.frame);
                    self.emit_progress();
                }
            }
            LogEvent::BlockProgress { index, total } => {
                if let Some((frame, percent)) = self.tracker.on_block_progress(index, total) {
                    self.sink.emit(RenderEvent::FrameProgress { frame, percent });
                }
            }
            LogEvent::FrameEnded => self.tracker.on_frame_ended(),
            LogEvent::FrameCompleted { seconds } => {
                let frame = self.tracker.on_frame_completed(seconds);
                self.history.push(seconds);
                self.sink.emit(RenderEvent::FrameCompleted { frame, seconds });
                self.emit_progress();
                self.emit_time_labels();
                self.sink.output(
                    format!(
                        "   {:<8} {} - {}\n\n",
                        "Finished",
                        format_clock(now_local()),
                        format_duration(seconds)
                    ),
                    OutputStyle::plain(),
                );
            }
        }
    }

    fn emit_frame_header(&mut self, frame: i64) {
        self.sink.output(
            format!("\n Frame {frame}\n"),
            OutputStyle::colored(OutputColor::Active).bold(),
        );

        let started_wall = match self.frame_started_wall {
            Some((started_frame, wall)) if started_frame == frame => wall,
            _ => now_local(),
        };
        let mut info = format!("   {:<8} {}\n", "Started", format_clock(started_wall));

        // Per-frame estimate: trend once two samples exist, mean before.
        let estimated = if self.history.len() >= 2 {
            self.history.recent_estimate()
        } else {
            self.history.average()
        };
        if estimated > 0.0 {
            let finish = started_wall + time::Duration::seconds_f64(estimated);
            info.push_str(&format!(
                "   {:<8} {} - {}\n",
                "Estimate",
                format_clock(finish),
                format_duration(estimated)
            ));
        }
        self.sink.output(info, OutputStyle::plain());
    }

    fn emit_skip_report(&self, skips: &str) {
        self.sink.output(
            format!("Frames {skips} skipped - Files already exist\n\n"),
            OutputStyle::plain(),
        );
    }

    fn emit_progress(&self) {
        self.sink.emit(RenderEvent::Progress {
            done: self.tracker.seen_count(),
            total: self.tracker.total_frames().max(1),
        });
    }

    fn emit_time_labels(&mut self) {
        let snapshot = estimate::snapshot(
            &self.history,
            self.tracker.seen_count(),
            self.tracker.total_frames(),
            self.started.elapsed().as_secs_f64(),
        );
        let eta = if snapshot.show_eta {
            let eta = now_local() + time::Duration::seconds_f64(snapshot.remaining);
            self.last_eta = Some(eta);
            Some(eta)
        } else {
            self.last_eta
        };
        self.sink.emit(RenderEvent::TimeLabels {
            estimate: snapshot,
            eta,
        });
    }

    /// Terminal bookkeeping: flush pending skip runs, settle in-flight
    /// frames, emit the zero-remaining snapshot and the single `Finished`.
    fn finish(&mut self, exit_code: Option<i32>) {
        if let Some(skips) = self.tracker.flush_pending_skips() {
            self.emit_skip_report(&skips);
        }

        let killed = self.process.phase() == ProcessPhase::Killed;
        let clean_exit = exit_code == Some(0);
        if !clean_exit
            && let Some(frame) = self.tracker.fail_in_flight()
        {
            self.sink.output(
                format!("\n Frame {frame} did not complete \n"),
                OutputStyle::colored(OutputColor::Warning),
            );
        }
        if killed {
            self.sink.output(
                "\n Render Killed \n\n",
                OutputStyle::colored(OutputColor::Warning).bold().centered(),
            );
        }

        self.emit_progress();
        self.sink.emit(RenderEvent::TimeLabels {
            estimate: estimate::final_snapshot(&self.history, self.started.elapsed().as_secs_f64()),
            eta: None,
        });
        self.sink.emit(RenderEvent::Finished { exit_code });
        tracing::debug!(?exit_code, "monitor loop finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_polls_faster_than_it_ticks() {
        let config = MonitorConfig::default();
        assert!(config.read_timeout < config.tick_interval);
    }
}
