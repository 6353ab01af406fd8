//! Top-level render controller: enforces the single-concurrent-job
//! invariant and wires the ROP metadata provider into job startup.

use crate::error::{RopwatchError, RopwatchResult};
use crate::events::EventSink;
use crate::frames::FrameRange;
use crate::job::RenderJob;
use crate::monitor::{
    MonitorConfig, MonitorHandle, spawn_monitor_seeded, spawn_monitor_with_command,
};
use crate::process::CommandSpec;
use crate::rop::{HythonProbe, RopMetadataProvider};

/// Owns at most one active render job.
#[derive(Debug)]
pub struct RenderManager<P = HythonProbe> {
    provider: P,
    config: MonitorConfig,
    active: Option<MonitorHandle>,
}

impl RenderManager<HythonProbe> {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_provider(HythonProbe, config)
    }
}

impl<P: RopMetadataProvider> RenderManager<P> {
    pub fn with_provider(provider: P, config: MonitorConfig) -> Self {
        Self {
            provider,
            config,
            active: None,
        }
    }

    /// Start a render job. With no explicit range override, the ROP's native
    /// settings are probed first so the tracker knows the job size before
    /// the log confirms it; probe failures are non-fatal.
    pub fn start_render(&mut self, job: &RenderJob, sink: EventSink) -> RopwatchResult<()> {
        self.ensure_idle()?;

        let seed = if job.frame_range.is_none() {
            match self.provider.rop_settings(&job.hip_path, &job.out_node) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::warn!("ROP metadata probe failed: {e}");
                    None
                }
            }
        } else {
            None
        };

        let handle = spawn_monitor_seeded(job, seed, self.config, sink)?;
        self.active = Some(handle);
        Ok(())
    }

    /// Start monitoring an arbitrary renderer-style command (harnesses,
    /// fake renderers) under the same single-job rule.
    pub fn start_monitored_command(
        &mut self,
        spec: CommandSpec,
        explicit_range: Option<FrameRange>,
        sink: EventSink,
    ) -> RopwatchResult<()> {
        self.ensure_idle()?;
        let handle = spawn_monitor_with_command(spec, explicit_range, self.config, sink)?;
        self.active = Some(handle);
        Ok(())
    }

    fn ensure_idle(&self) -> RopwatchResult<()> {
        if self.is_rendering() {
            return Err(RopwatchError::validation(
                "a render is already running; interrupt or kill it first",
            ));
        }
        Ok(())
    }

    pub fn is_rendering(&self) -> bool {
        self.active.as_ref().is_some_and(|h| h.is_running())
    }

    /// Graceful stop of the active job; false when nothing is running.
    pub fn interrupt(&self) -> bool {
        match &self.active {
            Some(handle) => {
                handle.interrupt();
                true
            }
            None => false,
        }
    }

    /// Hard kill of the active job; false when nothing is running.
    pub fn kill(&self) -> bool {
        match &self.active {
            Some(handle) => {
                handle.kill();
                true
            }
            None => false,
        }
    }

    /// Wait for the active monitor to wind down and release it.
    pub fn join_active(&mut self) {
        if let Some(handle) = self.active.take() {
            handle.join();
        }
    }
}
