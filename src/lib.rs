//! Ropwatch is a monitoring engine for Houdini batch renders.
//!
//! It launches a `hython` render subprocess, parses its free-text log
//! stream in real time, and turns it into structured frame-lifecycle events
//! and continuously updated progress/ETA estimates.
//!
//! # Pipeline overview
//!
//! 1. **Spawn**: [`RenderJob`] + the embedded driver script -> a supervised
//!    `hython` process in its own process group
//! 2. **Read**: bounded-timeout line extraction from the combined
//!    stdout/stderr stream ([`process::LineReader`])
//! 3. **Extract**: per-line recognizers -> [`parse::LogEvent`]s
//! 4. **Track**: [`track::FrameTracker`] per-frame state and frame-total
//!    discovery; [`estimate`] timing statistics
//! 5. **Emit**: one [`RenderEvent`] stream over a thread-safe channel,
//!    drained by the presentation layer on its own schedule
//!
//! The key design constraints:
//!
//! - **Tolerant parsing**: the renderer's output is not a protocol; every
//!   recognizer may fail on any line and unmatched lines are the normal
//!   case.
//! - **Order-preserving**: lines are processed strictly in arrival order on
//!   one worker thread; frame-state transitions are order-dependent.
//! - **Never hang the UI**: the `Finished` event fires exactly once on
//!   every path out of the monitor loop, including internal errors.

pub mod error;
pub mod estimate;
pub mod events;
pub mod frames;
pub mod history;
pub mod job;
pub mod manager;
pub mod monitor;
pub mod parse;
pub mod process;
pub mod rop;
pub mod track;

pub use error::{RopwatchError, RopwatchResult};
pub use estimate::{EstimateBasis, TimeEstimate, TimingHistory, format_duration};
pub use events::{EventSink, OutputColor, OutputStyle, RenderEvent, channel};
pub use frames::{FrameRange, FrameRecord, FrameStatus};
pub use job::RenderJob;
pub use manager::RenderManager;
pub use monitor::{
    MonitorConfig, MonitorHandle, spawn_monitor, spawn_monitor_seeded, spawn_monitor_with_command,
};
pub use parse::{LogEvent, RangeSource};
pub use process::{CommandSpec, ProcessPhase};
pub use rop::{HythonProbe, RopMetadataProvider, RopSettings};
pub use track::{FrameTracker, TotalSource};
