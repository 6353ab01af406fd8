//! UI-facing event stream.
//!
//! The monitor emits one tagged union over a thread-safe channel instead of
//! N independent callback registrations; the presentation layer drains the
//! receiver on its own schedule and is never called into from the worker
//! thread.

use std::path::PathBuf;
use std::sync::mpsc;

use time::OffsetDateTime;

use crate::estimate::TimeEstimate;

/// Semantic text color; the consumer maps it to its own palette.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OutputColor {
    /// Banners and section markers.
    Info,
    /// The echoed render command line.
    Command,
    /// Secondary chatter ("Loading scene...").
    Muted,
    /// Active frame headers.
    Active,
    /// Interrupt/kill notices.
    Warning,
}

/// Presentation hints for an [`RenderEvent::Output`] text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OutputStyle {
    pub color: Option<OutputColor>,
    pub bold: bool,
    pub centered: bool,
}

impl OutputStyle {
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn colored(color: OutputColor) -> Self {
        Self {
            color: Some(color),
            ..Self::default()
        }
    }

    pub fn bold(mut self) -> Self {
        self.bold = true;
        self
    }

    pub fn centered(mut self) -> Self {
        self.centered = true;
        self
    }
}

/// Everything the engine tells the presentation layer. One-way; no event
/// expects a return value.
#[derive(Clone, Debug, PartialEq)]
pub enum RenderEvent {
    /// Formatted human-readable output (banners, frame headers, notices).
    Output { text: String, style: OutputStyle },
    /// A normalized log line, verbatim.
    RawLine(String),
    /// Seen-frame count against the best-known total.
    Progress { done: u64, total: u64 },
    /// Sub-frame block progress for the frame currently rendering.
    FrameProgress { frame: i64, percent: u8 },
    FrameCompleted { frame: i64, seconds: f64 },
    FrameSkipped { frame: i64 },
    /// An output image landed on disk.
    ImageProduced { path: PathBuf },
    /// Periodic timing refresh; `eta` is absolute wall-clock when shown.
    TimeLabels {
        estimate: TimeEstimate,
        eta: Option<OffsetDateTime>,
    },
    /// The job is over (clean exit, interrupt, kill or internal error).
    /// Emitted exactly once per job.
    Finished { exit_code: Option<i32> },
}

/// Sending half of the event stream.
///
/// Sends never fail loudly: once the receiver hangs up, the remaining
/// events of a dying job are dropped on the floor.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: mpsc::Sender<RenderEvent>,
}

impl EventSink {
    pub fn emit(&self, event: RenderEvent) {
        let _ = self.tx.send(event);
    }

    pub fn output(&self, text: impl Into<String>, style: OutputStyle) {
        self.emit(RenderEvent::Output {
            text: text.into(),
            style,
        });
    }
}

/// Create a connected sink/receiver pair.
pub fn channel() -> (EventSink, mpsc::Receiver<RenderEvent>) {
    let (tx, rx) = mpsc::channel();
    (EventSink { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_delivers_in_order() {
        let (sink, rx) = channel();
        sink.emit(RenderEvent::Progress { done: 1, total: 5 });
        sink.emit(RenderEvent::FrameSkipped { frame: 3 });
        assert_eq!(rx.recv().unwrap(), RenderEvent::Progress { done: 1, total: 5 });
        assert_eq!(rx.recv().unwrap(), RenderEvent::FrameSkipped { frame: 3 });
    }

    #[test]
    fn emit_after_receiver_drop_is_silent() {
        let (sink, rx) = channel();
        drop(rx);
        sink.emit(RenderEvent::Finished { exit_code: Some(0) });
    }

    #[test]
    fn style_builders_compose() {
        let style = OutputStyle::colored(OutputColor::Info).bold().centered();
        assert_eq!(style.color, Some(OutputColor::Info));
        assert!(style.bold && style.centered);
    }
}
