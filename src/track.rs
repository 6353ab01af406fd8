//! Per-frame state and frame-total discovery for the active job.
//!
//! The tracker owns every [`FrameRecord`], the best current guess at the
//! job's size, and the consecutive-skip accumulator. All mutation happens on
//! the monitor thread; the monitor translates the return values into
//! [`crate::events::RenderEvent`]s.

use std::collections::{BTreeMap, HashSet};

use crate::frames::{FrameRange, FrameRecord, FrameStatus};
use crate::parse::RangeSource;

/// How the current `total_frames` value was discovered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TotalSource {
    Unset,
    /// Explicit user/config range: authoritative and immutable for the job.
    ExplicitArgs,
    /// Range text seen in the log (direct line or echoed command flags).
    LogEcho,
    /// `f1:`/`f2:` fields in ROP metadata output.
    RopMetadata,
    /// Raised opportunistically from observed frame numbers.
    Inference,
}

/// Margin added when inferring a total from a sighted frame number, so the
/// progress display never shows an impossible "frame 40 of 10".
const INFERENCE_MARGIN: i64 = 5;

/// A frame promoted to `Rendering`, plus any skip run flushed just before
/// its header.
#[derive(Clone, Debug, PartialEq)]
pub struct StartedFrame {
    pub frame: i64,
    /// Compressed report of the skip run this start ended, e.g. `"5-7, 9"`.
    pub flushed_skips: Option<String>,
}

#[derive(Debug)]
pub struct FrameTracker {
    records: BTreeMap<i64, FrameRecord>,
    /// Known frame list when a range has been fixed (explicit or announced);
    /// gives authoritative sequence indices.
    index_range: Option<FrameRange>,
    next_sequence_index: u64,
    total_frames: u64,
    total_source: TotalSource,
    current_frame: Option<i64>,
    frame_in_progress: bool,
    pending_skips: Vec<i64>,
    blocks_seen: HashSet<u32>,
    block_total: Option<u32>,
}

impl FrameTracker {
    /// Tracker for a job with no explicit range; the total starts unknown.
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            index_range: None,
            next_sequence_index: 0,
            total_frames: 0,
            total_source: TotalSource::Unset,
            current_frame: None,
            frame_in_progress: false,
            pending_skips: Vec::new(),
            blocks_seen: HashSet::new(),
            block_total: None,
        }
    }

    /// Tracker for a job with an explicit range override. The total is fixed
    /// for the job's lifetime; log-derived discovery cannot change it.
    pub fn with_explicit_range(range: FrameRange) -> Self {
        let mut tracker = Self::new();
        tracker.index_range = Some(range);
        tracker.total_frames = range.len_frames();
        tracker.total_source = TotalSource::ExplicitArgs;
        tracker
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn total_source(&self) -> TotalSource {
        self.total_source
    }

    pub fn current_frame(&self) -> Option<i64> {
        self.current_frame
    }

    /// True between the loading-options marker and the frame's end; the
    /// graceful-stop drain waits on this.
    pub fn frame_in_progress(&self) -> bool {
        self.frame_in_progress
    }

    /// Frames seen so far (rendering, completed or skipped).
    pub fn seen_count(&self) -> u64 {
        self.records
            .values()
            .filter(|r| r.status != FrameStatus::Pending)
            .count() as u64
    }

    pub fn records(&self) -> impl Iterator<Item = &FrameRecord> {
        self.records.values()
    }

    pub fn record(&self, frame: i64) -> Option<&FrameRecord> {
        self.records.get(&frame)
    }

    fn step(&self) -> i64 {
        self.index_range.map(|r| r.step).unwrap_or(1)
    }

    /// Floor no announcement may take the total below: with a fixed range,
    /// the highest occupied sequence position; otherwise the highest frame
    /// number sighted (numbers stand in for counts until a range is known).
    fn observed_floor(&self) -> u64 {
        match self.index_range {
            Some(_) => self
                .records
                .values()
                .map(|r| r.sequence_index + 1)
                .max()
                .unwrap_or(0),
            None => self
                .records
                .keys()
                .max()
                .copied()
                .unwrap_or(0)
                .max(0) as u64,
        }
    }

    fn ensure_record(&mut self, frame: i64) -> &mut FrameRecord {
        let sequence = match self.index_range.and_then(|r| r.sequence_index(frame)) {
            Some(seq) => seq,
            None => {
                if let Some(existing) = self.records.get(&frame) {
                    existing.sequence_index
                } else {
                    let seq = self.next_sequence_index;
                    self.next_sequence_index += 1;
                    seq
                }
            }
        };
        self.records
            .entry(frame)
            .or_insert_with(|| FrameRecord::new(frame, sequence))
    }

    /// A frame range was announced in the log. Returns true when the total
    /// changed.
    ///
    /// Precedence: an explicit range never moves; the first log-derived
    /// announcement wins over later ones from other sources; inference-based
    /// totals yield to any announcement. Nothing lowers the total below what
    /// has already been observed.
    pub fn on_frame_range_announced(
        &mut self,
        start: i64,
        end: i64,
        step: Option<i64>,
        source: RangeSource,
    ) -> bool {
        match self.total_source {
            TotalSource::ExplicitArgs | TotalSource::LogEcho | TotalSource::RopMetadata => {
                return false;
            }
            TotalSource::Unset | TotalSource::Inference => {}
        }
        let Ok(range) = FrameRange::new(start, end, step.unwrap_or(1)) else {
            return false;
        };

        let count = range.len_frames().max(self.observed_floor());
        // Adopting the range re-derives sequence indices for every frame it
        // covers; stray frames keep their lazily assigned positions.
        self.index_range = Some(range);
        for record in self.records.values_mut() {
            if let Some(seq) = range.sequence_index(record.frame_number) {
                record.sequence_index = seq;
            }
        }

        let changed = count != self.total_frames;
        self.total_frames = count;
        self.total_source = match source {
            RangeSource::Direct | RangeSource::CommandEcho => TotalSource::LogEcho,
            RangeSource::RopMetadata => TotalSource::RopMetadata,
        };
        changed
    }

    /// A `rendering frame N` line was seen. The frame is recorded
    /// provisionally (it may yet be skipped) and becomes the current frame.
    /// Returns true when the total was raised by inference.
    pub fn on_frame_started(&mut self, frame: i64) -> bool {
        self.ensure_record(frame);
        self.current_frame = Some(frame);

        if matches!(
            self.total_source,
            TotalSource::Unset | TotalSource::Inference
        ) && self.total_frames <= frame.max(0) as u64
        {
            let new_total = ((frame + INFERENCE_MARGIN).max(0) as u64).max(self.total_frames);
            if new_total != self.total_frames {
                self.total_frames = new_total;
                self.total_source = TotalSource::Inference;
                return true;
            }
        }
        false
    }

    /// The renderer skipped the current frame because its output already
    /// exists. Returns the skipped frame number, if one was in flight.
    pub fn on_frame_skipped(&mut self) -> Option<i64> {
        let frame = self.current_frame.take()?;
        let record = self.ensure_record(frame);
        record.status = FrameStatus::Skipped;
        record.duration_seconds = Some(0.0);
        self.pending_skips.push(frame);
        self.frame_in_progress = false;
        Some(frame)
    }

    /// The engine started loading per-frame options: the current frame will
    /// actually render. Flushes the pending skip run so its compressed
    /// report lands immediately before this frame's header.
    pub fn on_frame_loading_options(&mut self) -> Option<StartedFrame> {
        let frame = self.current_frame?;
        if self.records.get(&frame).map(|r| r.status) == Some(FrameStatus::Skipped) {
            return None;
        }
        let record = self.ensure_record(frame);
        record.status = FrameStatus::Rendering;
        record.progress_percent = 0;
        self.frame_in_progress = true;
        self.blocks_seen.clear();
        self.block_total = None;
        let flushed_skips = self.flush_pending_skips();
        Some(StartedFrame {
            frame,
            flushed_skips,
        })
    }

    /// A `Block k/n` line was seen. Progress is the count of distinct block
    /// indices over `n`; repeats and out-of-order arrivals cannot push the
    /// percentage forward. Returns `(frame, percent)` when a frame is
    /// current.
    pub fn on_block_progress(&mut self, index: u32, total: u32) -> Option<(i64, u8)> {
        let frame = self.current_frame?;
        if total == 0 {
            return None;
        }
        self.blocks_seen.insert(index);
        self.block_total = Some(total);
        let percent =
            ((self.blocks_seen.len() as u64 * 100) / u64::from(total)).min(100) as u8;
        let record = self.ensure_record(frame);
        record.progress_percent = percent;
        Some((frame, percent))
    }

    /// The ROP's end-of-frame hook fired.
    pub fn on_frame_ended(&mut self) {
        self.frame_in_progress = false;
    }

    /// A completion line with the frame's render duration was seen. Returns
    /// the frame number the duration was attributed to.
    ///
    /// When no start was observed (dropped log line), the completion is
    /// still recorded against the next expected frame number rather than
    /// discarded.
    pub fn on_frame_completed(&mut self, seconds: f64) -> i64 {
        let frame = self
            .current_frame
            .take()
            .unwrap_or_else(|| self.next_expected_frame());
        let record = self.ensure_record(frame);
        record.status = FrameStatus::Completed;
        record.duration_seconds = Some(seconds);
        record.progress_percent = 100;
        self.blocks_seen.clear();
        self.block_total = None;
        self.frame_in_progress = false;
        frame
    }

    /// Mark the frame that was mid-render as failed (abnormal process exit).
    pub fn fail_in_flight(&mut self) -> Option<i64> {
        let frame = self.current_frame.take()?;
        let record = self.records.get_mut(&frame)?;
        if record.status != FrameStatus::Rendering {
            return None;
        }
        record.status = FrameStatus::Failed;
        self.frame_in_progress = false;
        Some(frame)
    }

    fn next_expected_frame(&self) -> i64 {
        if let Some(range) = self.index_range {
            if let Some(frame) = range.frames().find(|f| !self.records.contains_key(f)) {
                return frame;
            }
        }
        match self.records.keys().max() {
            Some(&highest) => highest + self.step(),
            None => self.index_range.map(|r| r.start).unwrap_or(1),
        }
    }

    /// Drain the consecutive-skip accumulator into a compressed range list
    /// (`"5-7, 9"`); `None` when no skips are pending.
    pub fn flush_pending_skips(&mut self) -> Option<String> {
        if self.pending_skips.is_empty() {
            return None;
        }
        let mut frames = std::mem::take(&mut self.pending_skips);
        frames.sort_unstable();
        frames.dedup();
        Some(compress_frame_runs(&frames, self.step()))
    }
}

impl Default for FrameTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Compress sorted frame numbers into run notation, treating numbers one
/// `step` apart as contiguous: `[5,6,7,9]` with step 1 becomes `"5-7, 9"`.
fn compress_frame_runs(frames: &[i64], step: i64) -> String {
    let mut runs: Vec<String> = Vec::new();
    let mut iter = frames.iter().copied();
    let Some(mut start) = iter.next() else {
        return String::new();
    };
    let mut end = start;
    for frame in iter {
        if frame == end + step {
            end = frame;
        } else {
            runs.push(format_run(start, end));
            start = frame;
            end = frame;
        }
    }
    runs.push(format_run(start, end));
    runs.join(", ")
}

fn format_run(start: i64, end: i64) -> String {
    if start == end {
        format!("{start}")
    } else {
        format!("{start}-{end}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn started_then_skipped_frame_is_recorded_with_zero_duration() {
        // Spec scenario A.
        let mut t = FrameTracker::new();
        t.on_frame_started(5);
        assert_eq!(t.on_frame_skipped(), Some(5));

        let record = t.record(5).unwrap();
        assert_eq!(record.status, FrameStatus::Skipped);
        assert_eq!(record.duration_seconds, Some(0.0));
        // The skipped frame must not produce a started header.
        assert_eq!(t.on_frame_loading_options(), None);
        assert!(!t.frame_in_progress());
    }

    #[test]
    fn block_progress_uses_distinct_indices() {
        // Spec scenario B.
        let mut t = FrameTracker::new();
        t.on_frame_started(1);
        t.on_frame_loading_options();
        assert_eq!(t.on_block_progress(1, 4), Some((1, 25)));
        assert_eq!(t.on_block_progress(2, 4), Some((1, 50)));
        assert_eq!(t.on_block_progress(1, 4), Some((1, 50))); // duplicate
        assert_eq!(t.on_block_progress(3, 4), Some((1, 75)));
        assert_eq!(t.on_block_progress(4, 4), Some((1, 100)));
    }

    #[test]
    fn echoed_args_set_total_when_nothing_explicit() {
        // Spec scenario C.
        let mut t = FrameTracker::new();
        assert!(t.on_frame_range_announced(10, 19, None, RangeSource::CommandEcho));
        assert_eq!(t.total_frames(), 10);
        assert_eq!(t.total_source(), TotalSource::LogEcho);
    }

    #[test]
    fn skip_run_flushes_once_before_next_real_frame() {
        // Spec scenario E.
        let mut t = FrameTracker::new();
        for frame in [5, 6, 7] {
            t.on_frame_started(frame);
            assert_eq!(t.on_frame_skipped(), Some(frame));
        }
        t.on_frame_started(8);
        let started = t.on_frame_loading_options().unwrap();
        assert_eq!(started.frame, 8);
        assert_eq!(started.flushed_skips.as_deref(), Some("5-7"));
        // Flushed exactly once.
        assert_eq!(t.flush_pending_skips(), None);
    }

    #[test]
    fn explicit_range_total_is_immutable() {
        let range = FrameRange::new(1, 10, 1).unwrap();
        let mut t = FrameTracker::with_explicit_range(range);
        assert_eq!(t.total_frames(), 10);

        assert!(!t.on_frame_range_announced(1, 100, None, RangeSource::Direct));
        assert!(!t.on_frame_range_announced(1, 100, None, RangeSource::RopMetadata));
        t.on_frame_started(3);
        assert_eq!(t.total_frames(), 10);
        assert_eq!(t.total_source(), TotalSource::ExplicitArgs);
    }

    #[test]
    fn first_log_announcement_wins_over_later_sources() {
        let mut t = FrameTracker::new();
        assert!(t.on_frame_range_announced(1, 10, None, RangeSource::CommandEcho));
        assert!(!t.on_frame_range_announced(1, 50, None, RangeSource::RopMetadata));
        assert_eq!(t.total_frames(), 10);
        assert_eq!(t.total_source(), TotalSource::LogEcho);
    }

    #[test]
    fn inference_raises_total_and_yields_to_announcements() {
        let mut t = FrameTracker::new();
        assert!(t.on_frame_started(40));
        assert_eq!(t.total_frames(), 45); // 40 + margin
        assert_eq!(t.total_source(), TotalSource::Inference);

        // An announcement may replace inference, but never dips below the
        // highest frame number already observed.
        assert!(t.on_frame_range_announced(1, 10, None, RangeSource::Direct));
        assert_eq!(t.total_frames(), 40);
    }

    #[test]
    fn stepped_range_sequence_indices() {
        let range = FrameRange::new(5, 25, 5).unwrap();
        let mut t = FrameTracker::with_explicit_range(range);
        t.on_frame_started(15);
        assert_eq!(t.record(15).unwrap().sequence_index, 2);
        t.on_frame_started(25);
        assert_eq!(t.record(25).unwrap().sequence_index, 4);
    }

    #[test]
    fn orphan_completion_is_recorded_not_dropped() {
        let mut t = FrameTracker::new();
        let frame = t.on_frame_completed(12.5);
        assert_eq!(frame, 1);
        let record = t.record(frame).unwrap();
        assert_eq!(record.status, FrameStatus::Completed);
        assert_eq!(record.duration_seconds, Some(12.5));
        assert_eq!(t.seen_count(), 1);
    }

    #[test]
    fn orphan_completion_follows_the_explicit_range() {
        let range = FrameRange::new(10, 14, 2).unwrap();
        let mut t = FrameTracker::with_explicit_range(range);
        t.on_frame_started(10);
        t.on_frame_loading_options();
        t.on_frame_completed(3.0);
        // Next orphan lands on the next unseen frame of the range.
        assert_eq!(t.on_frame_completed(4.0), 12);
    }

    #[test]
    fn completion_resets_block_state() {
        let mut t = FrameTracker::new();
        t.on_frame_started(1);
        t.on_frame_loading_options();
        t.on_block_progress(1, 2);
        t.on_frame_completed(2.0);

        t.on_frame_started(2);
        t.on_frame_loading_options();
        // A fresh frame starts from its own distinct-block set.
        assert_eq!(t.on_block_progress(1, 4), Some((2, 25)));
    }

    #[test]
    fn seen_count_tracks_nonpending_records() {
        let mut t = FrameTracker::new();
        t.on_frame_started(1); // provisional, still pending
        assert_eq!(t.seen_count(), 0);
        t.on_frame_loading_options();
        assert_eq!(t.seen_count(), 1);
        t.on_frame_completed(1.0);
        t.on_frame_started(2);
        t.on_frame_skipped();
        assert_eq!(t.seen_count(), 2);
    }

    #[test]
    fn fail_in_flight_marks_rendering_frame() {
        let mut t = FrameTracker::new();
        t.on_frame_started(7);
        t.on_frame_loading_options();
        assert_eq!(t.fail_in_flight(), Some(7));
        assert_eq!(t.record(7).unwrap().status, FrameStatus::Failed);
        // Nothing in flight afterwards.
        assert_eq!(t.fail_in_flight(), None);
    }

    #[test]
    fn compress_runs_with_steps_and_gaps() {
        assert_eq!(compress_frame_runs(&[5, 6, 7, 9], 1), "5-7, 9");
        assert_eq!(compress_frame_runs(&[4], 1), "4");
        assert_eq!(compress_frame_runs(&[2, 4, 6, 10], 2), "2-6, 10");
    }
}
