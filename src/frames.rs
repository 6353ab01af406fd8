use crate::error::{RopwatchError, RopwatchResult};

/// Inclusive, stepped frame range as configured on a ROP (`f1`/`f2`/`f3`).
///
/// Frame numbers may be non-contiguous (`step > 1`), but sequence indices
/// (positions within the ordered frame list) are always contiguous from 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FrameRange {
    pub start: i64,
    pub end: i64, // inclusive
    pub step: i64,
}

impl FrameRange {
    pub fn new(start: i64, end: i64, step: i64) -> RopwatchResult<Self> {
        if end < start {
            return Err(RopwatchError::validation("FrameRange start must be <= end"));
        }
        if step < 1 {
            return Err(RopwatchError::validation("FrameRange step must be >= 1"));
        }
        Ok(Self { start, end, step })
    }

    /// Range covering every frame from `start` to `end`.
    pub fn contiguous(start: i64, end: i64) -> RopwatchResult<Self> {
        Self::new(start, end, 1)
    }

    /// Number of frames in the list `start, start+step, ..., <= end`.
    pub fn len_frames(self) -> u64 {
        ((self.end - self.start) / self.step + 1) as u64
    }

    /// Last frame number actually in the list (`end` itself only when aligned).
    pub fn last_frame(self) -> i64 {
        self.start + ((self.end - self.start) / self.step) * self.step
    }

    /// True iff `frame` is in the list (within bounds and step-aligned).
    pub fn contains(self, frame: i64) -> bool {
        frame >= self.start && frame <= self.end && (frame - self.start) % self.step == 0
    }

    /// Position of `frame` within the ordered frame list, if it is a member.
    pub fn sequence_index(self, frame: i64) -> Option<u64> {
        if self.contains(frame) {
            Some(((frame - self.start) / self.step) as u64)
        } else {
            None
        }
    }

    pub fn frames(self) -> impl Iterator<Item = i64> {
        (self.start..=self.end).step_by(self.step as usize)
    }
}

/// Lifecycle status of a single frame in the active job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FrameStatus {
    Pending,
    Rendering,
    Completed,
    Skipped,
    Failed,
}

/// Per-frame state, created lazily the first time a frame number shows up in
/// the log and mutated in place by later events.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FrameRecord {
    pub frame_number: i64,
    /// Position within the ordered frame list (0-based). Derived from the
    /// explicit range when there is one, assigned on first sighting otherwise.
    pub sequence_index: u64,
    pub status: FrameStatus,
    /// 0-100, meaningful only while `Rendering`.
    pub progress_percent: u8,
    /// Set on completion; `Some(0.0)` for skipped frames.
    pub duration_seconds: Option<f64>,
}

impl FrameRecord {
    pub fn new(frame_number: i64, sequence_index: u64) -> Self {
        Self {
            frame_number,
            sequence_index,
            status: FrameStatus::Pending,
            progress_percent: 0,
            duration_seconds: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_range_and_bad_step() {
        assert!(FrameRange::new(10, 5, 1).is_err());
        assert!(FrameRange::new(1, 10, 0).is_err());
        assert!(FrameRange::new(1, 10, -2).is_err());
    }

    #[test]
    fn stepped_len_and_last_frame() {
        let r = FrameRange::new(10, 19, 1).unwrap();
        assert_eq!(r.len_frames(), 10);
        assert_eq!(r.last_frame(), 19);

        let r = FrameRange::new(1, 10, 3).unwrap();
        // 1, 4, 7, 10
        assert_eq!(r.len_frames(), 4);
        assert_eq!(r.last_frame(), 10);

        let r = FrameRange::new(1, 9, 3).unwrap();
        // 1, 4, 7
        assert_eq!(r.len_frames(), 3);
        assert_eq!(r.last_frame(), 7);
    }

    #[test]
    fn sequence_index_is_step_aligned_position() {
        let r = FrameRange::new(5, 25, 5).unwrap();
        assert_eq!(r.sequence_index(5), Some(0));
        assert_eq!(r.sequence_index(15), Some(2));
        assert_eq!(r.sequence_index(25), Some(4));
        assert_eq!(r.sequence_index(7), None); // not aligned
        assert_eq!(r.sequence_index(30), None); // out of range
    }

    #[test]
    fn frames_enumerates_the_list() {
        let r = FrameRange::new(2, 8, 2).unwrap();
        assert_eq!(r.frames().collect::<Vec<_>>(), vec![2, 4, 6, 8]);
    }
}
