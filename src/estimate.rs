//! Rolling per-frame timing statistics and the tiered remaining-time policy.
//!
//! Estimates must be displayable from the moment a render starts, long before
//! the first frame completes, so [`snapshot`] degrades gracefully through
//! three regimes: full-history average, overall pace, and a conservative
//! flat guess. `estimated_total` is always `elapsed + remaining` by
//! construction, never an independently computed value.

/// Insertion-ordered history of completed-frame durations.
#[derive(Clone, Debug, Default)]
pub struct TimingHistory {
    durations: Vec<f64>,
}

impl TimingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, seconds: f64) {
        self.durations.push(seconds.max(0.0));
    }

    pub fn len(&self) -> usize {
        self.durations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }

    /// Arithmetic mean over the full history; `0.0` with no samples.
    pub fn average(&self) -> f64 {
        if self.durations.is_empty() {
            return 0.0;
        }
        self.durations.iter().sum::<f64>() / self.durations.len() as f64
    }

    /// Trend-weighted estimate for the next frame: `max(0, 2*last - prev)`
    /// with at least two samples, the plain mean otherwise. More volatile
    /// than the mean with few samples; tracks speed-ups and slow-downs.
    pub fn recent_estimate(&self) -> f64 {
        match self.durations.as_slice() {
            [.., prev, last] => (2.0 * last - prev).max(0.0),
            _ => self.average(),
        }
    }
}

/// Which regime produced a [`TimeEstimate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EstimateBasis {
    /// Full-history average over completed frames.
    Average,
    /// Overall pace (`elapsed / frames_done`), no completed durations yet.
    Pace,
    /// Flat seconds-per-frame guess; low confidence.
    Guess,
    /// Total frame count still unknown; only elapsed time is meaningful.
    Unknown,
}

/// One observation of the job's timing state.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimeEstimate {
    pub elapsed: f64,
    pub average: f64,
    pub estimated_total: f64,
    pub remaining: f64,
    pub basis: EstimateBasis,
    /// Whether an ETA derived from `remaining` is worth showing.
    pub show_eta: bool,
}

/// Seconds-per-frame floor for the no-data guess tier.
const GUESS_FLOOR_SECS: f64 = 0.5;

/// Estimate remaining/total time for `frames_done` of `total_frames` after
/// `elapsed` seconds, given the completed-duration history.
pub fn snapshot(
    history: &TimingHistory,
    frames_done: u64,
    total_frames: u64,
    elapsed: f64,
) -> TimeEstimate {
    let elapsed = elapsed.max(0.0);
    let average = history.average();

    if total_frames == 0 {
        return TimeEstimate {
            elapsed,
            average,
            estimated_total: elapsed,
            remaining: 0.0,
            basis: EstimateBasis::Unknown,
            show_eta: false,
        };
    }

    let remaining_frames = total_frames.saturating_sub(frames_done) as f64;
    let (remaining, basis) = if average > 0.0 {
        (remaining_frames * average, EstimateBasis::Average)
    } else if frames_done > 0 {
        let pace = elapsed / frames_done as f64;
        (
            pace * total_frames as f64 - elapsed,
            EstimateBasis::Pace,
        )
    } else {
        // Expanding guess while the scene is still loading: assume some
        // minimal time per frame, growing with how long we have waited.
        let per_frame = (elapsed / 10.0).max(GUESS_FLOOR_SECS);
        (
            per_frame * total_frames as f64 - elapsed,
            EstimateBasis::Guess,
        )
    };

    let remaining = remaining.max(0.0);
    TimeEstimate {
        elapsed,
        average,
        estimated_total: elapsed + remaining,
        remaining,
        basis,
        show_eta: true,
    }
}

/// Terminal snapshot once the job has finished: remaining is exactly zero
/// and the total equals the elapsed wall time.
pub fn final_snapshot(history: &TimingHistory, elapsed: f64) -> TimeEstimate {
    let elapsed = elapsed.max(0.0);
    TimeEstimate {
        elapsed,
        average: history.average(),
        estimated_total: elapsed,
        remaining: 0.0,
        basis: if history.is_empty() {
            EstimateBasis::Unknown
        } else {
            EstimateBasis::Average
        },
        show_eta: false,
    }
}

/// Format seconds as a compact human duration: `45.5s`, `3m 20.5s`,
/// `1h 3m 20.5s`.
pub fn format_duration(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    if seconds < 60.0 {
        format!("{seconds:.1}s")
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0) as u64;
        format!("{minutes}m {:.1}s", seconds % 60.0)
    } else {
        let hours = (seconds / 3600.0) as u64;
        let minutes = ((seconds % 3600.0) / 60.0) as u64;
        format!("{hours}h {minutes}m {:.1}s", seconds % 60.0)
    }
}
