//! Recognizers for the renderer's free-text log stream.
//!
//! The log format is not a structured protocol; it is whatever `hython`, the
//! ROP and the render engine happen to print. Each domain event gets one
//! named recognizer, independently testable against literal captured lines.
//! Absence of a match is the default, expected case for the majority of
//! lines and is never an error.

use std::sync::LazyLock;

use regex::Regex;

/// Vendor chatter prefix stripped from lines before recognition.
const VENDOR_PREFIX: &str = "[Redshift]";

/// Marker printed by the render driver script after each frame.
const OUTPUT_FILE_MARKER: &str = "ropwatch_outputfile:";

/// Which textual form announced a frame range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RangeSource {
    /// A direct `Frame range: A-B` line.
    Direct,
    /// Start/end flags echoed from the render command line.
    CommandEcho,
    /// `f1:`/`f2:` fields in ROP metadata output.
    RopMetadata,
}

/// A domain event recognized on a single log line. One line can yield more
/// than one event.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum LogEvent {
    SavedFile { path: String },
    RangeAnnounced {
        start: i64,
        end: i64,
        step: Option<i64>,
        source: RangeSource,
    },
    FrameStarted { node: String, frame: i64 },
    FrameSkipped,
    /// The engine began loading per-frame options: the true "rendering in
    /// progress" marker, distinguishing frames that will actually render
    /// from ones about to be skipped.
    FrameLoadingOptions,
    BlockProgress { index: u32, total: u32 },
    FrameEnded,
    FrameCompleted { seconds: f64 },
    /// Resolved output path reported by the driver script.
    OutputFileAnnounced { path: String },
}

/// Decode raw line bytes tolerantly, strip the vendor prefix and trailing
/// whitespace.
pub fn normalize_line(raw: &[u8]) -> String {
    let line = String::from_utf8_lossy(raw);
    let line = line
        .replace(&format!("{VENDOR_PREFIX} "), "")
        .replace(VENDOR_PREFIX, "");
    line.trim_end().to_string()
}

static SAVED_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"Saved file ['"]([^'"]+\.(?:exr|png|jpg|jpeg|tif|tiff))['"]"#)
        .expect("saved-file pattern")
});

pub fn recognize_saved_file(line: &str) -> Option<LogEvent> {
    SAVED_FILE.captures(line).map(|c| LogEvent::SavedFile {
        path: c[1].to_string(),
    })
}

static RANGE_DIRECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Frame range: (\d+)-(\d+)").expect("direct-range pattern"));

pub fn recognize_range_direct(line: &str) -> Option<LogEvent> {
    let c = RANGE_DIRECT.captures(line)?;
    Some(LogEvent::RangeAnnounced {
        start: c[1].parse().ok()?,
        end: c[2].parse().ok()?,
        step: None,
        source: RangeSource::Direct,
    })
}

static RANGE_ECHO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-s (\d+).*?-e (\d+)").expect("echoed-range pattern"));
static RANGE_ECHO_STEP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-t (\d+)").expect("echoed-step pattern"));

pub fn recognize_range_echo(line: &str) -> Option<LogEvent> {
    let caps = RANGE_ECHO.captures(line)?;
    let step = RANGE_ECHO_STEP
        .captures(line)
        .and_then(|c| c[1].parse().ok());
    Some(LogEvent::RangeAnnounced {
        start: caps[1].parse().ok()?,
        end: caps[2].parse().ok()?,
        step,
        source: RangeSource::CommandEcho,
    })
}

static RANGE_ROP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ROP.*f1:(\d+).*f2:(\d+)").expect("rop-range pattern"));

pub fn recognize_range_rop(line: &str) -> Option<LogEvent> {
    let c = RANGE_ROP.captures(line)?;
    Some(LogEvent::RangeAnnounced {
        start: c[1].parse().ok()?,
        end: c[2].parse().ok()?,
        step: None,
        source: RangeSource::RopMetadata,
    })
}

static FRAME_STARTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'([^']+)' rendering frame (\d+)").expect("frame-start pattern"));

pub fn recognize_frame_started(line: &str) -> Option<LogEvent> {
    let c = FRAME_STARTED.captures(line)?;
    Some(LogEvent::FrameStarted {
        node: c[1].to_string(),
        frame: c[2].parse().ok()?,
    })
}

pub fn recognize_frame_skipped(line: &str) -> Option<LogEvent> {
    // Two known phrasings across renderer versions.
    if line.contains("Skip rendering enabled. File already rendered")
        || line.contains("Skipped - File already exists")
    {
        Some(LogEvent::FrameSkipped)
    } else {
        None
    }
}

pub fn recognize_loading_options(line: &str) -> Option<LogEvent> {
    line.contains("Loading RS rendering options")
        .then_some(LogEvent::FrameLoadingOptions)
}

static BLOCK_PROGRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Block (\d+)/(\d+)").expect("block pattern"));

pub fn recognize_block_progress(line: &str) -> Option<LogEvent> {
    let c = BLOCK_PROGRESS.captures(line)?;
    Some(LogEvent::BlockProgress {
        index: c[1].parse().ok()?,
        total: c[2].parse().ok()?,
    })
}

pub fn recognize_frame_ended(line: &str) -> Option<LogEvent> {
    line.contains("ROP node endRender")
        .then_some(LogEvent::FrameEnded)
}

static FRAME_COMPLETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"total time (\d+\.\d+) sec").expect("completion pattern"));

pub fn recognize_frame_completed(line: &str) -> Option<LogEvent> {
    if !line.contains("scene extraction time") {
        return None;
    }
    let c = FRAME_COMPLETED.captures(line)?;
    Some(LogEvent::FrameCompleted {
        seconds: c[1].parse().ok()?,
    })
}

pub fn recognize_output_file(line: &str) -> Option<LogEvent> {
    let rest = line.strip_prefix(OUTPUT_FILE_MARKER)?;
    Some(LogEvent::OutputFileAnnounced {
        path: rest.trim().to_string(),
    })
}

/// Run every recognizer against a normalized line.
///
/// The three range recognizers are mutually exclusive with a fixed priority
/// (direct > command echo > ROP metadata); all other recognizers are
/// independent and may stack on the same line.
pub fn extract_events(line: &str) -> Vec<LogEvent> {
    let mut events = Vec::new();

    if let Some(e) = recognize_saved_file(line) {
        events.push(e);
    }
    if let Some(e) = recognize_range_direct(line)
        .or_else(|| recognize_range_echo(line))
        .or_else(|| recognize_range_rop(line))
    {
        events.push(e);
    }
    if let Some(e) = recognize_frame_started(line) {
        events.push(e);
    }
    if let Some(e) = recognize_frame_skipped(line) {
        events.push(e);
    }
    if let Some(e) = recognize_loading_options(line) {
        events.push(e);
    }
    if let Some(e) = recognize_block_progress(line) {
        events.push(e);
    }
    if let Some(e) = recognize_frame_ended(line) {
        events.push(e);
    }
    if let Some(e) = recognize_frame_completed(line) {
        events.push(e);
    }
    if let Some(e) = recognize_output_file(line) {
        events.push(e);
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_vendor_prefix_and_trailing_whitespace() {
        assert_eq!(
            normalize_line(b"[Redshift] Block 3/10\r\n"),
            "Block 3/10"
        );
        assert_eq!(normalize_line(b"[Redshift]Rendering...\n"), "Rendering...");
        assert_eq!(normalize_line(b"plain line  \n"), "plain line");
    }

    #[test]
    fn normalize_survives_undecodable_bytes() {
        let line = normalize_line(b"Saved \xff\xfe garbage\n");
        assert!(line.starts_with("Saved"));
        assert!(line.contains('\u{fffd}'));
    }

    #[test]
    fn saved_file_single_and_double_quotes() {
        assert_eq!(
            recognize_saved_file("Saved file '/renders/shot_0005.exr' in 0.2s"),
            Some(LogEvent::SavedFile {
                path: "/renders/shot_0005.exr".to_string()
            })
        );
        assert_eq!(
            recognize_saved_file(r#"Saved file "out/beauty.0010.png""#),
            Some(LogEvent::SavedFile {
                path: "out/beauty.0010.png".to_string()
            })
        );
        assert_eq!(recognize_saved_file("Saved file '/renders/log.txt'"), None);
    }

    #[test]
    fn direct_range_line() {
        assert_eq!(
            recognize_range_direct("Frame range: 1-100"),
            Some(LogEvent::RangeAnnounced {
                start: 1,
                end: 100,
                step: None,
                source: RangeSource::Direct,
            })
        );
    }

    #[test]
    fn echoed_args_without_step() {
        // Spec scenario C: bare flags, no step present.
        assert_eq!(
            recognize_range_echo("-s 10 -e 19"),
            Some(LogEvent::RangeAnnounced {
                start: 10,
                end: 19,
                step: None,
                source: RangeSource::CommandEcho,
            })
        );
    }

    #[test]
    fn echoed_args_full_command_line_with_step() {
        let line = "hython /tmp/driver.py -i /shots/a.hip -o /out/rs1 -s 1 -e 50 -u True -r False -t 2";
        assert_eq!(
            recognize_range_echo(line),
            Some(LogEvent::RangeAnnounced {
                start: 1,
                end: 50,
                step: Some(2),
                source: RangeSource::CommandEcho,
            })
        );
    }

    #[test]
    fn rop_metadata_range() {
        assert_eq!(
            recognize_range_rop("ROP /out/Redshift_ROP1 f1:5 f2:20 f3:1"),
            Some(LogEvent::RangeAnnounced {
                start: 5,
                end: 20,
                step: None,
                source: RangeSource::RopMetadata,
            })
        );
    }

    #[test]
    fn frame_started_extracts_node_and_number() {
        assert_eq!(
            recognize_frame_started("'/out/Redshift_ROP1' rendering frame 5"),
            Some(LogEvent::FrameStarted {
                node: "/out/Redshift_ROP1".to_string(),
                frame: 5,
            })
        );
    }

    #[test]
    fn both_skip_phrasings_match() {
        assert_eq!(
            recognize_frame_skipped("Skip rendering enabled. File already rendered"),
            Some(LogEvent::FrameSkipped)
        );
        assert_eq!(
            recognize_frame_skipped("Skipped - File already exists"),
            Some(LogEvent::FrameSkipped)
        );
        assert_eq!(recognize_frame_skipped("Skipping nothing"), None);
    }

    #[test]
    fn loading_options_marker() {
        assert_eq!(
            recognize_loading_options("Loading RS rendering options for frame 5"),
            Some(LogEvent::FrameLoadingOptions)
        );
    }

    #[test]
    fn block_progress_indices() {
        assert_eq!(
            recognize_block_progress("  Block 3/10 rendered"),
            Some(LogEvent::BlockProgress { index: 3, total: 10 })
        );
    }

    #[test]
    fn frame_ended_hook() {
        assert_eq!(
            recognize_frame_ended("Redshift_ROP1: ROP node endRender"),
            Some(LogEvent::FrameEnded)
        );
    }

    #[test]
    fn completion_duration_needs_extraction_context() {
        assert_eq!(
            recognize_frame_completed(
                "scene extraction time 0.12 sec, total time 12.34 sec"
            ),
            Some(LogEvent::FrameCompleted { seconds: 12.34 })
        );
        // "total time" alone is ambiguous chatter.
        assert_eq!(recognize_frame_completed("total time 12.34 sec"), None);
    }

    #[test]
    fn output_file_marker() {
        assert_eq!(
            recognize_output_file("ropwatch_outputfile: /renders/shot_0005.exr"),
            Some(LogEvent::OutputFileAnnounced {
                path: "/renders/shot_0005.exr".to_string()
            })
        );
    }

    #[test]
    fn unmatched_lines_yield_nothing() {
        assert!(extract_events("Querying texture cache...").is_empty());
        assert!(extract_events("").is_empty());
    }

    #[test]
    fn range_recognizers_are_mutually_exclusive_by_priority() {
        // A contrived line matching both the direct and echoed forms yields a
        // single announcement from the direct recognizer.
        let events = extract_events("Frame range: 1-5 (-s 1 -e 5)");
        let ranges: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, LogEvent::RangeAnnounced { .. }))
            .collect();
        assert_eq!(ranges.len(), 1);
        assert!(matches!(
            ranges[0],
            LogEvent::RangeAnnounced {
                source: RangeSource::Direct,
                ..
            }
        ));
    }
}
