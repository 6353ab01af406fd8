//! Render job description and the `hython` invocation built from it.

use std::path::{Path, PathBuf};

use crate::error::{RopwatchError, RopwatchResult};
use crate::frames::FrameRange;
use crate::process::CommandSpec;

/// One render invocation: which scene, which ROP, and how. At most one job
/// is active at a time; the job is replaced wholesale when a render ends or
/// a new one starts.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RenderJob {
    pub hip_path: PathBuf,
    pub out_node: String,
    /// Explicit range override; `None` lets the ROP's own range decide.
    pub frame_range: Option<FrameRange>,
    /// Skip frames whose output files already exist.
    pub skip_existing: bool,
}

impl RenderJob {
    pub fn new(hip_path: impl Into<PathBuf>, out_node: impl Into<String>) -> Self {
        Self {
            hip_path: hip_path.into(),
            out_node: out_node.into(),
            frame_range: None,
            skip_existing: false,
        }
    }

    pub fn with_range(mut self, range: FrameRange) -> Self {
        self.frame_range = Some(range);
        self
    }

    pub fn with_skip_existing(mut self, skip: bool) -> Self {
        self.skip_existing = skip;
        self
    }

    pub fn validate(&self) -> RopwatchResult<()> {
        if self.hip_path.as_os_str().is_empty() {
            return Err(RopwatchError::validation("job hip_path must be non-empty"));
        }
        if self.out_node.is_empty() {
            return Err(RopwatchError::validation("job out_node must be non-empty"));
        }
        Ok(())
    }

    /// Build the `hython` command line for this job around a written driver
    /// script.
    ///
    /// Start/end/step are always passed; the `-u` flag tells the driver
    /// whether to honor them or leave the ROP's native range in charge.
    pub fn command(&self, driver: &Path) -> CommandSpec {
        let (start, end, step, use_range) = match self.frame_range {
            Some(range) => (range.start, range.end, range.step, true),
            None => (1, 1, 1, false),
        };
        CommandSpec::new("hython")
            .arg(driver.to_string_lossy())
            .arg("-i")
            .arg(self.hip_path.to_string_lossy())
            .arg("-o")
            .arg(&self.out_node)
            .arg("-s")
            .arg(start.to_string())
            .arg("-e")
            .arg(end.to_string())
            .arg("-u")
            .arg(python_bool(use_range))
            .arg("-r")
            .arg(python_bool(self.skip_existing))
            .arg("-t")
            .arg(step.to_string())
    }
}

fn python_bool(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

/// Python driver executed inside `hython`. It owns the render-side half of
/// the monitoring protocol: SIGUSR1 stops after the current frame, explicit
/// ranges are stepped frame-by-frame so interrupts land between frames, and
/// each finished frame reports its resolved output path with the
/// `ropwatch_outputfile:` marker.
const DRIVER_SOURCE: &str = r#"#!/usr/bin/env python3

import argparse
import os
import signal
import sys

STOP_RENDERING = False


def _on_signal(sig, frame):
    global STOP_RENDERING
    if sig == signal.SIGUSR1:
        print("Received interrupt signal. Will stop after current frame completes.")
        STOP_RENDERING = True
    elif sig == signal.SIGTERM:
        print("Received termination signal. Exiting.")
        sys.exit(0)


signal.signal(signal.SIGUSR1, _on_signal)
signal.signal(signal.SIGTERM, _on_signal)


def init_render(out, sframe, eframe, userange, useskip, step):
    import hou

    rnode = hou.node(out)

    # Alfred-style progress gives us per-block lines to parse.
    if rnode.parm("prerender") is not None:
        rnode.parm("prerender").set("Redshift_setLogLevel -L 5")

    def post_frame(rop_node, render_event_type, frame):
        if render_event_type == hou.ropRenderEventType.PostFrame:
            output_file = rnode.evalParm("RS_outputFileNamePrefix")
            print("ropwatch_outputfile: %s" % output_file)
            sys.stdout.flush()

    rnode.addRenderEventCallback(post_frame)

    parm_skip = rnode.parm("RS_outputSkipRendered")
    if parm_skip is not None:
        parm_skip.set(1 if useskip == "True" else 0)

    if "merge" in str(rnode.type()).lower():
        rnode.render()
        if userange == "True":
            print(
                "ropwatch_note: Out path leads to a merge node; "
                "each ROP renders its own frame range."
            )
    elif userange == "True":
        frames = list(range(int(sframe), int(eframe) + 1, int(step)))
        rnode.parm("f1").set(frames[0])
        rnode.parm("f2").set(frames[-1])
        rnode.parm("f3").set(int(step))
        for frame in frames:
            if STOP_RENDERING:
                print("Interrupt detected - stopping render after current frame.")
                break
            rnode.render(frame_range=(frame, frame))
    else:
        rnode.render(frame_range=(rnode.parm("f1").eval(), rnode.parm("f2").eval()))


if __name__ == "__main__":
    parser = argparse.ArgumentParser()
    parser.add_argument("-i", "--hip", dest="hipfile", required=True)
    parser.add_argument("-o", "--out", dest="outnode", required=True)
    parser.add_argument("-s", "--sframe", dest="startframe", required=True)
    parser.add_argument("-e", "--eframe", dest="endframe", required=True)
    parser.add_argument("-u", "--userange", dest="userange", required=True)
    parser.add_argument("-r", "--useskip", dest="useskip", required=True)
    parser.add_argument("-t", "--step", dest="step", default="1")
    args = parser.parse_args()

    hip_file = os.path.abspath(args.hipfile.strip())
    os.chdir(os.path.dirname(hip_file))

    import hou

    hou.hipFile.load(hip_file)
    init_render(
        args.outnode.strip(),
        int(args.startframe),
        int(args.endframe),
        args.userange,
        args.useskip,
        int(args.step),
    )
"#;

/// The driver script written to a temp path; removed again on drop.
#[derive(Debug)]
pub struct DriverScript {
    path: PathBuf,
}

impl DriverScript {
    pub fn write() -> RopwatchResult<Self> {
        let path = std::env::temp_dir().join(format!(
            "ropwatch_driver_{}_{}.py",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0)
        ));
        std::fs::write(&path, DRIVER_SOURCE).map_err(|e| {
            RopwatchError::spawn(format!(
                "failed to write render driver script '{}': {e}",
                path.display()
            ))
        })?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DriverScript {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_with_explicit_range() {
        let job = RenderJob::new("/shots/a.hip", "/out/Redshift_ROP1")
            .with_range(FrameRange::new(10, 19, 2).unwrap())
            .with_skip_existing(true);
        let spec = job.command(Path::new("/tmp/driver.py"));
        assert_eq!(spec.program, "hython");
        assert_eq!(
            spec.args,
            vec![
                "/tmp/driver.py",
                "-i",
                "/shots/a.hip",
                "-o",
                "/out/Redshift_ROP1",
                "-s",
                "10",
                "-e",
                "19",
                "-u",
                "True",
                "-r",
                "True",
                "-t",
                "2",
            ]
        );
    }

    #[test]
    fn command_without_range_defers_to_the_rop() {
        let job = RenderJob::new("/shots/a.hip", "/out/rs1");
        let spec = job.command(Path::new("/tmp/driver.py"));
        let args = spec.args.join(" ");
        assert!(args.contains("-u False"));
        assert!(args.contains("-r False"));
    }

    #[test]
    fn validate_rejects_empty_fields() {
        assert!(RenderJob::new("", "/out/rs1").validate().is_err());
        assert!(RenderJob::new("/shots/a.hip", "").validate().is_err());
        assert!(RenderJob::new("/shots/a.hip", "/out/rs1").validate().is_ok());
    }

    #[test]
    fn driver_script_is_written_and_removed() {
        let path = {
            let driver = DriverScript::write().unwrap();
            let source = std::fs::read_to_string(driver.path()).unwrap();
            assert!(source.contains("ropwatch_outputfile:"));
            assert!(source.contains("SIGUSR1"));
            driver.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
