//! Render subprocess lifecycle and non-blocking log line extraction.
//!
//! The child runs in its own process group so one signal reaches any
//! children it spawns. Interruption is two-phase and sticky: the first
//! `interrupt` sends the graceful-stop signal, any further call escalates to
//! an unconditional kill.

use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use crate::error::{RopwatchError, RopwatchResult};

/// A fully resolved command line for the render backend.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// The command as a displayable shell-style string.
    pub fn display_line(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Lifecycle phase of the supervised process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessPhase {
    Running,
    /// Graceful stop requested; draining until the current frame finishes.
    Interrupting,
    Killed,
}

const PHASE_RUNNING: u8 = 0;
const PHASE_INTERRUPTING: u8 = 1;
const PHASE_KILLED: u8 = 2;

/// A spawned render process. Shared between the control thread (interrupt,
/// kill) and the monitor thread (exit polling), hence the atomic phase and
/// the mutex around the child handle.
#[derive(Debug)]
pub struct RenderProcess {
    child: Mutex<Child>,
    pid: u32,
    phase: AtomicU8,
}

/// Spawn the render command with captured output, returning the process
/// handle and the line reader over its combined stdout/stderr.
pub fn spawn_render(spec: &CommandSpec) -> RopwatchResult<(RenderProcess, LineReader)> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &spec.current_dir {
        cmd.current_dir(dir);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt as _;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn().map_err(|e| {
        RopwatchError::spawn(format!(
            "failed to launch '{}' (is it installed and on PATH?): {e}",
            spec.program
        ))
    })?;

    let stdout = child.stdout.take().ok_or_else(|| {
        RopwatchError::spawn("failed to capture render process stdout (unexpected)")
    })?;
    let stderr = child.stderr.take().ok_or_else(|| {
        RopwatchError::spawn("failed to capture render process stderr (unexpected)")
    })?;
    let reader = LineReader::start(stdout, stderr);

    let pid = child.id();
    tracing::debug!(pid, program = %spec.program, "render process spawned");

    Ok((
        RenderProcess {
            child: Mutex::new(child),
            pid,
            phase: AtomicU8::new(PHASE_RUNNING),
        },
        reader,
    ))
}

impl RenderProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn phase(&self) -> ProcessPhase {
        match self.phase.load(Ordering::SeqCst) {
            PHASE_RUNNING => ProcessPhase::Running,
            PHASE_INTERRUPTING => ProcessPhase::Interrupting,
            _ => ProcessPhase::Killed,
        }
    }

    /// Request a graceful stop: the renderer finishes its current frame and
    /// exits. Idempotent in effect; a second call while already
    /// interrupting escalates to [`RenderProcess::kill`].
    pub fn interrupt(&self) -> ProcessPhase {
        match self.phase.compare_exchange(
            PHASE_RUNNING,
            PHASE_INTERRUPTING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {
                self.send_graceful_signal();
                ProcessPhase::Interrupting
            }
            Err(_) => {
                self.kill();
                ProcessPhase::Killed
            }
        }
    }

    /// Unconditional termination of the whole process group, then a blocking
    /// wait for the exit. No-ops quietly if the process is already gone.
    pub fn kill(&self) {
        self.phase.store(PHASE_KILLED, Ordering::SeqCst);
        self.send_kill_signal();
        if let Ok(mut child) = self.child.lock() {
            let _ = child.wait();
        }
    }

    pub fn is_running(&self) -> bool {
        self.poll_exit().is_none()
    }

    /// Poll for exit up to `timeout`; `None` when the process is still
    /// running after that.
    pub fn wait_exit(&self, timeout: Duration) -> Option<ExitStatus> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Some(status) = self.poll_exit() {
                return Some(status);
            }
            if std::time::Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(25));
        }
    }

    /// Non-blocking exit check; the status is cached once reaped.
    pub fn poll_exit(&self) -> Option<ExitStatus> {
        let mut child = self.child.lock().ok()?;
        match child.try_wait() {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(pid = self.pid, "exit poll failed: {e}");
                None
            }
        }
    }

    #[cfg(unix)]
    fn send_graceful_signal(&self) {
        // SIGUSR1 is the stop-after-current-frame protocol with the render
        // driver; fall back to terminating the group when it cannot be
        // delivered.
        if let Err(e) = signal_pid(self.pid, libc::SIGUSR1) {
            tracing::warn!(pid = self.pid, "SIGUSR1 failed ({e}), sending SIGTERM to group");
            let _ = signal_group(self.pid, libc::SIGTERM);
        }
    }

    #[cfg(not(unix))]
    fn send_graceful_signal(&self) {
        // No per-signal protocol on this platform; the kill escalation path
        // is the only stop mechanism.
    }

    #[cfg(unix)]
    fn send_kill_signal(&self) {
        let _ = signal_group(self.pid, libc::SIGKILL);
    }

    #[cfg(not(unix))]
    fn send_kill_signal(&self) {
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
        }
    }
}

#[cfg(unix)]
fn signal_pid(pid: u32, signal: libc::c_int) -> std::io::Result<()> {
    // Process lookup failures are expected when the child already exited.
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) -> std::io::Result<()> {
    // The child was spawned with process_group(0), so its pid is the pgid.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Outcome of one bounded line read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadLine {
    /// One raw line, without the trailing newline.
    Line(Vec<u8>),
    /// Nothing arrived within the timeout; the caller should re-poll.
    Timeout,
    /// Both output streams reached end-of-file; no more data will come.
    Closed,
}

/// Bounded-timeout line source over the child's combined stdout/stderr.
///
/// Two pump threads push whole lines into one channel, so interleaving
/// happens at line granularity and `read_line` never blocks past its
/// timeout.
#[derive(Debug)]
pub struct LineReader {
    rx: Receiver<Vec<u8>>,
}

impl LineReader {
    fn start(stdout: impl Read + Send + 'static, stderr: impl Read + Send + 'static) -> Self {
        let (tx, rx) = mpsc::channel();
        spawn_pump(stdout, tx.clone());
        spawn_pump(stderr, tx);
        Self { rx }
    }

    pub fn read_line(&self, timeout: Duration) -> ReadLine {
        match self.rx.recv_timeout(timeout) {
            Ok(line) => ReadLine::Line(line),
            Err(RecvTimeoutError::Timeout) => ReadLine::Timeout,
            Err(RecvTimeoutError::Disconnected) => ReadLine::Closed,
        }
    }
}

fn spawn_pump(stream: impl Read + Send + 'static, tx: Sender<Vec<u8>>) {
    std::thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    while buf.last() == Some(&b'\n') || buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                    if tx.send(buf.clone()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!("log pump read error: {e}");
                    break;
                }
            }
        }
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").arg("-c").arg(script)
    }

    fn read_all_lines(reader: &LineReader) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            match reader.read_line(Duration::from_secs(5)) {
                ReadLine::Line(raw) => lines.push(String::from_utf8_lossy(&raw).to_string()),
                ReadLine::Timeout => continue,
                ReadLine::Closed => break,
            }
        }
        lines
    }

    #[test]
    fn reads_stdout_and_stderr_lines_until_closed() {
        let (process, reader) = spawn_render(&sh("echo out; echo err >&2")).unwrap();
        let lines = read_all_lines(&reader);
        assert_eq!(lines.len(), 2);
        assert!(lines.contains(&"out".to_string()));
        assert!(lines.contains(&"err".to_string()));

        // Stream close implies exit shortly after.
        let mut status = process.poll_exit();
        for _ in 0..50 {
            if status.is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
            status = process.poll_exit();
        }
        assert!(status.is_some_and(|s| s.success()));
    }

    #[test]
    fn read_line_times_out_without_data() {
        let (process, reader) = spawn_render(&sh("sleep 5")).unwrap();
        assert_eq!(reader.read_line(Duration::from_millis(50)), ReadLine::Timeout);
        process.kill();
        assert!(!process.is_running());
    }

    #[test]
    fn kill_terminates_and_reports_no_exit_code() {
        let (process, reader) = spawn_render(&sh("sleep 30")).unwrap();
        assert!(process.is_running());
        process.kill();
        assert_eq!(process.phase(), ProcessPhase::Killed);
        assert!(!process.is_running());
        // Killed by signal: no conventional exit code.
        assert_eq!(process.poll_exit().and_then(|s| s.code()), None);
        // Pipes close promptly after the kill.
        let _ = read_all_lines(&reader);
    }

    #[test]
    fn second_interrupt_escalates_to_kill() {
        let (process, _reader) = spawn_render(&sh("sleep 30")).unwrap();
        assert_eq!(process.interrupt(), ProcessPhase::Interrupting);
        assert_eq!(process.interrupt(), ProcessPhase::Killed);
        assert!(!process.is_running());
    }

    #[test]
    fn spawn_failure_is_a_spawn_error() {
        let err = spawn_render(&CommandSpec::new("definitely-not-a-real-binary-xyz"))
            .err()
            .expect("spawn must fail");
        assert!(err.to_string().contains("spawn error:"));
    }
}
