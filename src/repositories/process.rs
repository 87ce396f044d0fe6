//! Process runner - spawns maintenance tools and relays their output.

use crate::domain::{CapturedOutput, CommandSpec, OutputLine, ProcessExit, Stream};
use crate::error::{MaintenanceError, Result};
use crate::repositories::elevation::Elevation;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;
#[cfg(windows)]
const ERROR_ELEVATION_REQUIRED: i32 = 740;

/// Launches tools after checking the elevation they need.
#[derive(Debug, Clone, Copy)]
pub struct ProcessRunner {
    elevation: Elevation,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    /// Runner bound to the privilege level of the current process.
    #[must_use]
    pub fn new() -> Self {
        Self::with_elevation(Elevation::current())
    }

    #[must_use]
    pub const fn with_elevation(elevation: Elevation) -> Self {
        Self { elevation }
    }

    #[must_use]
    pub const fn elevation(&self) -> Elevation {
        self.elevation
    }

    /// Can `spec` be started with the rights this process holds?
    ///
    /// # Errors
    ///
    /// `ElevationRequired` when the command needs admin rights we lack.
    pub fn check_capability(&self, spec: &CommandSpec) -> Result<()> {
        if spec.requires_elevation && !self.elevation.is_elevated() {
            return Err(MaintenanceError::ElevationRequired(spec.program.clone()));
        }
        Ok(())
    }

    /// Spawn `spec` with piped output. Lines are available by iterating the
    /// returned process; call [`RunningProcess::wait`] afterwards.
    ///
    /// # Errors
    ///
    /// Returns error if elevation is missing or the process cannot be started.
    #[instrument(skip(self), fields(program = %spec.program))]
    pub fn spawn(&self, spec: &CommandSpec) -> Result<RunningProcess> {
        self.check_capability(spec)?;

        let mut child = build_command(spec)
            .spawn()
            .map_err(|e| spawn_error(&spec.program, &e))?;
        info!(pid = child.id(), "Started {}", spec.display_line());

        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(pump_lines(stdout, Stream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(pump_lines(stderr, Stream::Stderr, tx));
        }

        Ok(RunningProcess {
            program: spec.program.clone(),
            lines: rx,
            readers,
            child: Arc::new(Mutex::new(child)),
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Run to completion, forwarding each line to the matching callback.
    ///
    /// # Errors
    ///
    /// Returns error if the process cannot be started or waited on.
    pub fn run<O, E>(&self, spec: &CommandSpec, mut on_stdout: O, mut on_stderr: E) -> Result<ProcessExit>
    where
        O: FnMut(&str),
        E: FnMut(&str),
    {
        let mut process = self.spawn(spec)?;
        for line in process.by_ref() {
            match line.stream {
                Stream::Stdout => on_stdout(&line.text),
                Stream::Stderr => on_stderr(&line.text),
            }
        }
        process.wait()
    }

    /// Run silently and collect all output. With a timeout the child is killed
    /// once it expires.
    ///
    /// # Errors
    ///
    /// Returns error if the process cannot be started or exceeds `timeout`.
    pub fn capture(&self, spec: &CommandSpec, timeout: Option<Duration>) -> Result<CapturedOutput> {
        let mut process = self.spawn(spec)?;
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut stdout = String::new();
        let mut stderr = String::new();

        loop {
            let next = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match process.lines.recv_timeout(remaining) {
                        Ok(line) => Some(line),
                        Err(mpsc::RecvTimeoutError::Disconnected) => None,
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            process.kill_handle().kill();
                            let _ = process.wait();
                            let secs = timeout.map_or(0, |t| t.as_secs());
                            warn!("{} timed out after {}s", spec.program, secs);
                            return Err(MaintenanceError::TimedOut {
                                program: spec.program.clone(),
                                secs,
                            });
                        }
                    }
                }
                None => process.next(),
            };

            let Some(line) = next else { break };
            let buf = match line.stream {
                Stream::Stdout => &mut stdout,
                Stream::Stderr => &mut stderr,
            };
            buf.push_str(&line.text);
            buf.push('\n');
        }

        let exit = process.wait()?;
        Ok(CapturedOutput {
            exit,
            stdout,
            stderr,
        })
    }
}

fn build_command(spec: &CommandSpec) -> Command {
    let mut cmd = Command::new(&spec.program);

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        if !spec.arguments.is_empty() {
            cmd.raw_arg(&spec.arguments);
        }
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    #[cfg(not(windows))]
    cmd.args(spec.arguments.split_whitespace());

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

fn spawn_error(program: &str, e: &std::io::Error) -> MaintenanceError {
    warn!("Failed to start {}: {}", program, e);

    #[cfg(windows)]
    if e.raw_os_error() == Some(ERROR_ELEVATION_REQUIRED) {
        return MaintenanceError::ElevationRequired(program.to_string());
    }

    if e.kind() == std::io::ErrorKind::NotFound {
        MaintenanceError::ExecutableNotFound(program.to_string())
    } else {
        MaintenanceError::SpawnFailed {
            program: program.to_string(),
            reason: e.to_string(),
        }
    }
}

fn pump_lines<R>(source: R, stream: Stream, tx: mpsc::Sender<OutputLine>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    if let Some(text) = decode_line(&buf) {
                        if tx.send(OutputLine { stream, text }).is_err() {
                            break;
                        }
                    }
                }
                Err(e) => {
                    debug!("{:?} pipe closed: {}", stream, e);
                    break;
                }
            }
        }
    })
}

/// Lossy decode; drops NULs (sfc writes UTF-16 into pipes) and blank lines.
fn decode_line(raw: &[u8]) -> Option<String> {
    let text: String = String::from_utf8_lossy(raw)
        .chars()
        .filter(|c| *c != '\0')
        .collect();
    let text = text.trim_end_matches(['\r', '\n']);
    if text.trim().is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn lock(child: &Mutex<Child>) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A spawned tool. Iterating yields its output lines until both pipes close.
#[derive(Debug)]
pub struct RunningProcess {
    program: String,
    lines: mpsc::Receiver<OutputLine>,
    readers: Vec<JoinHandle<()>>,
    child: Arc<Mutex<Child>>,
    cancelled: Arc<AtomicBool>,
}

impl RunningProcess {
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn kill_handle(&self) -> KillHandle {
        KillHandle {
            child: Arc::clone(&self.child),
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    /// Block until the process exits.
    ///
    /// # Errors
    ///
    /// Returns error if the OS cannot report the exit status.
    pub fn wait(self) -> Result<ProcessExit> {
        let Self {
            program,
            lines: _lines,
            readers,
            child,
            cancelled,
        } = self;
        // Readers run to EOF; the receiver stays alive so they never block
        for reader in readers {
            let _ = reader.join();
        }

        let status = loop {
            if let Some(status) = lock(&child).try_wait()? {
                break status;
            }
            thread::sleep(POLL_INTERVAL);
        };

        let exit = ProcessExit {
            code: status.code(),
            cancelled: cancelled.load(Ordering::SeqCst),
        };
        info!(code = ?exit.code, cancelled = exit.cancelled, "{} exited", program);
        Ok(exit)
    }
}

impl Iterator for RunningProcess {
    type Item = OutputLine;

    fn next(&mut self) -> Option<OutputLine> {
        self.lines.recv().ok()
    }
}

/// Cloneable, best-effort cancellation for a running process.
#[derive(Debug, Clone)]
pub struct KillHandle {
    child: Arc<Mutex<Child>>,
    cancelled: Arc<AtomicBool>,
}

impl KillHandle {
    /// Kill the process if it is still alive. A process that already exited
    /// on its own keeps its real exit status and is not marked cancelled.
    pub fn kill(&self) {
        let mut child = lock(&self.child);
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid = child.id(), ?status, "kill skipped, process already exited");
                return;
            }
            Ok(None) => {}
            Err(e) => debug!("try_wait before kill failed: {}", e),
        }
        match child.kill() {
            Ok(()) => {
                self.cancelled.store(true, Ordering::SeqCst);
                info!(pid = child.id(), "Process killed");
            }
            Err(e) => debug!("kill ignored: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> ProcessRunner {
        ProcessRunner::with_elevation(Elevation::Elevated)
    }

    #[test]
    fn missing_executable_is_reported() {
        let spec = CommandSpec::new("definitely-not-a-real-tool-5f3a", "/scannow");
        let err = runner().run(&spec, |_| {}, |_| {}).unwrap_err();
        assert_eq!(
            err,
            MaintenanceError::ExecutableNotFound("definitely-not-a-real-tool-5f3a".into())
        );
    }

    #[test]
    fn elevation_is_checked_before_spawn() {
        let limited = ProcessRunner::with_elevation(Elevation::Limited);
        // Would be ExecutableNotFound if a spawn were attempted
        let spec = CommandSpec::new("definitely-not-a-real-tool-5f3a", "").elevated();
        assert_eq!(
            limited.spawn(&spec).unwrap_err(),
            MaintenanceError::ElevationRequired("definitely-not-a-real-tool-5f3a".into())
        );
        assert!(limited
            .check_capability(&CommandSpec::new("ping", "-n 1 localhost"))
            .is_ok());
    }

    #[test]
    fn decode_strips_terminators_nuls_and_blanks() {
        assert_eq!(decode_line(b"hello\r\n").as_deref(), Some("hello"));
        assert_eq!(decode_line(b"V\0e\0r\0\r\0\n").as_deref(), Some("Ver"));
        assert_eq!(decode_line(b"   \r\n"), None);
    }

    #[cfg(unix)]
    #[test]
    fn streams_stdout_and_stderr_separately() {
        // ${IFS} keeps the script a single whitespace-free argument
        let spec = CommandSpec::new("sh", "-c echo${IFS}one;echo${IFS}two;echo${IFS}oops>&2");
        let mut out = Vec::new();
        let mut err = Vec::new();
        let exit = runner()
            .run(&spec, |l| out.push(l.to_string()), |l| err.push(l.to_string()))
            .unwrap();
        assert!(exit.success());
        assert_eq!(out, ["one", "two"]);
        assert_eq!(err, ["oops"]);
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_code_is_returned() {
        let exit = runner()
            .run(&CommandSpec::new("false", ""), |_| {}, |_| {})
            .unwrap();
        assert_eq!(exit.code, Some(1));
        assert!(!exit.success());
    }

    #[cfg(unix)]
    #[test]
    fn kill_marks_exit_as_cancelled() {
        let process = runner().spawn(&CommandSpec::new("sleep", "30")).unwrap();
        let handle = process.kill_handle();
        handle.kill();
        // Second kill after exit is swallowed
        handle.kill();
        let exit = process.wait().unwrap();
        assert!(exit.cancelled);
        assert!(!exit.success());
    }

    #[cfg(unix)]
    #[test]
    fn kill_after_natural_exit_keeps_real_status() {
        let process = runner().spawn(&CommandSpec::new("true", "")).unwrap();
        thread::sleep(Duration::from_millis(300));
        process.kill_handle().kill();
        let exit = process.wait().unwrap();
        assert!(!exit.cancelled);
        assert_eq!(exit.code, Some(0));
    }

    #[cfg(unix)]
    #[test]
    fn capture_times_out_and_kills() {
        let err = runner()
            .capture(
                &CommandSpec::new("sleep", "30"),
                Some(Duration::from_millis(100)),
            )
            .unwrap_err();
        assert_eq!(
            err,
            MaintenanceError::TimedOut {
                program: "sleep".into(),
                secs: 0
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn capture_collects_output() {
        let captured = runner()
            .capture(&CommandSpec::new("echo", "hello world"), None)
            .unwrap();
        assert!(captured.exit.success());
        assert_eq!(captured.stdout, "hello world\n");
    }

    #[cfg(windows)]
    #[test]
    fn runs_cmd_echo() {
        let mut out = Vec::new();
        let exit = runner()
            .run(&CommandSpec::new("cmd", "/C echo hello"), |l| out.push(l.to_string()), |_| {})
            .unwrap();
        assert!(exit.success());
        assert_eq!(out, ["hello"]);
    }
}
