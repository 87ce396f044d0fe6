//! Session controller - owns the per-tab invocation handles.
//!
//! The front end holds one `Session`. Starting a tool spawns the process on
//! the caller's thread, then a blocking worker drains its output and sends
//! events back over a channel. Only the owner of the session mutates slots.

use crate::domain::{CommandSpec, MaintenanceCommand, Outcome, OutputLine, Tool};
use crate::error::{MaintenanceError, Result};
use crate::repositories::process::{KillHandle, ProcessRunner};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Line(OutputLine),
    Finished(Outcome),
}

/// Enabled state of a tab's start/stop controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    pub start_enabled: bool,
    pub stop_enabled: bool,
}

impl Controls {
    const IDLE: Self = Self {
        start_enabled: true,
        stop_enabled: false,
    };
    const RUNNING: Self = Self {
        start_enabled: false,
        stop_enabled: true,
    };
}

/// A started run. Events arrive until `Finished`, then the channel closes.
#[derive(Debug)]
pub struct Invocation {
    pub tool: Tool,
    pub run_id: u64,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Invocation {
    /// Next event from the run. A worker that goes away without sending
    /// `Finished` is reported as a failure, never as a user cancel.
    pub async fn next_event(&mut self) -> SessionEvent {
        match self.events.recv().await {
            Some(event) => event,
            None => SessionEvent::Finished(Outcome::Failed(MaintenanceError::Io(
                "output worker stopped without reporting an exit status".to_string(),
            ))),
        }
    }
}

#[derive(Debug)]
struct Slot {
    run_id: u64,
    kill: KillHandle,
}

#[derive(Debug)]
pub struct Session {
    runner: ProcessRunner,
    slots: HashMap<Tool, Slot>,
    next_run_id: u64,
}

impl Session {
    #[must_use]
    pub fn new(runner: ProcessRunner) -> Self {
        Self {
            runner,
            slots: HashMap::new(),
            next_run_id: 1,
        }
    }

    #[must_use]
    pub const fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    pub fn start(&mut self, command: &MaintenanceCommand) -> Result<Invocation> {
        self.start_spec(command.tool(), &command.to_spec())
    }

    /// Start `spec` in the tab `tool`. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` when the tab is busy; otherwise any spawn failure.
    /// The tab stays idle on error.
    pub fn start_spec(&mut self, tool: Tool, spec: &CommandSpec) -> Result<Invocation> {
        if self.slots.contains_key(&tool) {
            return Err(MaintenanceError::AlreadyRunning(tool.to_string()));
        }

        let mut process = self.runner.spawn(spec)?;
        let run_id = self.next_run_id;
        self.next_run_id += 1;

        self.slots.insert(
            tool,
            Slot {
                run_id,
                kill: process.kill_handle(),
            },
        );
        info!(%tool, run_id, program = process.program(), "Invocation started");

        let (tx, events) = mpsc::unbounded_channel();
        tokio::task::spawn_blocking(move || {
            for line in process.by_ref() {
                if tx.send(SessionEvent::Line(line)).is_err() {
                    debug!(run_id, "Receiver dropped, draining output");
                }
            }
            let outcome = match process.wait() {
                Ok(exit) => Outcome::from(exit),
                Err(e) => Outcome::Failed(e),
            };
            match &outcome {
                Outcome::Cancelled => info!(%tool, run_id, "Invocation terminated by user"),
                Outcome::Failed(e) => warn!(%tool, run_id, "Invocation failed: {}", e),
                Outcome::Completed(code) => debug!(%tool, run_id, ?code, "Invocation completed"),
            }
            let _ = tx.send(SessionEvent::Finished(outcome));
        });

        Ok(Invocation {
            tool,
            run_id,
            events,
        })
    }

    /// Kill the tab's process, best effort. The tab is idle afterwards
    /// whether or not the kill succeeded. Returns false if nothing was running.
    pub fn stop(&mut self, tool: Tool) -> bool {
        match self.slots.remove(&tool) {
            Some(slot) => {
                info!(%tool, run_id = slot.run_id, "Stopping invocation");
                slot.kill.kill();
                true
            }
            None => {
                warn!(%tool, "Stop requested with nothing running");
                false
            }
        }
    }

    /// Mark `run_id` as done. Ignored if the tab has moved on to another run.
    pub fn finish(&mut self, tool: Tool, run_id: u64) {
        if self.slots.get(&tool).is_some_and(|s| s.run_id == run_id) {
            self.slots.remove(&tool);
            debug!(%tool, run_id, "Invocation finished");
        }
    }

    #[must_use]
    pub fn is_running(&self, tool: Tool) -> bool {
        self.slots.contains_key(&tool)
    }

    #[must_use]
    pub fn controls(&self, tool: Tool) -> Controls {
        if self.is_running(tool) {
            Controls::RUNNING
        } else {
            Controls::IDLE
        }
    }

    /// Kill everything still running, e.g. on shutdown.
    pub fn stop_all(&mut self) {
        let tools: Vec<Tool> = self.slots.keys().copied().collect();
        for tool in tools {
            self.stop(tool);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::elevation::Elevation;

    fn session() -> Session {
        Session::new(ProcessRunner::with_elevation(Elevation::Elevated))
    }

    async fn drain(invocation: &mut Invocation) -> (Vec<OutputLine>, Option<Outcome>) {
        let mut lines = Vec::new();
        let mut outcome = None;
        while let Some(event) = invocation.events.recv().await {
            match event {
                SessionEvent::Line(line) => lines.push(line),
                SessionEvent::Finished(o) => outcome = Some(o),
            }
        }
        (lines, outcome)
    }

    #[tokio::test]
    async fn missing_executable_fails_without_occupying_tab() {
        let mut session = session();
        let spec = CommandSpec::new("definitely-not-a-real-tool-5f3a", "/scannow");
        let err = session.start_spec(Tool::Sfc, &spec).unwrap_err();
        assert!(matches!(err, MaintenanceError::ExecutableNotFound(_)));
        assert_eq!(session.controls(Tool::Sfc), Controls::IDLE);
    }

    #[tokio::test]
    async fn chkdsk_without_drive_never_reaches_session() {
        let session = session();
        assert!(MaintenanceCommand::chkdsk(None).is_err());
        assert!(!session.is_running(Tool::Chkdsk));
    }

    #[tokio::test]
    async fn lost_worker_is_a_failure_not_a_cancel() {
        let (tx, events) = mpsc::unbounded_channel();
        let mut inv = Invocation {
            tool: Tool::Sfc,
            run_id: 1,
            events,
        };
        tx.send(SessionEvent::Line(OutputLine::stdout("Beginning system scan.")))
            .unwrap();
        drop(tx);

        assert!(matches!(inv.next_event().await, SessionEvent::Line(_)));
        assert!(matches!(
            inv.next_event().await,
            SessionEvent::Finished(Outcome::Failed(MaintenanceError::Io(_)))
        ));
    }

    #[tokio::test]
    async fn stop_without_run_is_noop() {
        let mut session = session();
        assert!(!session.stop(Tool::Ping));
        assert_eq!(session.controls(Tool::Ping), Controls::IDLE);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn completed_run_streams_lines_then_outcome() {
        let mut session = session();
        let mut inv = session
            .start_spec(Tool::Ipconfig, &CommandSpec::new("printf", "a\\nb\\n"))
            .unwrap();
        assert_eq!(session.controls(Tool::Ipconfig), Controls::RUNNING);

        let (lines, outcome) = drain(&mut inv).await;
        session.finish(inv.tool, inv.run_id);

        let texts: Vec<_> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, ["a", "b"]);
        assert_eq!(outcome, Some(Outcome::Completed(Some(0))));
        assert_eq!(session.controls(Tool::Ipconfig), Controls::IDLE);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn one_invocation_per_tab() {
        let mut session = session();
        let spec = CommandSpec::new("sleep", "30");
        let mut inv = session.start_spec(Tool::Ping, &spec).unwrap();

        assert_eq!(
            session.start_spec(Tool::Ping, &spec).unwrap_err(),
            MaintenanceError::AlreadyRunning(Tool::Ping.to_string())
        );
        // Other tabs are independent
        let mut other = session.start_spec(Tool::Tracert, &spec).unwrap();

        session.stop_all();
        assert!(matches!(drain(&mut inv).await.1, Some(Outcome::Cancelled)));
        assert!(matches!(drain(&mut other).await.1, Some(Outcome::Cancelled)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_returns_tab_to_idle_and_reports_cancel() {
        let mut session = session();
        let mut inv = session
            .start_spec(Tool::Ping, &CommandSpec::new("sleep", "30"))
            .unwrap();
        assert_eq!(session.controls(Tool::Ping), Controls::RUNNING);

        assert!(session.stop(Tool::Ping));
        assert_eq!(session.controls(Tool::Ping), Controls::IDLE);

        let (_, outcome) = drain(&mut inv).await;
        assert_eq!(outcome, Some(Outcome::Cancelled));
        // Late finish from the killed run is harmless
        session.finish(inv.tool, inv.run_id);
        assert_eq!(session.controls(Tool::Ping), Controls::IDLE);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stale_finish_does_not_clear_newer_run() {
        let mut session = session();
        let spec = CommandSpec::new("sleep", "30");
        let first = session.start_spec(Tool::Tracert, &spec).unwrap();
        session.stop(Tool::Tracert);

        let second = session.start_spec(Tool::Tracert, &spec).unwrap();
        session.finish(Tool::Tracert, first.run_id);
        assert!(session.is_running(Tool::Tracert));

        session.stop(Tool::Tracert);
        drop((first, second));
    }
}
