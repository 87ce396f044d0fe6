//! Network maintenance - DNS flush, adapter reset sequence, ping summaries.

use crate::domain::{network_reset_steps, CapturedOutput, CommandSpec, MaintenanceCommand};
use crate::error::Result;
use crate::repositories::process::ProcessRunner;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Result of one step of the network reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub command: String,
    pub success: bool,
    pub output: String,
}

/// Run every reset step in order. A failing step is reported and the next
/// one still runs. `sink` receives the console lines as they are produced.
pub fn reset_network<F>(runner: &ProcessRunner, timeout: Duration, mut sink: F) -> Vec<StepReport>
where
    F: FnMut(&str),
{
    let steps = network_reset_steps();
    let mut reports = Vec::with_capacity(steps.len());

    for step in &steps {
        let command = step.display_line();
        sink(&format!("Running: {command}"));

        let report = match runner.capture(step, Some(timeout)) {
            Ok(captured) if captured.exit.success() => {
                sink("✓ Command completed successfully");
                if !captured.stdout.trim().is_empty() {
                    sink(captured.stdout.trim_end());
                }
                StepReport {
                    command,
                    success: true,
                    output: captured.stdout,
                }
            }
            Ok(captured) => {
                let detail = failure_detail(&captured);
                sink(&format!("✗ Command failed: {detail}"));
                StepReport {
                    command,
                    success: false,
                    output: detail,
                }
            }
            Err(e) => {
                warn!("Network reset step {} failed: {}", command, e);
                sink(&format!("✗ Command failed: {e}"));
                StepReport {
                    command,
                    success: false,
                    output: e.to_string(),
                }
            }
        };
        reports.push(report);
    }

    info!(
        failed = reports.iter().filter(|r| !r.success).count(),
        "Network reset finished"
    );
    sink("Network reset completed. You may need to restart your computer.");
    reports
}

/// Flush the DNS resolver cache.
///
/// # Errors
///
/// Returns error if elevation is missing or ipconfig cannot be started.
pub fn flush_dns(runner: &ProcessRunner) -> Result<CapturedOutput> {
    let spec: CommandSpec = MaintenanceCommand::FlushDns.to_spec();
    runner.capture(&spec, None)
}

fn failure_detail(captured: &CapturedOutput) -> String {
    let stderr = captured.stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    // netsh and ipconfig report most failures on stdout
    let stdout = captured.stdout.trim();
    if !stdout.is_empty() {
        return stdout.to_string();
    }
    match captured.exit.code {
        Some(code) => format!("exit code {code}"),
        None => "terminated".to_string(),
    }
}

/// Statistics block printed at the end of a Windows `ping` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PingSummary {
    pub sent: u32,
    pub received: u32,
    pub lost: u32,
    pub loss_percent: f32,
    pub min_ms: Option<u32>,
    pub max_ms: Option<u32>,
    pub avg_ms: Option<u32>,
}

impl PingSummary {
    /// Parse the summary from full ping output. `None` when the statistics
    /// block is absent (continuous ping stopped early, unknown host).
    pub fn parse(output: &str) -> Option<Self> {
        static PACKETS: OnceLock<Option<Regex>> = OnceLock::new();
        static TIMES: OnceLock<Option<Regex>> = OnceLock::new();

        let packets = PACKETS
            .get_or_init(|| {
                Regex::new(r"Sent = (\d+), Received = (\d+), Lost = (\d+) \((\d+)% loss\)").ok()
            })
            .as_ref()?;
        let times = TIMES
            .get_or_init(|| {
                Regex::new(r"Minimum = (\d+)ms, Maximum = (\d+)ms, Average = (\d+)ms").ok()
            })
            .as_ref()?;

        let caps = packets.captures(output)?;
        let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

        let mut summary = Self {
            sent: num(1)?,
            received: num(2)?,
            lost: num(3)?,
            loss_percent: caps.get(4)?.as_str().parse().ok()?,
            ..Self::default()
        };

        if let Some(t) = times.captures(output) {
            let ms = |i: usize| t.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
            summary.min_ms = ms(1);
            summary.max_ms = ms(2);
            summary.avg_ms = ms(3);
        }

        Some(summary)
    }

    #[must_use]
    pub const fn reachable(&self) -> bool {
        self.received > 0
    }
}
