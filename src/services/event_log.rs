//! Event log queries through `wevtutil`, plus summaries of the results.

use crate::domain::CommandSpec;
use crate::error::{MaintenanceError, Result};
use crate::repositories::process::ProcessRunner;
use chrono::{DateTime, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

const QUERY_TIMEOUT: Duration = Duration::from_secs(60);
const MESSAGE_PREVIEW: usize = 100;

pub const COMMON_LOGS: [&str; 5] = [
    "System",
    "Application",
    "Security",
    "Setup",
    "Microsoft-Windows-PowerShell/Operational",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum EventLevel {
    Critical = 1,
    Error = 2,
    Warning = 3,
    Information = 4,
    Verbose = 5,
}

impl EventLevel {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "Critical",
            Self::Error => "Error",
            Self::Warning => "Warning",
            Self::Information => "Information",
            Self::Verbose => "Verbose",
        }
    }

    /// Level as printed by `wevtutil /f:text`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "critical" => Some(Self::Critical),
            "error" => Some(Self::Error),
            "warning" => Some(Self::Warning),
            "information" => Some(Self::Information),
            "verbose" => Some(Self::Verbose),
            _ => None,
        }
    }
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    pub log: String,
    pub level: Option<EventLevel>,
    pub hours_back: u32,
    pub max_events: u32,
}

impl EventQuery {
    pub fn new(log: impl Into<String>) -> Self {
        Self {
            log: log.into(),
            level: None,
            hours_back: 24,
            max_events: 100,
        }
    }

    #[must_use]
    pub const fn level(mut self, level: EventLevel) -> Self {
        self.level = Some(level);
        self
    }

    #[must_use]
    pub const fn hours_back(mut self, hours: u32) -> Self {
        self.hours_back = hours;
        self
    }

    #[must_use]
    pub const fn max_events(mut self, count: u32) -> Self {
        self.max_events = count;
        self
    }

    /// Newest-first `wevtutil qe` invocation. Reading the Security log
    /// needs admin rights.
    ///
    /// # Errors
    ///
    /// `MissingTarget` for an empty log name, `QueryFailed` for one that
    /// cannot be quoted.
    pub fn to_spec(&self) -> Result<CommandSpec> {
        let log = self.log.trim();
        if log.is_empty() {
            return Err(MaintenanceError::MissingTarget("event log".to_string()));
        }
        if log.contains('"') {
            return Err(MaintenanceError::QueryFailed {
                program: "wevtutil".to_string(),
                detail: format!("invalid log name: {log}"),
            });
        }

        let window_ms = u64::from(self.hours_back) * 3_600_000;
        let time = format!("TimeCreated[timediff(@SystemTime) <= {window_ms}]");
        let filter = match self.level {
            Some(level) => format!("(Level={}) and {time}", level as u8),
            None => time,
        };

        let spec = CommandSpec::new(
            "wevtutil",
            format!(
                "qe \"{log}\" /q:\"*[System[{filter}]]\" /c:{} /rd:true /f:text",
                self.max_events
            ),
        );
        Ok(if log.eq_ignore_ascii_case("Security") {
            spec.elevated()
        } else {
            spec
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventLogEntry {
    pub event_id: u32,
    pub level: Option<EventLevel>,
    pub level_name: String,
    pub log_name: String,
    pub source: String,
    pub time_created: Option<NaiveDateTime>,
    pub task: String,
    pub computer: String,
    pub user: String,
    pub message: String,
}

impl EventLogEntry {
    fn empty() -> Self {
        Self {
            event_id: 0,
            level: None,
            level_name: String::new(),
            log_name: String::new(),
            source: String::new(),
            time_created: None,
            task: String::new(),
            computer: String::new(),
            user: String::new(),
            message: String::new(),
        }
    }

    fn time_display(&self) -> String {
        self.time_created.map_or_else(
            || "unknown time".to_string(),
            |t| t.format("%Y-%m-%d %H:%M:%S").to_string(),
        )
    }

    /// `time | level | ID:n | source | message preview`
    pub fn summary_line(&self) -> String {
        let first_line = self.message.lines().next().unwrap_or_default();
        let preview: String = first_line.chars().take(MESSAGE_PREVIEW).collect();
        let ellipsis = if first_line.chars().count() > MESSAGE_PREVIEW {
            "..."
        } else {
            ""
        };
        format!(
            "{} | {} | ID:{} | {} | {preview}{ellipsis}",
            self.time_display(),
            self.level_name,
            self.event_id,
            self.source
        )
    }

    pub fn detailed(&self) -> String {
        format!(
            "Event ID: {}\nLevel: {}\nSource: {}\nTime: {}\nLog: {}\nCategory: {}\n\
             Computer: {}\nUser: {}\nMessage: {}",
            self.event_id,
            self.level_name,
            self.source,
            self.time_display(),
            self.log_name,
            self.task,
            self.computer,
            self.user,
            self.message
        )
    }
}

fn parse_time(value: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.naive_utc())
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

/// Parse `wevtutil qe ... /f:text` output.
pub fn parse_events(output: &str) -> Vec<EventLogEntry> {
    let mut events = Vec::new();
    let mut current: Option<EventLogEntry> = None;
    let mut message: Vec<&str> = Vec::new();
    let mut in_description = false;

    let mut finish = |entry: Option<EventLogEntry>, message: &mut Vec<&str>| {
        if let Some(mut entry) = entry {
            while message.last().is_some_and(|l| l.trim().is_empty()) {
                message.pop();
            }
            entry.message = message.join("\n").trim().to_string();
            events.push(entry);
        }
        message.clear();
    };

    for raw in output.lines() {
        let line = raw.trim_end_matches('\r');
        let trimmed = line.trim();

        if trimmed.starts_with("Event[") && trimmed.ends_with("]:") {
            finish(current.take(), &mut message);
            current = Some(EventLogEntry::empty());
            in_description = false;
            continue;
        }
        let Some(entry) = current.as_mut() else {
            continue;
        };

        if in_description {
            message.push(line);
            continue;
        }

        let Some((key, value)) = trimmed.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Log Name" => entry.log_name = value.to_string(),
            "Source" => entry.source = value.to_string(),
            "Date" => entry.time_created = parse_time(value),
            "Event ID" => entry.event_id = value.parse().unwrap_or(0),
            "Task" => entry.task = value.to_string(),
            "Level" => {
                entry.level = EventLevel::from_name(value);
                entry.level_name = value.to_string();
            }
            "User" => entry.user = value.to_string(),
            "Computer" => entry.computer = value.to_string(),
            "Description" => {
                in_description = true;
                if !value.is_empty() {
                    message.push(value);
                }
            }
            _ => {}
        }
    }
    finish(current.take(), &mut message);

    events
}

/// # Errors
///
/// Returns error if the query cannot be built or run, or wevtutil fails.
pub fn query_events(runner: &ProcessRunner, query: &EventQuery) -> Result<Vec<EventLogEntry>> {
    let spec = query.to_spec()?;
    let captured = runner.capture(&spec, Some(QUERY_TIMEOUT))?;

    if !captured.exit.success() {
        let detail = match captured.stderr.trim() {
            "" => format!("exit code {:?}", captured.exit.code),
            stderr => stderr.to_string(),
        };
        return Err(MaintenanceError::QueryFailed {
            program: spec.program,
            detail,
        });
    }

    let events = parse_events(&captured.stdout);
    debug!(log = %query.log, count = events.len(), "Event log query finished");
    Ok(events)
}

/// # Errors
///
/// Returns error if the query fails.
pub fn last_errors(
    runner: &ProcessRunner,
    log: &str,
    count: u32,
    hours_back: u32,
) -> Result<Vec<EventLogEntry>> {
    let query = EventQuery::new(log)
        .level(EventLevel::Error)
        .hours_back(hours_back)
        .max_events(count);
    query_events(runner, &query)
}

/// Critical events from the System and Application logs, newest first.
/// A log that cannot be read is skipped.
pub fn critical_events(runner: &ProcessRunner, hours_back: u32) -> Vec<EventLogEntry> {
    let mut events = Vec::new();
    for log in ["System", "Application"] {
        let query = EventQuery::new(log)
            .level(EventLevel::Critical)
            .hours_back(hours_back)
            .max_events(50);
        match query_events(runner, &query) {
            Ok(found) => events.extend(found),
            Err(e) => warn!("Skipping critical events from {}: {}", log, e),
        }
    }
    sort_newest_first(&mut events);
    events.truncate(50);
    events
}

fn sort_newest_first(events: &mut [EventLogEntry]) {
    events.sort_by(|a, b| b.time_created.cmp(&a.time_created));
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventStatistics {
    pub total: usize,
    pub by_level: BTreeMap<String, usize>,
    /// At most ten sources, busiest first.
    pub top_sources: Vec<(String, usize)>,
    pub earliest: Option<NaiveDateTime>,
    pub latest: Option<NaiveDateTime>,
}

impl EventStatistics {
    pub fn from_events(events: &[EventLogEntry]) -> Self {
        let mut by_level = BTreeMap::new();
        let mut sources: BTreeMap<&str, usize> = BTreeMap::new();
        for event in events {
            *by_level.entry(event.level_name.clone()).or_insert(0) += 1;
            *sources.entry(event.source.as_str()).or_insert(0) += 1;
        }

        let mut top_sources: Vec<(String, usize)> = sources
            .into_iter()
            .map(|(source, count)| (source.to_string(), count))
            .collect();
        top_sources.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_sources.truncate(10);

        let times = events.iter().filter_map(|e| e.time_created);
        Self {
            total: events.len(),
            by_level,
            top_sources,
            earliest: times.clone().min(),
            latest: times.max(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::elevation::Elevation;

    const WEVTUTIL_OUTPUT: &str = "\
Event[0]:
  Log Name: System
  Source: Service Control Manager
  Date: 2024-03-09T14:05:07.1230000Z
  Event ID: 7000
  Task: N/A
  Level: Error
  Opcode: Info
  Keyword: Classic
  User: N/A
  User Name: N/A
  Computer: DESKTOP-01
  Description:
The Print Spooler service failed to start due to the following error:
The system cannot find the file specified.

Event[1]:
  Log Name: System
  Source: Microsoft-Windows-Kernel-Power
  Date: 2024-03-08T09:00:00.0000000Z
  Event ID: 41
  Task: (63)
  Level: Critical
  User: S-1-5-18
  Computer: DESKTOP-01
  Description:
The system has rebooted without cleanly shutting down first.
";

    #[test]
    fn parses_text_format() {
        let events = parse_events(WEVTUTIL_OUTPUT);
        assert_eq!(events.len(), 2);

        let first = &events[0];
        assert_eq!(first.event_id, 7000);
        assert_eq!(first.level, Some(EventLevel::Error));
        assert_eq!(first.source, "Service Control Manager");
        assert_eq!(first.computer, "DESKTOP-01");
        assert_eq!(
            first.time_created.unwrap().format("%Y-%m-%d %H:%M:%S").to_string(),
            "2024-03-09 14:05:07"
        );
        assert_eq!(
            first.message,
            "The Print Spooler service failed to start due to the following error:\n\
             The system cannot find the file specified."
        );

        assert_eq!(events[1].level, Some(EventLevel::Critical));
        assert_eq!(events[1].user, "S-1-5-18");
    }

    #[test]
    fn empty_output_has_no_events() {
        assert!(parse_events("").is_empty());
        assert!(parse_events("No events were found.\n").is_empty());
    }

    #[test]
    fn query_filters_by_level_and_window() {
        let spec = EventQuery::new("System")
            .level(EventLevel::Error)
            .hours_back(2)
            .max_events(10)
            .to_spec()
            .unwrap();
        assert_eq!(spec.program, "wevtutil");
        assert_eq!(
            spec.arguments,
            "qe \"System\" /q:\"*[System[(Level=2) and TimeCreated[timediff(@SystemTime) <= 7200000]]]\" /c:10 /rd:true /f:text"
        );
        assert!(!spec.requires_elevation);
    }

    #[test]
    fn security_log_needs_elevation() {
        let spec = EventQuery::new("Security").to_spec().unwrap();
        assert!(spec.requires_elevation);

        let runner = ProcessRunner::with_elevation(Elevation::Limited);
        assert_eq!(
            query_events(&runner, &EventQuery::new("Security")).unwrap_err(),
            MaintenanceError::ElevationRequired("wevtutil".into())
        );
    }

    #[test]
    fn bad_log_names_are_rejected() {
        assert!(matches!(
            EventQuery::new("  ").to_spec(),
            Err(MaintenanceError::MissingTarget(_))
        ));
        assert!(matches!(
            EventQuery::new("System\" /c:1").to_spec(),
            Err(MaintenanceError::QueryFailed { .. })
        ));
    }

    #[test]
    fn statistics_count_levels_and_sources() {
        let stats = EventStatistics::from_events(&parse_events(WEVTUTIL_OUTPUT));
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_level.get("Error"), Some(&1));
        assert_eq!(stats.by_level.get("Critical"), Some(&1));
        assert_eq!(stats.top_sources.len(), 2);
        assert!(stats.earliest < stats.latest);
    }

    #[test]
    fn newest_events_first() {
        let mut events = parse_events(WEVTUTIL_OUTPUT);
        events.reverse();
        sort_newest_first(&mut events);
        assert_eq!(events[0].event_id, 7000);
    }

    #[test]
    fn summary_line_truncates_message() {
        let mut event = parse_events(WEVTUTIL_OUTPUT).remove(1);
        event.message = "x".repeat(150);
        let line = event.summary_line();
        assert!(line.starts_with("2024-03-08 09:00:00 | Critical | ID:41 | Microsoft-Windows-Kernel-Power | "));
        assert!(line.ends_with(&format!("{}...", "x".repeat(100))));
    }
}
