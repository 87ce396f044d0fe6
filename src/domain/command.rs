//! Maintenance command catalog - fixed argument templates per tool.

use crate::error::{MaintenanceError, Result};
use serde::Serialize;
use std::fmt;

/// One tool tab. At most one tracked invocation per tab runs at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Tool {
    Sfc,
    Chkdsk,
    Dism,
    Ping,
    Tracert,
    Ipconfig,
    Netstat,
    Network,
    Registry,
    Services,
    EventLog,
    Firewall,
}

impl Tool {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sfc => "System File Checker",
            Self::Chkdsk => "Disk Check",
            Self::Dism => "DISM",
            Self::Ping => "Ping",
            Self::Tracert => "Traceroute",
            Self::Ipconfig => "IP Configuration",
            Self::Netstat => "Network Statistics",
            Self::Network => "Network Maintenance",
            Self::Registry => "Registry",
            Self::Services => "Services",
            Self::EventLog => "Event Logs",
            Self::Firewall => "Firewall",
        }
    }

    /// Prefix used for exported log file names.
    #[must_use]
    pub const fn log_prefix(&self) -> &'static str {
        match self {
            Self::Sfc => "sfc_log",
            Self::Chkdsk => "chkdsk_log",
            Self::Dism => "dism_log",
            Self::Ping | Self::Tracert | Self::Ipconfig | Self::Netstat | Self::Network => {
                "network_log"
            }
            Self::Registry => "registry_log",
            Self::Services => "services_log",
            Self::EventLog => "event_log",
            Self::Firewall => "firewall_log",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A program plus its argument string. The argument string is passed through
/// untouched; callers own quoting and injection safety.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSpec {
    pub program: String,
    pub arguments: String,
    pub requires_elevation: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            arguments: arguments.into(),
            requires_elevation: false,
        }
    }

    #[must_use]
    pub fn elevated(mut self) -> Self {
        self.requires_elevation = true;
        self
    }

    /// Command line as shown in the console.
    pub fn display_line(&self) -> String {
        if self.arguments.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.arguments)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DismOperation {
    CheckHealth,
    ScanHealth,
    RestoreHealth,
    StartComponentCleanup,
    AnalyzeComponentStore,
}

impl DismOperation {
    #[must_use]
    pub const fn switch(&self) -> &'static str {
        match self {
            Self::CheckHealth => "/checkhealth",
            Self::ScanHealth => "/scanhealth",
            Self::RestoreHealth => "/restorehealth",
            Self::StartComponentCleanup => "/startcomponentcleanup",
            Self::AnalyzeComponentStore => "/analyzecomponentstore",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DismOptions {
    pub operation: DismOperation,
    /// Repair source for `/restorehealth`.
    pub source: Option<String>,
    pub limit_access: bool,
    /// `/resetbase` for component cleanup.
    pub reset_base: bool,
}

impl DismOptions {
    #[must_use]
    pub const fn new(operation: DismOperation) -> Self {
        Self {
            operation,
            source: None,
            limit_access: false,
            reset_base: false,
        }
    }
}

/// Every maintenance command the front end can start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MaintenanceCommand {
    Sfc,
    Chkdsk { drive: String },
    Dism(DismOptions),
    Ping { target: String, count: Option<u32> },
    Tracert { target: String },
    Ipconfig,
    Netstat,
    FlushDns,
}

impl MaintenanceCommand {
    /// Build a CHKDSK command. Rejected before anything is spawned when no
    /// drive is selected or the selection is not a drive letter.
    pub fn chkdsk(drive: Option<&str>) -> Result<Self> {
        let drive = drive
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or(MaintenanceError::NoDriveSelected)?;
        Ok(Self::Chkdsk {
            drive: normalize_drive(drive)?,
        })
    }

    /// `count == None` pings until stopped.
    pub fn ping(target: &str, count: Option<u32>) -> Result<Self> {
        Ok(Self::Ping {
            target: require_target(target, "ping")?,
            count,
        })
    }

    pub fn tracert(target: &str) -> Result<Self> {
        Ok(Self::Tracert {
            target: require_target(target, "traceroute")?,
        })
    }

    #[must_use]
    pub const fn tool(&self) -> Tool {
        match self {
            Self::Sfc => Tool::Sfc,
            Self::Chkdsk { .. } => Tool::Chkdsk,
            Self::Dism(_) => Tool::Dism,
            Self::Ping { .. } => Tool::Ping,
            Self::Tracert { .. } => Tool::Tracert,
            Self::Ipconfig => Tool::Ipconfig,
            Self::Netstat => Tool::Netstat,
            Self::FlushDns => Tool::Network,
        }
    }

    pub fn to_spec(&self) -> CommandSpec {
        match self {
            Self::Sfc => CommandSpec::new("sfc", "/scannow").elevated(),
            Self::Chkdsk { drive } => CommandSpec::new("chkdsk", format!("{drive} /f /r")).elevated(),
            Self::Dism(options) => CommandSpec::new("dism", dism_arguments(options)).elevated(),
            Self::Ping {
                target,
                count: Some(n),
            } => CommandSpec::new("ping", format!("-n {n} {target}")),
            Self::Ping {
                target,
                count: None,
            } => CommandSpec::new("ping", format!("-t {target}")),
            Self::Tracert { target } => CommandSpec::new("tracert", target.as_str()),
            Self::Ipconfig => CommandSpec::new("ipconfig", "/all"),
            Self::Netstat => CommandSpec::new("netstat", "-an"),
            Self::FlushDns => CommandSpec::new("ipconfig", "/flushdns").elevated(),
        }
    }
}

/// Steps of the network reset, in execution order.
pub fn network_reset_steps() -> Vec<CommandSpec> {
    [
        ("netsh", "winsock reset"),
        ("netsh", "int ip reset"),
        ("ipconfig", "/release"),
        ("ipconfig", "/renew"),
        ("ipconfig", "/flushdns"),
    ]
    .into_iter()
    .map(|(program, args)| CommandSpec::new(program, args).elevated())
    .collect()
}

fn dism_arguments(options: &DismOptions) -> String {
    let mut args = vec!["/online", "/cleanup-image", options.operation.switch()];

    match options.operation {
        DismOperation::RestoreHealth => {
            if let Some(source) = options.source.as_deref() {
                args.push("/source");
                args.push(source);
            }
            if options.limit_access {
                args.push("/limitaccess");
            }
        }
        DismOperation::StartComponentCleanup if options.reset_base => args.push("/resetbase"),
        _ => {}
    }

    args.join(" ")
}

fn normalize_drive(drive: &str) -> Result<String> {
    let trimmed = drive.trim_end_matches('\\');
    let mut chars = trimmed.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(letter), Some(':'), None) if letter.is_ascii_alphabetic() => {
            Ok(format!("{}:", letter.to_ascii_uppercase()))
        }
        (Some(letter), None, None) if letter.is_ascii_alphabetic() => {
            Ok(format!("{}:", letter.to_ascii_uppercase()))
        }
        _ => Err(MaintenanceError::InvalidDrive(drive.to_string())),
    }
}

fn require_target(target: &str, what: &str) -> Result<String> {
    let target = target.trim();
    if target.is_empty() {
        return Err(MaintenanceError::MissingTarget(what.to_string()));
    }
    Ok(target.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chkdsk_without_drive_is_rejected() {
        assert_eq!(
            MaintenanceCommand::chkdsk(None),
            Err(MaintenanceError::NoDriveSelected)
        );
        assert_eq!(
            MaintenanceCommand::chkdsk(Some("  ")),
            Err(MaintenanceError::NoDriveSelected)
        );
    }

    #[test]
    fn chkdsk_normalizes_drive_letter() {
        let cmd = MaintenanceCommand::chkdsk(Some("d:\\")).unwrap();
        let spec = cmd.to_spec();
        assert_eq!(spec.program, "chkdsk");
        assert_eq!(spec.arguments, "D: /f /r");
        assert!(spec.requires_elevation);
    }

    #[test]
    fn chkdsk_rejects_non_drive_input() {
        assert!(matches!(
            MaintenanceCommand::chkdsk(Some("C: & del *")),
            Err(MaintenanceError::InvalidDrive(_))
        ));
    }

    #[test]
    fn dism_restore_health_with_source() {
        let mut options = DismOptions::new(DismOperation::RestoreHealth);
        options.source = Some("wim:D:\\sources\\install.wim:1".into());
        options.limit_access = true;
        let spec = MaintenanceCommand::Dism(options).to_spec();
        assert_eq!(
            spec.arguments,
            "/online /cleanup-image /restorehealth /source wim:D:\\sources\\install.wim:1 /limitaccess"
        );
    }

    #[test]
    fn reset_base_only_applies_to_component_cleanup() {
        let mut options = DismOptions::new(DismOperation::CheckHealth);
        options.reset_base = true;
        assert_eq!(
            MaintenanceCommand::Dism(options).to_spec().arguments,
            "/online /cleanup-image /checkhealth"
        );
    }

    #[test]
    fn ping_count_and_continuous() {
        let spec = MaintenanceCommand::ping("example.com", Some(4)).unwrap().to_spec();
        assert_eq!(spec.display_line(), "ping -n 4 example.com");
        assert!(!spec.requires_elevation);

        let spec = MaintenanceCommand::ping("example.com", None).unwrap().to_spec();
        assert_eq!(spec.arguments, "-t example.com");
    }

    #[test]
    fn empty_target_is_rejected() {
        assert_eq!(
            MaintenanceCommand::tracert(" "),
            Err(MaintenanceError::MissingTarget("traceroute".into()))
        );
    }

    #[test]
    fn export_prefix_per_tab() {
        assert_eq!(Tool::Sfc.log_prefix(), "sfc_log");
        assert_eq!(Tool::Tracert.log_prefix(), "network_log");
        assert_eq!(Tool::Registry.log_prefix(), "registry_log");
        assert_eq!(Tool::EventLog.log_prefix(), "event_log");
    }

    #[test]
    fn reset_sequence_order() {
        let steps: Vec<String> = network_reset_steps()
            .iter()
            .map(CommandSpec::display_line)
            .collect();
        assert_eq!(
            steps,
            [
                "netsh winsock reset",
                "netsh int ip reset",
                "ipconfig /release",
                "ipconfig /renew",
                "ipconfig /flushdns"
            ]
        );
    }
}
