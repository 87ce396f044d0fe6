//! Windows Firewall status and rule control through `netsh advfirewall`.

use crate::domain::CommandSpec;
use crate::error::{MaintenanceError, Result};
use crate::repositories::process::ProcessRunner;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{info, instrument};

const NETSH: &str = "netsh";
const SHOW_TIMEOUT: Duration = Duration::from_secs(60);
const CHANGE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FirewallProfile {
    Domain,
    Private,
    Public,
}

impl FirewallProfile {
    pub const ALL: [Self; 3] = [Self::Domain, Self::Private, Self::Public];

    #[must_use]
    pub const fn as_arg(&self) -> &'static str {
        match self {
            Self::Domain => "domainprofile",
            Self::Private => "privateprofile",
            Self::Public => "publicprofile",
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Domain => "Domain",
            Self::Private => "Private",
            Self::Public => "Public",
        }
    }
}

impl fmt::Display for FirewallProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileStatus {
    pub profile: FirewallProfile,
    pub enabled: bool,
    /// Dropped connections are written to the firewall log.
    pub logs_dropped: bool,
    /// e.g. `BlockInbound`
    pub inbound: String,
    /// e.g. `AllowOutbound`
    pub outbound: String,
}

impl ProfileStatus {
    fn new(profile: FirewallProfile) -> Self {
        Self {
            profile,
            enabled: false,
            logs_dropped: false,
            inbound: String::new(),
            outbound: String::new(),
        }
    }
}

/// Parse `netsh advfirewall show allprofiles`.
pub fn parse_status(output: &str) -> Vec<ProfileStatus> {
    let mut profiles: Vec<ProfileStatus> = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if let Some(profile) = FirewallProfile::ALL
            .into_iter()
            .find(|p| line.starts_with(&format!("{} Profile Settings", p.as_str())))
        {
            profiles.push(ProfileStatus::new(profile));
            continue;
        }
        let Some(current) = profiles.last_mut() else {
            continue;
        };

        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("State") => {
                current.enabled = parts.next().is_some_and(|v| v.eq_ignore_ascii_case("on"));
            }
            Some("Firewall") if parts.next() == Some("Policy") => {
                if let Some((inbound, outbound)) = parts.next().and_then(|v| v.split_once(',')) {
                    current.inbound = inbound.to_string();
                    current.outbound = outbound.to_string();
                }
            }
            Some("LogDroppedConnections") => {
                current.logs_dropped = parts.next().is_some_and(|v| v.eq_ignore_ascii_case("enable"));
            }
            _ => {}
        }
    }

    profiles
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RuleDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RuleAction {
    Allow,
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirewallRule {
    pub name: String,
    pub enabled: bool,
    pub direction: RuleDirection,
    pub action: RuleAction,
    pub protocol: String,
    pub local_port: String,
    pub remote_port: String,
    pub profiles: String,
    pub group: String,
}

impl FirewallRule {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: false,
            direction: RuleDirection::Outbound,
            action: RuleAction::Block,
            protocol: "Any".to_string(),
            local_port: "Any".to_string(),
            remote_port: "Any".to_string(),
            profiles: "Any".to_string(),
            group: String::new(),
        }
    }

    fn set(&mut self, key: &str, value: &str) {
        match key {
            "Enabled" => self.enabled = value.eq_ignore_ascii_case("yes"),
            "Direction" => {
                self.direction = if value.eq_ignore_ascii_case("in") {
                    RuleDirection::Inbound
                } else {
                    RuleDirection::Outbound
                };
            }
            "Action" => {
                self.action = if value.eq_ignore_ascii_case("allow") {
                    RuleAction::Allow
                } else {
                    RuleAction::Block
                };
            }
            "Protocol" => self.protocol = value.to_string(),
            "LocalPort" => self.local_port = value.to_string(),
            "RemotePort" => self.remote_port = value.to_string(),
            "Profiles" => self.profiles = value.to_string(),
            "Grouping" => self.group = value.to_string(),
            _ => {}
        }
    }
}

/// Parse `netsh advfirewall firewall show rule name=all`.
pub fn parse_rules(output: &str) -> Vec<FirewallRule> {
    let mut rules: Vec<FirewallRule> = Vec::new();

    for line in output.lines() {
        let Some((key, value)) = line.trim().split_once(':') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        if key == "Rule Name" {
            rules.push(FirewallRule::named(value));
        } else if let Some(rule) = rules.last_mut() {
            rule.set(key, value);
        }
    }

    rules
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuleStatistics {
    pub total: usize,
    pub enabled: usize,
    pub inbound: usize,
    pub outbound: usize,
    pub allow: usize,
    pub block: usize,
}

impl RuleStatistics {
    pub fn from_rules(rules: &[FirewallRule]) -> Self {
        let count = |f: fn(&FirewallRule) -> bool| rules.iter().filter(|r| f(r)).count();
        Self {
            total: rules.len(),
            enabled: count(|r| r.enabled),
            inbound: count(|r| r.direction == RuleDirection::Inbound),
            outbound: count(|r| r.direction == RuleDirection::Outbound),
            allow: count(|r| r.action == RuleAction::Allow),
            block: count(|r| r.action == RuleAction::Block),
        }
    }
}

fn rule_name_arg(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(MaintenanceError::MissingTarget("firewall rule name".to_string()));
    }
    if name.contains('"') {
        return Err(MaintenanceError::QueryFailed {
            program: NETSH.to_string(),
            detail: format!("invalid rule name: {name}"),
        });
    }
    Ok(format!("name=\"{name}\""))
}

/// `None` targets every profile.
pub fn set_state_spec(profile: Option<FirewallProfile>, on: bool) -> CommandSpec {
    let target = profile.map_or("allprofiles", |p| p.as_arg());
    let state = if on { "on" } else { "off" };
    CommandSpec::new(NETSH, format!("advfirewall set {target} state {state}")).elevated()
}

/// # Errors
///
/// Returns error for an empty or unquotable rule name.
pub fn set_rule_enabled_spec(name: &str, enabled: bool) -> Result<CommandSpec> {
    let enable = if enabled { "yes" } else { "no" };
    Ok(CommandSpec::new(
        NETSH,
        format!("advfirewall firewall set rule {} new enable={enable}", rule_name_arg(name)?),
    )
    .elevated())
}

/// # Errors
///
/// Returns error for an empty or unquotable rule name.
pub fn delete_rule_spec(name: &str) -> Result<CommandSpec> {
    Ok(CommandSpec::new(
        NETSH,
        format!("advfirewall firewall delete rule {}", rule_name_arg(name)?),
    )
    .elevated())
}

pub fn reset_spec() -> CommandSpec {
    CommandSpec::new(NETSH, "advfirewall reset").elevated()
}

/// Runs `netsh advfirewall` through the process runner.
#[derive(Debug, Clone, Copy)]
pub struct Firewall<'a> {
    runner: &'a ProcessRunner,
}

impl<'a> Firewall<'a> {
    #[must_use]
    pub const fn new(runner: &'a ProcessRunner) -> Self {
        Self { runner }
    }

    fn run(&self, spec: &CommandSpec, timeout: Duration) -> Result<String> {
        let captured = self.runner.capture(spec, Some(timeout))?;
        if captured.exit.success() {
            return Ok(captured.stdout);
        }
        // netsh reports its errors on stdout
        let detail = [captured.stderr.trim(), captured.stdout.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .map_or_else(|| format!("exit code {:?}", captured.exit.code), str::to_string);
        Err(MaintenanceError::QueryFailed {
            program: spec.program.clone(),
            detail,
        })
    }

    /// # Errors
    ///
    /// Returns error if netsh cannot be run or fails.
    pub fn status(&self) -> Result<Vec<ProfileStatus>> {
        let spec = CommandSpec::new(NETSH, "advfirewall show allprofiles");
        Ok(parse_status(&self.run(&spec, SHOW_TIMEOUT)?))
    }

    /// # Errors
    ///
    /// Returns error if netsh cannot be run or fails.
    pub fn rules(&self) -> Result<Vec<FirewallRule>> {
        let spec = CommandSpec::new(NETSH, "advfirewall firewall show rule name=all");
        Ok(parse_rules(&self.run(&spec, SHOW_TIMEOUT)?))
    }

    /// # Errors
    ///
    /// `ElevationRequired` without admin rights, otherwise any netsh failure.
    #[instrument(skip(self))]
    pub fn set_state(&self, profile: Option<FirewallProfile>, on: bool) -> Result<()> {
        self.run(&set_state_spec(profile, on), CHANGE_TIMEOUT)?;
        info!("Firewall turned {}", if on { "on" } else { "off" });
        Ok(())
    }

    /// # Errors
    ///
    /// `ElevationRequired` without admin rights, otherwise any netsh failure.
    #[instrument(skip(self))]
    pub fn set_rule_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        self.run(&set_rule_enabled_spec(name, enabled)?, CHANGE_TIMEOUT)?;
        info!("Firewall rule {} enabled={}", name, enabled);
        Ok(())
    }

    /// # Errors
    ///
    /// `ElevationRequired` without admin rights, otherwise any netsh failure.
    #[instrument(skip(self))]
    pub fn delete_rule(&self, name: &str) -> Result<()> {
        self.run(&delete_rule_spec(name)?, CHANGE_TIMEOUT)?;
        info!("Firewall rule {} deleted", name);
        Ok(())
    }

    /// Restore the default firewall policy.
    ///
    /// # Errors
    ///
    /// `ElevationRequired` without admin rights, otherwise any netsh failure.
    pub fn reset(&self) -> Result<()> {
        self.run(&reset_spec(), SHOW_TIMEOUT)?;
        info!("Firewall policy reset to defaults");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::elevation::Elevation;

    const ALLPROFILES: &str = "
Domain Profile Settings:
----------------------------------------------------------------------
State                                 ON
Firewall Policy                       BlockInbound,AllowOutbound
LocalFirewallRules                    N/A (GPO-store only)

Logging:
LogAllowedConnections                 Disable
LogDroppedConnections                 Disable
FileName                              %systemroot%\\system32\\LogFiles\\Firewall\\pfirewall.log

Private Profile Settings:
----------------------------------------------------------------------
State                                 ON
Firewall Policy                       BlockInbound,AllowOutbound

Logging:
LogDroppedConnections                 Enable

Public Profile Settings:
----------------------------------------------------------------------
State                                 OFF
Firewall Policy                       AllowInbound,AllowOutbound
Ok.
";

    const RULES: &str = "
Rule Name:                            Core Networking - DNS (UDP-Out)
----------------------------------------------------------------------
Enabled:                              Yes
Direction:                            Out
Profiles:                             Domain,Private,Public
Grouping:                             Core Networking
LocalIP:                              Any
RemoteIP:                             Any
Protocol:                             UDP
LocalPort:                            Any
RemotePort:                           53
Edge traversal:                       No
Action:                               Allow

Rule Name:                            Block Telnet
----------------------------------------------------------------------
Enabled:                              No
Direction:                            In
Profiles:                             Public
Grouping:
Protocol:                             TCP
LocalPort:                            23
RemotePort:                           Any
Action:                               Block
Ok.
";

    #[test]
    fn status_per_profile() {
        let profiles = parse_status(ALLPROFILES);
        assert_eq!(profiles.len(), 3);

        assert_eq!(profiles[0].profile, FirewallProfile::Domain);
        assert!(profiles[0].enabled);
        assert!(!profiles[0].logs_dropped);
        assert_eq!(profiles[0].inbound, "BlockInbound");
        assert_eq!(profiles[0].outbound, "AllowOutbound");

        assert!(profiles[1].logs_dropped);

        assert_eq!(profiles[2].profile, FirewallProfile::Public);
        assert!(!profiles[2].enabled);
        assert_eq!(profiles[2].inbound, "AllowInbound");
    }

    #[test]
    fn rules_are_split_on_rule_name() {
        let rules = parse_rules(RULES);
        assert_eq!(rules.len(), 2);

        let dns = &rules[0];
        assert_eq!(dns.name, "Core Networking - DNS (UDP-Out)");
        assert!(dns.enabled);
        assert_eq!(dns.direction, RuleDirection::Outbound);
        assert_eq!(dns.action, RuleAction::Allow);
        assert_eq!(dns.remote_port, "53");
        assert_eq!(dns.group, "Core Networking");

        let telnet = &rules[1];
        assert!(!telnet.enabled);
        assert_eq!(telnet.direction, RuleDirection::Inbound);
        assert_eq!(telnet.action, RuleAction::Block);
        assert_eq!(telnet.local_port, "23");
        assert_eq!(telnet.group, "");

        let stats = RuleStatistics::from_rules(&rules);
        assert_eq!((stats.total, stats.enabled, stats.inbound, stats.allow), (2, 1, 1, 1));
    }

    #[test]
    fn change_commands_need_elevation() {
        let spec = set_state_spec(Some(FirewallProfile::Private), false);
        assert_eq!(spec.arguments, "advfirewall set privateprofile state off");
        assert!(spec.requires_elevation);
        assert_eq!(set_state_spec(None, true).arguments, "advfirewall set allprofiles state on");

        assert_eq!(
            set_rule_enabled_spec("Block Telnet", true).unwrap().arguments,
            "advfirewall firewall set rule name=\"Block Telnet\" new enable=yes"
        );
        assert!(reset_spec().requires_elevation);

        let runner = ProcessRunner::with_elevation(Elevation::Limited);
        assert_eq!(
            Firewall::new(&runner).reset().unwrap_err(),
            MaintenanceError::ElevationRequired(NETSH.into())
        );
    }

    #[test]
    fn rule_names_are_validated() {
        assert!(matches!(
            delete_rule_spec(" "),
            Err(MaintenanceError::MissingTarget(_))
        ));
        assert!(matches!(
            delete_rule_spec("x\" dir=in"),
            Err(MaintenanceError::QueryFailed { .. })
        ));
    }
}
