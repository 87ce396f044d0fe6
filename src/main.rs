use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use sysmaint::prelude::*;
use sysmaint::services::event_log::{self, EventStatistics, COMMON_LOGS};
use sysmaint::services::firewall::RuleStatistics;
use sysmaint::services::{dism, network};
use sysmaint::{logging, DismOperation, DismOptions, Settings, WINDOWS_UPDATE};
use tracing::{debug, info};

#[derive(Debug, Parser)]
#[command(name = "sysmaint", version, about = "Windows system maintenance tools")]
struct Cli {
    /// Relaunch through a UAC prompt before running
    #[arg(long, global = true)]
    elevate: bool,

    /// Save the console to a log file afterwards
    #[arg(long, global = true)]
    export: bool,

    /// Directory for exported logs
    #[arg(long, global = true, value_name = "DIR")]
    export_dir: Option<PathBuf>,

    /// Tracing filter, e.g. "debug" or "sysmaint=trace"
    #[arg(long, global = true, value_name = "FILTER")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan and repair protected system files (sfc /scannow)
    Sfc,
    /// Check a drive and fix errors (chkdsk /f /r)
    Chkdsk { drive: Option<String> },
    /// Service the Windows component store
    Dism {
        #[command(subcommand)]
        action: DismAction,
    },
    /// DISM CheckHealth followed by an SFC scan
    Health,
    Ping {
        target: Option<String>,
        #[arg(short = 'n', long)]
        count: Option<u32>,
        /// Ping until interrupted
        #[arg(short = 't', long, conflicts_with = "count")]
        continuous: bool,
    },
    Tracert { target: String },
    Ipconfig,
    Netstat,
    Flushdns,
    /// Reset Winsock and TCP/IP, renew leases, flush DNS
    Netreset,
    /// Windows Update policy
    Updates {
        #[command(subcommand)]
        action: UpdatesAction,
    },
    /// Raw DWORD access under HKLM
    Reg {
        #[command(subcommand)]
        action: RegAction,
    },
    /// Inspect and control Windows services
    Services {
        #[command(subcommand)]
        action: ServicesAction,
    },
    /// Query the Windows event logs
    Events {
        #[command(subcommand)]
        action: EventsAction,
    },
    /// Windows Firewall state and rules
    Firewall {
        #[command(subcommand)]
        action: FirewallAction,
    },
    /// Show elevation and UAC state
    Status,
}

#[derive(Debug, Subcommand)]
enum DismAction {
    Check,
    Scan,
    Restore {
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        limit_access: bool,
    },
    Cleanup {
        #[arg(long)]
        reset_base: bool,
    },
    Analyze,
}

#[derive(Debug, Subcommand)]
enum UpdatesAction {
    Enable,
    Disable,
    Status,
}

#[derive(Debug, Subcommand)]
enum RegAction {
    Get {
        key: String,
        value: String,
        #[arg(long, default_value_t = 0)]
        default: u32,
    },
    Set {
        key: String,
        value: String,
        data: u32,
    },
    Delete {
        key: String,
        value: String,
    },
    Exists {
        key: String,
    },
}

#[derive(Debug, Subcommand)]
enum ServicesAction {
    /// Status of the well-known system services
    List,
    Info { name: String },
    Start { name: String },
    Stop { name: String },
    Restart { name: String },
    Startup {
        name: String,
        #[arg(value_enum)]
        startup: StartupArg,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StartupArg {
    Auto,
    Manual,
    Disabled,
}

impl From<StartupArg> for StartupType {
    fn from(arg: StartupArg) -> Self {
        match arg {
            StartupArg::Auto => Self::Automatic,
            StartupArg::Manual => Self::Manual,
            StartupArg::Disabled => Self::Disabled,
        }
    }
}

#[derive(Debug, Subcommand)]
enum EventsAction {
    /// Recent events from one log
    Query {
        #[arg(default_value = "System")]
        log: String,
        #[arg(long, value_parser = parse_level)]
        level: Option<EventLevel>,
        #[arg(long, default_value_t = 24)]
        hours: u32,
        #[arg(long, default_value_t = 100)]
        count: u32,
        /// Print every field instead of one line per event
        #[arg(long)]
        detailed: bool,
    },
    /// Most recent errors
    Errors {
        #[arg(default_value = "System")]
        log: String,
        #[arg(long, default_value_t = 50)]
        count: u32,
        #[arg(long, default_value_t = 24)]
        hours: u32,
    },
    /// Critical events from the System and Application logs
    Critical {
        #[arg(long, default_value_t = 168)]
        hours: u32,
    },
    /// Level and source breakdown
    Stats {
        #[arg(default_value = "System")]
        log: String,
        #[arg(long, default_value_t = 24)]
        hours: u32,
        #[arg(long, default_value_t = 1000)]
        count: u32,
    },
    /// List the logs that can be queried by name
    Logs,
}

fn parse_level(s: &str) -> Result<EventLevel, String> {
    EventLevel::from_name(s)
        .ok_or_else(|| format!("unknown level '{s}', expected critical, error, warning, information or verbose"))
}

#[derive(Debug, Subcommand)]
enum FirewallAction {
    Status,
    On {
        #[arg(long, value_enum)]
        profile: Option<ProfileArg>,
    },
    Off {
        #[arg(long, value_enum)]
        profile: Option<ProfileArg>,
    },
    Rules {
        /// Only list enabled rules
        #[arg(long)]
        enabled: bool,
    },
    EnableRule { name: String },
    DisableRule { name: String },
    DeleteRule { name: String },
    /// Restore the default firewall policy
    Reset,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProfileArg {
    Domain,
    Private,
    Public,
}

impl From<ProfileArg> for FirewallProfile {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::Domain => Self::Domain,
            ProfileArg::Private => Self::Private,
            ProfileArg::Public => Self::Public,
        }
    }
}

/// Exit status for a command that was refused before running.
const EXIT_REJECTED: u8 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let settings = Settings::load().context("Failed to load settings")?;
    logging::init(cli.log_level.as_deref().unwrap_or(&settings.log_level));

    if cli.elevate && !sysmaint::is_elevated() {
        let args: Vec<String> = std::env::args()
            .skip(1)
            .filter(|a| a != "--elevate")
            .collect();
        sysmaint::run_as_admin(&args)?;
        return Ok(ExitCode::SUCCESS);
    }

    let export_dir = cli
        .export_dir
        .clone()
        .or_else(|| settings.export_dir.clone())
        .unwrap_or_else(LogExporter::default_dir);

    let mut app = App {
        session: Session::new(ProcessRunner::new()),
        consoles: BTreeMap::new(),
        current: Tool::Network,
        rejected: false,
        settings,
    };
    info!(elevation = ?app.session.runner().elevation(), "sysmaint started");

    let ok = app.dispatch(cli.command).await;
    app.session.stop_all();

    if cli.export {
        app.export(&LogExporter::new(export_dir));
    }

    Ok(if ok {
        ExitCode::SUCCESS
    } else if app.rejected {
        ExitCode::from(EXIT_REJECTED)
    } else {
        ExitCode::FAILURE
    })
}

struct App {
    session: Session,
    /// One console per tab touched by this run.
    consoles: BTreeMap<Tool, Console>,
    current: Tool,
    rejected: bool,
    settings: Settings,
}

impl App {
    async fn dispatch(&mut self, command: Command) -> bool {
        let tracked = match command {
            Command::Sfc => MaintenanceCommand::Sfc,
            Command::Chkdsk { drive } => {
                self.current = Tool::Chkdsk;
                match MaintenanceCommand::chkdsk(drive.as_deref()) {
                    Ok(c) => c,
                    Err(e) => return self.reject(&e),
                }
            }
            Command::Dism { action } => MaintenanceCommand::Dism(dism_options(action)),
            Command::Health => return self.health().await,
            Command::Ping {
                target,
                count,
                continuous,
            } => {
                self.current = Tool::Ping;
                let target = target.unwrap_or_else(|| self.settings.ping_target.clone());
                let count = if continuous {
                    None
                } else {
                    Some(count.unwrap_or(self.settings.ping_count))
                };
                match MaintenanceCommand::ping(&target, count) {
                    Ok(c) => c,
                    Err(e) => return self.reject(&e),
                }
            }
            Command::Tracert { target } => {
                self.current = Tool::Tracert;
                match MaintenanceCommand::tracert(&target) {
                    Ok(c) => c,
                    Err(e) => return self.reject(&e),
                }
            }
            Command::Ipconfig => MaintenanceCommand::Ipconfig,
            Command::Netstat => MaintenanceCommand::Netstat,
            Command::Flushdns => return self.flush_dns(),
            Command::Netreset => return self.reset_network(),
            Command::Updates { action } => return self.updates(action),
            Command::Reg { action } => return self.reg(action),
            Command::Services { action } => return self.services(action),
            Command::Events { action } => return self.events(action),
            Command::Firewall { action } => return self.firewall(action),
            Command::Status => {
                self.status();
                return true;
            }
        };

        self.run_and_report(&tracked).await
    }

    fn console(&mut self) -> &mut Console {
        self.consoles.entry(self.current).or_default()
    }

    fn say(&mut self, text: impl Into<String>) {
        println!("{}", self.console().push_notice(text));
    }

    fn reject(&mut self, error: &MaintenanceError) -> bool {
        if error.is_rejection() {
            self.rejected = true;
        }
        self.say(error.to_console_line());
        false
    }

    /// Export the current tab, or every touched tab into one combined file.
    fn export(&self, exporter: &LogExporter) {
        println!("Exporting to {}", exporter.dir().display());
        let result = if self.consoles.len() > 1 {
            let texts: Vec<(Tool, String)> = self
                .consoles
                .iter()
                .map(|(tool, console)| (*tool, console.text()))
                .collect();
            exporter.export_many(
                "combined_logs",
                texts.iter().map(|(tool, text)| (tool.as_str(), text.as_str())),
            )
        } else {
            match self.consoles.get(&self.current) {
                Some(console) if !console.is_empty() => {
                    exporter.export(self.current.log_prefix(), &console.text())
                }
                _ => return,
            }
        };
        match result {
            Ok(path) => println!("Log exported to: {}", path.display()),
            Err(e) => eprintln!("{}", e.to_console_line()),
        }
    }

    async fn run_and_report(&mut self, command: &MaintenanceCommand) -> bool {
        let outcome = self.run_tracked(command).await;
        self.after_run(command, &outcome);
        outcome.is_success()
    }

    async fn health(&mut self) -> bool {
        let check = MaintenanceCommand::Dism(DismOptions::new(DismOperation::CheckHealth));
        if !self.run_and_report(&check).await {
            return false;
        }
        self.run_and_report(&MaintenanceCommand::Sfc).await
    }

    /// Stream one tracked invocation to its tab's console. Ctrl+C stops it.
    async fn run_tracked(&mut self, command: &MaintenanceCommand) -> Outcome {
        let tool = command.tool();
        self.current = tool;
        self.say(format!("Starting {tool}..."));
        self.say(format!("Command: {}", command.to_spec().display_line()));

        let mut invocation = match self.session.start(command) {
            Ok(inv) => inv,
            Err(e) => {
                self.reject(&e);
                return Outcome::Failed(e);
            }
        };
        let mut last_operation = None;

        let outcome = loop {
            tokio::select! {
                event = invocation.next_event() => match event {
                    SessionEvent::Line(line) => {
                        if tool == Tool::Dism {
                            if let Some(progress) = dism::extract_progress(&line.text) {
                                debug!(progress, "DISM progress");
                            }
                            let operation = dism::extract_operation(&line.text);
                            if operation.is_some() && operation != last_operation {
                                last_operation = operation;
                                info!(operation, "DISM phase");
                            }
                        }
                        println!("{}", self.console().push_output(&line));
                    }
                    SessionEvent::Finished(outcome) => break outcome,
                },
                _ = tokio::signal::ctrl_c() => {
                    if self.session.stop(tool) {
                        self.say("Stopping process...");
                    }
                }
            }
        };

        self.session.finish(tool, invocation.run_id);
        self.say(outcome.summary());
        outcome
    }

    fn after_run(&mut self, command: &MaintenanceCommand, outcome: &Outcome) {
        if !matches!(outcome, Outcome::Completed(_)) {
            return;
        }
        match command {
            MaintenanceCommand::Dism(options) => match options.operation {
                DismOperation::CheckHealth => {
                    let health = dism::analyze_checkhealth(&self.console().text());
                    self.say(format!("System image health: {}", health.as_str()));
                    for tip in dism::recommendations(health) {
                        self.say(format!("  - {tip}"));
                    }
                }
                DismOperation::RestoreHealth if outcome.is_success() => {
                    self.say("DISM repair completed. It is recommended to run SFC scan now.");
                }
                _ => {}
            },
            MaintenanceCommand::Ping { .. } => {
                if let Some(summary) = network::PingSummary::parse(&self.console().text()) {
                    let verdict = if summary.reachable() {
                        "reachable"
                    } else {
                        "unreachable"
                    };
                    self.say(format!(
                        "Host {verdict}: {}/{} replies, {}% loss",
                        summary.received, summary.sent, summary.loss_percent
                    ));
                }
            }
            _ => {}
        }
    }

    fn flush_dns(&mut self) -> bool {
        self.current = Tool::Network;
        self.say("Flushing DNS cache...");
        match network::flush_dns(self.session.runner()) {
            Ok(captured) if captured.exit.success() => {
                self.say(captured.stdout.trim_end().to_string());
                self.say("DNS cache flushed successfully");
                true
            }
            Ok(captured) => {
                self.say(format!("Failed to flush DNS: {}", captured.stderr.trim()));
                false
            }
            Err(e) => self.reject(&e),
        }
    }

    fn reset_network(&mut self) -> bool {
        self.current = Tool::Network;
        self.say("Resetting network configuration...");
        let runner = *self.session.runner();
        let timeout = self.settings.network_step_timeout();
        let console = self.console();
        let reports = network::reset_network(&runner, timeout, |line| {
            println!("{}", console.push_notice(line));
        });
        reports.iter().all(|r| r.success)
    }

    fn registry(&mut self) -> Option<RegistryManager> {
        self.current = Tool::Registry;
        match system_store() {
            Ok(store) => Some(RegistryManager::new(store)),
            Err(e) => {
                self.reject(&e);
                None
            }
        }
    }

    fn updates(&mut self, action: UpdatesAction) -> bool {
        let Some(manager) = self.registry() else {
            return false;
        };
        let toggle = match action {
            UpdatesAction::Enable => Toggle::Enable,
            UpdatesAction::Disable => Toggle::Disable,
            UpdatesAction::Status => {
                let state = manager.inspect(&WINDOWS_UPDATE);
                self.say(format!("{}: {}", WINDOWS_UPDATE.name, state.as_str()));
                return true;
            }
        };

        let report = manager.apply_change_set(&WINDOWS_UPDATE, toggle);
        for line in report.log_lines() {
            self.say(line);
        }
        if report.is_complete() {
            self.say(format!("{} {}d", WINDOWS_UPDATE.name, toggle.as_str()));
        } else {
            self.say(format!(
                "{} partially applied; {} change(s) failed. Restart with --elevate.",
                WINDOWS_UPDATE.name,
                report.failures().count()
            ));
        }
        report.is_complete()
    }

    fn reg(&mut self, action: RegAction) -> bool {
        let Some(manager) = self.registry() else {
            return false;
        };
        match action {
            RegAction::Get {
                key,
                value,
                default,
            } => {
                let data = manager.get(&key, &value, default);
                self.say(format!(r"HKLM\{key}\{value} = {data}"));
                true
            }
            RegAction::Set { key, value, data } => match manager.set(&key, &value, data) {
                Ok(()) => {
                    self.say(format!(r"Set HKLM\{key}\{value} = {data}"));
                    true
                }
                Err(e) => self.reject(&e),
            },
            RegAction::Delete { key, value } => match manager.delete(&key, &value) {
                Ok(()) => {
                    self.say(format!(r"Deleted HKLM\{key}\{value}"));
                    true
                }
                Err(e) => self.reject(&e),
            },
            RegAction::Exists { key } => {
                let exists = manager.exists(&key);
                self.say(format!(r"HKLM\{key}: {}", if exists { "exists" } else { "missing" }));
                exists
            }
        }
    }

    fn services(&mut self, action: ServicesAction) -> bool {
        self.current = Tool::Services;
        let controller = match system_services() {
            Ok(backend) => ServiceController::new(backend),
            Err(e) => return self.reject(&e),
        };

        let (name, result) = match action {
            ServicesAction::List => {
                let services = controller.important_services();
                for s in &services {
                    self.say(format!(
                        "{:<24} {:<10} {:<10} {}",
                        s.name, s.state, s.startup, s.display_name
                    ));
                }
                self.say(format!("{} services", services.len()));
                return true;
            }
            ServicesAction::Info { name } => {
                return match controller.info(&name) {
                    Ok(s) => {
                        self.say(format!("{} ({})", s.display_name, s.name));
                        self.say(format!("Status: {}", s.state));
                        self.say(format!("Startup: {}", s.startup));
                        self.say(format!("Description: {}", s.description));
                        true
                    }
                    Err(e) => self.reject(&e),
                };
            }
            ServicesAction::Start { name } => {
                let r = controller.start(&name);
                (name, r.map(|()| "started".to_string()))
            }
            ServicesAction::Stop { name } => {
                let r = controller.stop(&name);
                (name, r.map(|()| "stopped".to_string()))
            }
            ServicesAction::Restart { name } => {
                let r = controller.restart(&name);
                (name, r.map(|()| "restarted".to_string()))
            }
            ServicesAction::Startup { name, startup } => {
                let startup = StartupType::from(startup);
                let r = controller.set_startup(&name, startup);
                (name, r.map(|()| format!("set to {startup} startup")))
            }
        };

        match result {
            Ok(done) => {
                self.say(format!("Service {name} {done}"));
                true
            }
            Err(e) => self.reject(&e),
        }
    }

    fn events(&mut self, action: EventsAction) -> bool {
        self.current = Tool::EventLog;
        let runner = *self.session.runner();

        let (events, detailed) = match action {
            EventsAction::Logs => {
                for log in COMMON_LOGS {
                    self.say(log);
                }
                return true;
            }
            EventsAction::Query {
                log,
                level,
                hours,
                count,
                detailed,
            } => {
                let mut query = EventQuery::new(log).hours_back(hours).max_events(count);
                if let Some(level) = level {
                    query = query.level(level);
                }
                (event_log::query_events(&runner, &query), detailed)
            }
            EventsAction::Errors { log, count, hours } => {
                (event_log::last_errors(&runner, &log, count, hours), false)
            }
            EventsAction::Critical { hours } => (Ok(event_log::critical_events(&runner, hours)), false),
            EventsAction::Stats { log, hours, count } => {
                let query = EventQuery::new(log).hours_back(hours).max_events(count);
                return match event_log::query_events(&runner, &query) {
                    Ok(events) => {
                        self.print_statistics(&EventStatistics::from_events(&events));
                        true
                    }
                    Err(e) => self.reject(&e),
                };
            }
        };

        let events = match events {
            Ok(events) => events,
            Err(e) => return self.reject(&e),
        };
        for event in &events {
            if detailed {
                self.say(event.detailed());
                self.say("-".repeat(80));
            } else {
                self.say(event.summary_line());
            }
        }
        self.say(format!("{} events", events.len()));
        true
    }

    fn print_statistics(&mut self, stats: &EventStatistics) {
        self.say(format!("Total events: {}", stats.total));
        for (level, count) in &stats.by_level {
            self.say(format!("  {level}: {count}"));
        }
        self.say("Top sources:");
        for (source, count) in &stats.top_sources {
            self.say(format!("  {source}: {count}"));
        }
        if let (Some(earliest), Some(latest)) = (stats.earliest, stats.latest) {
            self.say(format!(
                "Time range: {} to {}",
                earliest.format("%Y-%m-%d %H:%M:%S"),
                latest.format("%Y-%m-%d %H:%M:%S")
            ));
        }
    }

    fn firewall(&mut self, action: FirewallAction) -> bool {
        self.current = Tool::Firewall;
        let runner = *self.session.runner();
        let firewall = Firewall::new(&runner);

        let result = match action {
            FirewallAction::Status => firewall.status().map(|profiles| {
                for p in profiles {
                    self.say(format!(
                        "{:<8} {:<4} inbound: {:<13} outbound: {:<14} log drops: {}",
                        p.profile,
                        if p.enabled { "ON" } else { "OFF" },
                        p.inbound,
                        p.outbound,
                        if p.logs_dropped { "yes" } else { "no" }
                    ));
                }
            }),
            FirewallAction::On { profile } => firewall.set_state(profile.map(Into::into), true),
            FirewallAction::Off { profile } => firewall.set_state(profile.map(Into::into), false),
            FirewallAction::Rules { enabled } => firewall.rules().map(|rules| {
                let stats = RuleStatistics::from_rules(&rules);
                for r in rules.iter().filter(|r| !enabled || r.enabled) {
                    self.say(format!(
                        "{:<3} {:?}/{:?} {} [{}]",
                        if r.enabled { "yes" } else { "no" },
                        r.direction,
                        r.action,
                        r.name,
                        r.protocol
                    ));
                }
                self.say(format!(
                    "{} rules, {} enabled, {} inbound, {} outbound, {} allow, {} block",
                    stats.total, stats.enabled, stats.inbound, stats.outbound, stats.allow, stats.block
                ));
            }),
            FirewallAction::EnableRule { name } => firewall.set_rule_enabled(&name, true),
            FirewallAction::DisableRule { name } => firewall.set_rule_enabled(&name, false),
            FirewallAction::DeleteRule { name } => firewall.delete_rule(&name),
            FirewallAction::Reset => firewall.reset(),
        };

        match result {
            Ok(()) => true,
            Err(e) => self.reject(&e),
        }
    }

    fn status(&mut self) {
        let elevated = self.session.runner().elevation().is_elevated();
        self.say(format!(
            "Administrator: {}",
            if elevated { "yes" } else { "no" }
        ));
        self.say(format!(
            "UAC: {}",
            if sysmaint::repositories::elevation::is_uac_enabled() {
                "enabled"
            } else {
                "disabled"
            }
        ));
        if let Some(path) = sysmaint::config::config_path() {
            self.say(format!("Config: {}", path.display()));
        }
    }
}

fn dism_options(action: DismAction) -> DismOptions {
    match action {
        DismAction::Check => DismOptions::new(DismOperation::CheckHealth),
        DismAction::Scan => DismOptions::new(DismOperation::ScanHealth),
        DismAction::Restore {
            source,
            limit_access,
        } => DismOptions {
            source,
            limit_access,
            ..DismOptions::new(DismOperation::RestoreHealth)
        },
        DismAction::Cleanup { reset_base } => DismOptions {
            reset_base,
            ..DismOptions::new(DismOperation::StartComponentCleanup)
        },
        DismAction::Analyze => DismOptions::new(DismOperation::AnalyzeComponentStore),
    }
}
