pub mod dism;
pub mod event_log;
pub mod firewall;
pub mod log_export;
pub mod network;
pub mod registry_tweaks;
pub mod service_control;
pub mod session;

pub use event_log::{EventLevel, EventLogEntry, EventQuery, EventStatistics};
pub use firewall::{Firewall, FirewallProfile, FirewallRule, ProfileStatus, RuleStatistics};
pub use log_export::{Console, LogExporter};
pub use registry_tweaks::{ApplyEntry, ApplyReport, PolicyState, RegistryManager};
pub use service_control::ServiceController;
pub use session::{Controls, Invocation, Session, SessionEvent};
