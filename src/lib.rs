pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod repositories;
pub mod services;

// Public, stable-ish API surface for front ends

pub use crate::config::Settings;

pub use crate::domain::{
    ChangeSet, CommandSpec, DismOperation, DismOptions, MaintenanceCommand, Outcome, OutputLine,
    ServiceInfo, ServiceState, StartupType, Toggle, Tool, WINDOWS_UPDATE,
};

pub use crate::error::{MaintenanceError, Result};

pub use crate::repositories::elevation::{is_elevated, run_as_admin, Elevation};

pub use crate::services::{
    EventQuery, Firewall, LogExporter, RegistryManager, ServiceController, Session, SessionEvent,
};

pub mod prelude {
    pub use crate::domain::{
        CommandSpec, MaintenanceCommand, Outcome, OutputLine, ServiceInfo, StartupType, Toggle,
        Tool,
    };
    pub use crate::error::{MaintenanceError, Result};
    pub use crate::repositories::{
        system_services, system_store, Elevation, ProcessRunner, RegistryStore, ServiceControl,
    };
    pub use crate::services::{
        Console, Controls, EventLevel, EventQuery, Firewall, FirewallProfile, LogExporter,
        PolicyState, RegistryManager, ServiceController, Session, SessionEvent,
    };
}
