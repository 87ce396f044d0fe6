//! Windows service types and the catalog of services worth watching.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceState {
    Stopped,
    StartPending,
    StopPending,
    Running,
    ContinuePending,
    PausePending,
    Paused,
    Unknown,
}

impl ServiceState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::StartPending => "Starting",
            Self::StopPending => "Stopping",
            Self::Running => "Running",
            Self::ContinuePending => "Resuming",
            Self::PausePending => "Pausing",
            Self::Paused => "Paused",
            Self::Unknown => "Unknown",
        }
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StartupType {
    Automatic,
    Manual,
    Disabled,
    /// Boot/system drivers and anything else the SCM reports.
    Unknown,
}

impl StartupType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "Automatic",
            Self::Manual => "Manual",
            Self::Disabled => "Disabled",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for StartupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Raw state reported by the service backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub startup: StartupType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub state: ServiceState,
    pub startup: StartupType,
}

impl ServiceInfo {
    #[must_use]
    pub const fn can_stop(&self) -> bool {
        self.state.is_running()
    }
}

/// Known service: (name, display name, description).
pub type CatalogEntry = (&'static str, &'static str, &'static str);

pub const IMPORTANT_SERVICES: &[CatalogEntry] = &[
    ("wuauserv", "Windows Update", "Enables the detection, download, and installation of updates for Windows and other programs."),
    ("bits", "Background Intelligent Transfer Service", "Transfers files in the background using idle network bandwidth."),
    ("cryptsvc", "Cryptographic Services", "Provides Catalog Database, Protected Root and Automatic Root Certificate Update services."),
    ("msiserver", "Windows Installer", "Installs, modifies, and removes applications provided as Windows Installer packages."),
    ("trustedinstaller", "Windows Modules Installer", "Enables installation, modification, and removal of Windows updates and optional components."),
    ("eventlog", "Windows Event Log", "Enables event log messages issued by Windows-based programs and components to be viewed in Event Viewer."),
    ("winmgmt", "Windows Management Instrumentation", "Provides a common interface and object model to access management information."),
    ("rpcss", "Remote Procedure Call (RPC)", "Serves as the endpoint mapper and COM Service Control Manager."),
    ("dcomlaunch", "DCOM Server Process Launcher", "Provides launch functionality for DCOM services."),
    ("plugplay", "Plug and Play", "Enables a computer to recognize and adapt to hardware changes."),
    ("power", "Power", "Manages power policy and power policy notification delivery."),
    ("themes", "Themes", "Provides user experience theme management."),
    ("audiosrv", "Windows Audio", "Manages audio for Windows-based programs."),
    ("audioendpointbuilder", "Windows Audio Endpoint Builder", "Manages audio devices for the Windows Audio service."),
    ("lanmanserver", "Server", "Supports file, print, and named-pipe sharing over the network."),
    ("lanmanworkstation", "Workstation", "Creates and maintains client network connections to remote servers."),
    ("dnscache", "DNS Client", "Caches Domain Name System (DNS) names and registers the full computer name."),
    ("dhcp", "DHCP Client", "Registers and updates IP addresses and DNS records for this computer."),
    ("netlogon", "Netlogon", "Maintains a secure channel between this computer and the domain controller."),
    ("netman", "Network Connections", "Manages objects in the Network and Dial-Up Connections folder."),
    ("nsi", "Network Store Interface Service", "Collects and stores network configuration and location information."),
    ("mpssvc", "Windows Defender Firewall", "Provides host-based firewall enforcement for the operating system."),
    ("windefend", "Windows Defender Antivirus Service", "Helps protect users from malware and other potentially unwanted software."),
    ("wscsvc", "Security Center", "Monitors and reports security health settings on the computer."),
    ("wersvc", "Windows Error Reporting Service", "Allows errors to be reported when programs stop working or responding."),
    ("spooler", "Print Spooler", "Loads files to memory for later printing."),
    ("fax", "Fax", "Enables you to send and receive faxes."),
    ("termservice", "Remote Desktop Services", "Allows users to connect interactively to a remote computer."),
    ("remoteregistry", "Remote Registry", "Enables remote users to modify registry settings on this computer."),
    ("remoteaccess", "Routing and Remote Access", "Offers routing services in local area and wide area network environments."),
    ("vss", "Volume Shadow Copy", "Manages and implements Volume Shadow Copies used for backup and other purposes."),
    ("swprv", "Microsoft Software Shadow Copy Provider", "Manages software-based volume shadow copies."),
    ("vds", "Virtual Disk", "Provides management services for disks, volumes, file systems, and storage arrays."),
    ("schedule", "Task Scheduler", "Enables a user to configure and schedule automated tasks on this computer."),
    ("wsearch", "Windows Search", "Provides content indexing, property caching, and search results."),
    ("w32time", "Windows Time", "Maintains date and time synchronization on all clients and servers in the network."),
    ("profsvc", "User Profile Service", "Responsible for loading and unloading user profiles."),
    ("licensemanager", "Windows License Manager Service", "Provides infrastructure support for the Microsoft Store."),
];

/// Catalog entry for `name`, compared case-insensitively.
pub fn catalog_entry(name: &str) -> Option<&'static CatalogEntry> {
    IMPORTANT_SERVICES
        .iter()
        .find(|(n, _, _)| n.eq_ignore_ascii_case(name))
}
