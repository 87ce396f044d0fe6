use thiserror::Error;

pub type Result<T = (), E = MaintenanceError> = std::result::Result<T, E>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MaintenanceError {
    #[error("Administrator privileges required to run {0}")]
    ElevationRequired(String),

    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("Failed to start {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("{program} did not finish within {secs}s")]
    TimedOut { program: String, secs: u64 },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Failed to read registry value: {0}")]
    RegistryReadFailed(String),

    #[error("Failed to write registry value: {0}")]
    RegistryWriteFailed(String),

    #[error("Failed to delete registry value: {0}")]
    RegistryDeleteFailed(String),

    #[error("Please select a drive to check")]
    NoDriveSelected,

    #[error("Invalid drive: {0}")]
    InvalidDrive(String),

    #[error("Please enter a target for {0}")]
    MissingTarget(String),

    #[error("{0} is already running")]
    AlreadyRunning(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to export log: {0}")]
    ExportFailed(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Service operation failed: {0}")]
    ServiceFailed(String),

    #[error("{program} query failed: {detail}")]
    QueryFailed { program: String, detail: String },

    #[error("{0} is only available on Windows")]
    Unsupported(String),
}

impl MaintenanceError {
    /// Errors raised before anything was spawned or written.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::ElevationRequired(_)
                | Self::NoDriveSelected
                | Self::InvalidDrive(_)
                | Self::MissingTarget(_)
                | Self::AlreadyRunning(_)
                | Self::Unsupported(_)
        )
    }

    /// Prefixed form used when the error is appended to a tool console.
    pub fn to_console_line(&self) -> String {
        match self {
            Self::ElevationRequired(_) => format!("Error: {self}. Restart with --elevate."),
            _ => format!("Error: {self}"),
        }
    }
}

impl From<std::io::Error> for MaintenanceError {
    fn from(e: std::io::Error) -> Self {
        MaintenanceError::Io(e.to_string())
    }
}

impl From<toml::de::Error> for MaintenanceError {
    fn from(e: toml::de::Error) -> Self {
        MaintenanceError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_are_distinguished_from_runtime_failures() {
        assert!(MaintenanceError::NoDriveSelected.is_rejection());
        assert!(MaintenanceError::ElevationRequired("sfc".into()).is_rejection());
        assert!(!MaintenanceError::ExecutableNotFound("sfc".into()).is_rejection());
        assert!(MaintenanceError::Unsupported("Registry access".into()).is_rejection());
        assert!(!MaintenanceError::ServiceFailed("wuauserv".into()).is_rejection());
    }

    #[test]
    fn elevation_error_suggests_restart() {
        let line = MaintenanceError::ElevationRequired("chkdsk".into()).to_console_line();
        assert!(line.contains("chkdsk"));
        assert!(line.contains("--elevate"));
    }
}
