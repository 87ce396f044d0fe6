//! Service control - status of important services, start/stop/restart,
//! startup configuration.

use crate::domain::{catalog_entry, ServiceInfo, ServiceState, StartupType, IMPORTANT_SERVICES};
use crate::error::{MaintenanceError, Result};
use crate::repositories::windows_service::ServiceControl;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

const STOP_POLL: Duration = Duration::from_millis(250);

pub struct ServiceController {
    backend: Box<dyn ServiceControl>,
    stop_timeout: Duration,
}

impl ServiceController {
    pub fn new(backend: Box<dyn ServiceControl>) -> Self {
        Self {
            backend,
            stop_timeout: Duration::from_secs(30),
        }
    }

    /// How long `restart` waits for the service to report stopped.
    #[must_use]
    pub const fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// # Errors
    ///
    /// `ServiceNotFound` if the service is not installed.
    pub fn info(&self, name: &str) -> Result<ServiceInfo> {
        let status = self.backend.query(name)?;
        let (display_name, description) = catalog_entry(name).map_or_else(
            || (name.to_string(), "No description available".to_string()),
            |(_, display, description)| ((*display).to_string(), (*description).to_string()),
        );

        Ok(ServiceInfo {
            name: name.to_string(),
            display_name,
            description,
            state: status.state,
            startup: status.startup,
        })
    }

    /// Every catalogued service that is installed on this machine.
    pub fn important_services(&self) -> Vec<ServiceInfo> {
        IMPORTANT_SERVICES
            .iter()
            .filter_map(|(name, _, _)| match self.info(name) {
                Ok(info) => Some(info),
                Err(MaintenanceError::ServiceNotFound(_)) => None,
                Err(e) => {
                    warn!("Skipping {}: {}", name, e);
                    None
                }
            })
            .collect()
    }

    /// # Errors
    ///
    /// Returns error if the service is missing, disabled or access is denied.
    #[instrument(skip(self))]
    pub fn start(&self, name: &str) -> Result<()> {
        self.backend.start(name)?;
        info!("Service {} started", name);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns error if the service is missing or access is denied.
    #[instrument(skip(self))]
    pub fn stop(&self, name: &str) -> Result<()> {
        self.backend.stop(name)?;
        info!("Service {} stopped", name);
        Ok(())
    }

    /// Stop, wait until the service reports stopped, then start it again.
    ///
    /// # Errors
    ///
    /// `ServiceFailed` if the service does not stop in time, otherwise any
    /// stop or start failure.
    #[instrument(skip(self))]
    pub fn restart(&self, name: &str) -> Result<()> {
        self.backend.stop(name)?;

        let deadline = Instant::now() + self.stop_timeout;
        while self.backend.query(name)?.state != ServiceState::Stopped {
            if Instant::now() >= deadline {
                return Err(MaintenanceError::ServiceFailed(format!(
                    "{name} did not stop within {}s",
                    self.stop_timeout.as_secs()
                )));
            }
            thread::sleep(STOP_POLL);
        }

        self.backend.start(name)?;
        info!("Service {} restarted", name);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns error for `Unknown`, a missing service or denied access.
    #[instrument(skip(self))]
    pub fn set_startup(&self, name: &str, startup: StartupType) -> Result<()> {
        self.backend.set_startup(name, startup)?;
        info!("Startup type of {} set to {}", name, startup);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::windows_service::MemoryServices;
    use std::sync::Arc;

    fn controller(services: &Arc<MemoryServices>) -> ServiceController {
        ServiceController::new(Box::new(Arc::clone(services)))
    }

    #[test]
    fn info_uses_catalog_names() {
        let services = Arc::new(MemoryServices::new());
        services.install("wuauserv", ServiceState::Running, StartupType::Manual);
        services.install("custom", ServiceState::Stopped, StartupType::Disabled);
        let ctl = controller(&services);

        let wu = ctl.info("wuauserv").unwrap();
        assert_eq!(wu.display_name, "Windows Update");
        assert!(wu.can_stop());

        let custom = ctl.info("custom").unwrap();
        assert_eq!(custom.display_name, "custom");
        assert_eq!(custom.description, "No description available");
        assert!(!custom.can_stop());
    }

    #[test]
    fn important_services_skips_missing() {
        let services = Arc::new(MemoryServices::new());
        services.install("bits", ServiceState::Running, StartupType::Automatic);
        services.install("dnscache", ServiceState::Running, StartupType::Automatic);

        let names: Vec<_> = controller(&services)
            .important_services()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, ["bits", "dnscache"]);
    }

    #[test]
    fn restart_cycles_a_running_service() {
        let services = Arc::new(MemoryServices::new());
        services.install("spooler", ServiceState::Running, StartupType::Automatic);
        let ctl = controller(&services).with_stop_timeout(Duration::from_millis(500));

        ctl.restart("spooler").unwrap();
        assert_eq!(ctl.info("spooler").unwrap().state, ServiceState::Running);
    }

    #[test]
    fn startup_change_is_visible() {
        let services = Arc::new(MemoryServices::new());
        services.install("wsearch", ServiceState::Running, StartupType::Automatic);
        let ctl = controller(&services);

        ctl.set_startup("wsearch", StartupType::Disabled).unwrap();
        assert_eq!(ctl.info("wsearch").unwrap().startup, StartupType::Disabled);
        assert!(ctl.set_startup("wsearch", StartupType::Unknown).is_err());
    }

    #[test]
    fn stop_without_rights_reports_elevation() {
        let services = Arc::new(MemoryServices::new());
        services.install("bits", ServiceState::Running, StartupType::Manual);
        services.deny_control();
        assert!(matches!(
            controller(&services).stop("bits"),
            Err(MaintenanceError::ElevationRequired(_))
        ));
    }
}
