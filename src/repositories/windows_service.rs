//! Windows Service Control Manager helpers.

use crate::domain::{ServiceState, ServiceStatus, StartupType};
use crate::error::{MaintenanceError, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Query and control installed services by short name.
pub trait ServiceControl: Send + Sync {
    /// `ServiceNotFound` when no such service is installed.
    fn query(&self, name: &str) -> Result<ServiceStatus>;

    /// Starting a running service is not an error.
    fn start(&self, name: &str) -> Result<()>;

    /// Stopping a stopped service is not an error.
    fn stop(&self, name: &str) -> Result<()>;

    fn set_startup(&self, name: &str, startup: StartupType) -> Result<()>;
}

impl<T: ServiceControl + ?Sized> ServiceControl for Arc<T> {
    fn query(&self, name: &str) -> Result<ServiceStatus> {
        (**self).query(name)
    }

    fn start(&self, name: &str) -> Result<()> {
        (**self).start(name)
    }

    fn stop(&self, name: &str) -> Result<()> {
        (**self).stop(name)
    }

    fn set_startup(&self, name: &str, startup: StartupType) -> Result<()> {
        (**self).set_startup(name, startup)
    }
}

#[cfg(windows)]
pub use scm::WinServices;

#[cfg(windows)]
mod scm {
    use super::ServiceControl;
    use crate::domain::{ServiceState, ServiceStatus, StartupType};
    use crate::error::{MaintenanceError, Result};
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{
        E_ACCESSDENIED, ERROR_SERVICE_ALREADY_RUNNING, ERROR_SERVICE_DOES_NOT_EXIST,
        ERROR_SERVICE_NOT_ACTIVE,
    };
    use windows::Win32::System::Services::*;

    struct ServiceHandle(SC_HANDLE);

    impl Drop for ServiceHandle {
        fn drop(&mut self) {
            unsafe {
                let _ = CloseServiceHandle(self.0);
            }
        }
    }

    /// Service handle plus the manager it was opened from.
    struct OpenedService {
        svc: ServiceHandle,
        _scm: ServiceHandle,
    }

    fn map_error(name: &str, action: &str, e: &windows::core::Error) -> MaintenanceError {
        let code = e.code();
        if code == E_ACCESSDENIED {
            MaintenanceError::ElevationRequired(format!("service control ({name})"))
        } else if code == ERROR_SERVICE_DOES_NOT_EXIST.to_hresult() {
            MaintenanceError::ServiceNotFound(name.to_string())
        } else {
            MaintenanceError::ServiceFailed(format!("failed to {action} {name}: {e}"))
        }
    }

    fn open_service(name: &str, access: u32) -> Result<OpenedService> {
        let scm = unsafe { OpenSCManagerW(PCWSTR::null(), PCWSTR::null(), SC_MANAGER_CONNECT) }
            .map_err(|e| map_error(name, "connect to the service manager for", &e))?;
        let scm = ServiceHandle(scm);

        let name_wide: Vec<u16> = name.encode_utf16().chain(Some(0)).collect();
        let svc = unsafe { OpenServiceW(scm.0, PCWSTR(name_wide.as_ptr()), access) }
            .map_err(|e| map_error(name, "open", &e))?;

        Ok(OpenedService {
            svc: ServiceHandle(svc),
            _scm: scm,
        })
    }

    /// The real Service Control Manager.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct WinServices;

    impl ServiceControl for WinServices {
        fn query(&self, name: &str) -> Result<ServiceStatus> {
            let opened = open_service(name, SERVICE_QUERY_STATUS | SERVICE_QUERY_CONFIG)?;

            let mut status = SERVICE_STATUS::default();
            unsafe { QueryServiceStatus(opened.svc.0, &mut status) }
                .map_err(|e| map_error(name, "query", &e))?;

            let state = match status.dwCurrentState {
                SERVICE_STOPPED => ServiceState::Stopped,
                SERVICE_START_PENDING => ServiceState::StartPending,
                SERVICE_STOP_PENDING => ServiceState::StopPending,
                SERVICE_RUNNING => ServiceState::Running,
                SERVICE_CONTINUE_PENDING => ServiceState::ContinuePending,
                SERVICE_PAUSE_PENDING => ServiceState::PausePending,
                SERVICE_PAUSED => ServiceState::Paused,
                _ => ServiceState::Unknown,
            };

            let startup = unsafe {
                let mut bytes_needed = 0u32;
                let _ = QueryServiceConfigW(opened.svc.0, None, 0, &mut bytes_needed);

                let mut buffer: Vec<u8> = vec![0; bytes_needed as usize];
                let config = buffer.as_mut_ptr().cast::<QUERY_SERVICE_CONFIGW>();

                QueryServiceConfigW(opened.svc.0, Some(config), bytes_needed, &mut bytes_needed)
                    .map_err(|e| map_error(name, "read the configuration of", &e))?;

                match (*config).dwStartType {
                    SERVICE_AUTO_START => StartupType::Automatic,
                    SERVICE_DEMAND_START => StartupType::Manual,
                    SERVICE_DISABLED => StartupType::Disabled,
                    _ => StartupType::Unknown,
                }
            };

            Ok(ServiceStatus { state, startup })
        }

        fn start(&self, name: &str) -> Result<()> {
            let opened = open_service(name, SERVICE_START)?;
            match unsafe { StartServiceW(opened.svc.0, None) } {
                Err(e) if e.code() == ERROR_SERVICE_ALREADY_RUNNING.to_hresult() => Ok(()),
                other => other.map_err(|e| map_error(name, "start", &e)),
            }
        }

        fn stop(&self, name: &str) -> Result<()> {
            let opened = open_service(name, SERVICE_STOP | SERVICE_QUERY_STATUS)?;
            let mut status = SERVICE_STATUS::default();
            match unsafe { ControlService(opened.svc.0, SERVICE_CONTROL_STOP, &mut status) } {
                Err(e) if e.code() == ERROR_SERVICE_NOT_ACTIVE.to_hresult() => Ok(()),
                other => other.map_err(|e| map_error(name, "stop", &e)),
            }
        }

        fn set_startup(&self, name: &str, startup: StartupType) -> Result<()> {
            let start_type = match startup {
                StartupType::Automatic => SERVICE_AUTO_START,
                StartupType::Manual => SERVICE_DEMAND_START,
                StartupType::Disabled => SERVICE_DISABLED,
                StartupType::Unknown => {
                    return Err(MaintenanceError::ServiceFailed(format!(
                        "unsupported startup type for {name}"
                    )))
                }
            };

            let opened = open_service(name, SERVICE_CHANGE_CONFIG)?;
            unsafe {
                ChangeServiceConfigW(
                    opened.svc.0,
                    ENUM_SERVICE_TYPE(SERVICE_NO_CHANGE),
                    start_type,
                    SERVICE_ERROR(SERVICE_NO_CHANGE),
                    PCWSTR::null(),
                    PCWSTR::null(),
                    None,
                    PCWSTR::null(),
                    PCWSTR::null(),
                    PCWSTR::null(),
                    PCWSTR::null(),
                )
            }
            .map_err(|e| map_error(name, "reconfigure", &e))
        }
    }
}

/// In-process service table with SCM-like transitions.
#[derive(Debug, Default)]
pub struct MemoryServices {
    services: RwLock<BTreeMap<String, ServiceStatus>>,
    locked: RwLock<bool>,
}

impl MemoryServices {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, name: &str, state: ServiceState, startup: StartupType) {
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_ascii_lowercase(), ServiceStatus { state, startup });
    }

    /// Make every control request fail as it would without admin rights.
    pub fn deny_control(&self) {
        *self.locked.write().unwrap_or_else(PoisonError::into_inner) = true;
    }

    fn update<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut ServiceStatus) -> Result<()>,
    {
        if *self.locked.read().unwrap_or_else(PoisonError::into_inner) {
            return Err(MaintenanceError::ElevationRequired(format!(
                "service control ({name})"
            )));
        }
        let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
        let status = services
            .get_mut(&name.to_ascii_lowercase())
            .ok_or_else(|| MaintenanceError::ServiceNotFound(name.to_string()))?;
        f(status)
    }
}

impl ServiceControl for MemoryServices {
    fn query(&self, name: &str) -> Result<ServiceStatus> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name.to_ascii_lowercase())
            .copied()
            .ok_or_else(|| MaintenanceError::ServiceNotFound(name.to_string()))
    }

    fn start(&self, name: &str) -> Result<()> {
        self.update(name, |status| {
            if status.startup == StartupType::Disabled {
                return Err(MaintenanceError::ServiceFailed(format!(
                    "failed to start {name}: the service is disabled"
                )));
            }
            status.state = ServiceState::Running;
            Ok(())
        })
    }

    fn stop(&self, name: &str) -> Result<()> {
        self.update(name, |status| {
            status.state = ServiceState::Stopped;
            Ok(())
        })
    }

    fn set_startup(&self, name: &str, startup: StartupType) -> Result<()> {
        if startup == StartupType::Unknown {
            return Err(MaintenanceError::ServiceFailed(format!(
                "unsupported startup type for {name}"
            )));
        }
        self.update(name, |status| {
            status.startup = startup;
            Ok(())
        })
    }
}

/// Service backend for the current host.
///
/// # Errors
///
/// `Unsupported` off Windows.
pub fn system_services() -> Result<Box<dyn ServiceControl>> {
    #[cfg(windows)]
    {
        Ok(Box::new(WinServices))
    }

    #[cfg(not(windows))]
    {
        Err(MaintenanceError::Unsupported("Service control".to_string()))
    }
}
