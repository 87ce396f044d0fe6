pub mod elevation;
pub mod process;
pub mod registry;
pub mod windows_service;

pub use elevation::Elevation;
pub use process::{KillHandle, ProcessRunner, RunningProcess};
pub use registry::{system_store, MemoryRegistry, RegistryStore};
pub use windows_service::{system_services, MemoryServices, ServiceControl};
