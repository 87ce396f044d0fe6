//! Registry tweak service - change-set application and ad-hoc value helpers.

use crate::domain::{ChangeSet, Toggle};
use crate::error::{MaintenanceError, Result};
use crate::repositories::registry::RegistryStore;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

const HIVE: &str = "HKLM";

/// One attempted key open or value write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyEntry {
    pub key: String,
    /// `None` when the key itself could not be opened or created.
    pub value: Option<String>,
    pub data: Option<u32>,
    pub error: Option<String>,
}

impl ApplyEntry {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn log_line(&self) -> String {
        match (&self.value, self.data, &self.error) {
            (Some(value), Some(data), None) => {
                format!("Set {HIVE}\\{}\\{} = {}", self.key, value, data)
            }
            (Some(value), _, Some(e)) => {
                format!("Failed to modify {HIVE}\\{}\\{}: {}", self.key, value, e)
            }
            (None, _, Some(e)) => format!("Failed to modify {HIVE}\\{}: {}", self.key, e),
            _ => format!("{HIVE}\\{}", self.key),
        }
    }
}

/// Per-value log of a change-set application. Partial application is normal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub change_set: &'static str,
    pub toggle: Toggle,
    pub entries: Vec<ApplyEntry>,
}

impl ApplyReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(ApplyEntry::is_ok)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ApplyEntry> {
        self.entries.iter().filter(|e| !e.is_ok())
    }

    pub fn log_lines(&self) -> Vec<String> {
        self.entries.iter().map(ApplyEntry::log_line).collect()
    }
}

/// Current registry state of a change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PolicyState {
    Enabled,
    Disabled,
    /// Some values match one state, some the other or neither.
    Mixed,
    /// None of the values exist.
    NotConfigured,
}

impl PolicyState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Mixed => "partially configured",
            Self::NotConfigured => "not configured",
        }
    }
}

pub struct RegistryManager {
    store: Box<dyn RegistryStore>,
}

impl RegistryManager {
    pub fn new(store: Box<dyn RegistryStore>) -> Self {
        Self { store }
    }

    /// Write every value of `change_set` for `toggle`. Each key and value is
    /// attempted independently; nothing is rolled back.
    #[instrument(skip(self, change_set), fields(change_set = change_set.name))]
    pub fn apply_change_set(&self, change_set: &ChangeSet, toggle: Toggle) -> ApplyReport {
        let mut entries = Vec::new();

        for key in change_set.keys {
            if let Err(e) = self.store.ensure_key(key.path) {
                error!("Failed to open {HIVE}\\{}: {}", key.path, e);
                entries.push(ApplyEntry {
                    key: key.path.to_string(),
                    value: None,
                    data: None,
                    error: Some(e.to_string()),
                });
                continue;
            }

            for value in key.values {
                let data = value.value_for(toggle);
                let error = match self.store.write_dword(key.path, value.name, data) {
                    Ok(()) => {
                        info!("Set {HIVE}\\{}\\{} = {}", key.path, value.name, data);
                        None
                    }
                    Err(e) => {
                        error!("Failed to set {HIVE}\\{}\\{}: {}", key.path, value.name, e);
                        Some(e.to_string())
                    }
                };
                entries.push(ApplyEntry {
                    key: key.path.to_string(),
                    value: Some(value.name.to_string()),
                    data: Some(data),
                    error,
                });
            }
        }

        ApplyReport {
            change_set: change_set.name,
            toggle,
            entries,
        }
    }

    /// Compare the registry against both states of `change_set`.
    pub fn inspect(&self, change_set: &ChangeSet) -> PolicyState {
        let mut enabled = 0;
        let mut disabled = 0;
        let mut missing = 0;
        let mut total = 0;

        for (key, value) in change_set.values() {
            total += 1;
            match self.store.read_dword(key, value.name) {
                Ok(Some(v)) if v == value.enabled => enabled += 1,
                Ok(Some(v)) if v == value.disabled => disabled += 1,
                Ok(None) => missing += 1,
                _ => {}
            }
        }

        if missing == total {
            PolicyState::NotConfigured
        } else if enabled == total {
            PolicyState::Enabled
        } else if disabled == total {
            PolicyState::Disabled
        } else {
            PolicyState::Mixed
        }
    }

    /// Read a DWORD, falling back to `default` when missing or unreadable.
    pub fn get(&self, key: &str, value: &str, default: u32) -> u32 {
        match self.store.read_dword(key, value) {
            Ok(Some(data)) => data,
            Ok(None) => default,
            Err(e) => {
                warn!("Failed to read {HIVE}\\{}\\{}: {}", key, value, e);
                default
            }
        }
    }

    /// # Errors
    ///
    /// `RegistryWriteFailed` with the full value path embedded.
    pub fn set(&self, key: &str, value: &str, data: u32) -> Result<()> {
        self.store.write_dword(key, value, data).map_err(|e| {
            MaintenanceError::RegistryWriteFailed(format!("{HIVE}\\{key}\\{value}: {e}"))
        })?;
        info!("Set {HIVE}\\{}\\{} = {}", key, value, data);
        Ok(())
    }

    /// Deleting a value that does not exist succeeds.
    ///
    /// # Errors
    ///
    /// `RegistryDeleteFailed` with the full value path embedded.
    pub fn delete(&self, key: &str, value: &str) -> Result<()> {
        self.store.delete_value(key, value).map_err(|e| {
            MaintenanceError::RegistryDeleteFailed(format!("{HIVE}\\{key}\\{value}: {e}"))
        })?;
        info!("Deleted {HIVE}\\{}\\{}", key, value);
        Ok(())
    }

    pub fn exists(&self, key: &str) -> bool {
        self.store.key_exists(key).unwrap_or_else(|e| {
            warn!("Failed to open {HIVE}\\{}: {}", key, e);
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        DELIVERY_OPTIMIZATION_KEY, WINDOWS_STORE_KEY, WINDOWS_UPDATE, WINDOWS_UPDATE_KEY,
    };
    use crate::repositories::registry::MemoryRegistry;
    use std::sync::Arc;

    fn manager() -> (RegistryManager, Arc<MemoryRegistry>) {
        let store = Arc::new(MemoryRegistry::new());
        (
            RegistryManager::new(Box::new(Arc::clone(&store))),
            store,
        )
    }

    #[test]
    fn set_then_get_returns_written_value() {
        let (reg, _) = manager();
        reg.set(r"SOFTWARE\Policies\Microsoft\Windows\WindowsUpdate\AU", "NoAutoUpdate", 1)
            .unwrap();
        assert_eq!(
            reg.get(r"SOFTWARE\Policies\Microsoft\Windows\WindowsUpdate\AU", "NoAutoUpdate", 0),
            1
        );
    }

    #[test]
    fn get_falls_back_to_default() {
        let (reg, _) = manager();
        assert_eq!(reg.get(WINDOWS_UPDATE_KEY, "Missing", 42), 42);
        assert!(!reg.exists(WINDOWS_UPDATE_KEY));
    }

    #[test]
    fn disable_then_enable_restores_enabled_values() {
        let (reg, store) = manager();

        let report = reg.apply_change_set(&WINDOWS_UPDATE, Toggle::Disable);
        assert!(report.is_complete());
        assert_eq!(reg.inspect(&WINDOWS_UPDATE), PolicyState::Disabled);

        let report = reg.apply_change_set(&WINDOWS_UPDATE, Toggle::Enable);
        assert!(report.is_complete());
        for (key, value) in WINDOWS_UPDATE.values() {
            assert_eq!(
                store.read_dword(key, value.name).unwrap(),
                Some(value.enabled),
                "{key}\\{}",
                value.name
            );
        }
        assert_eq!(reg.inspect(&WINDOWS_UPDATE), PolicyState::Enabled);
    }

    #[test]
    fn failed_key_does_not_stop_later_keys() {
        let (reg, store) = manager();
        store.deny_writes(DELIVERY_OPTIMIZATION_KEY);

        let report = reg.apply_change_set(&WINDOWS_UPDATE, Toggle::Disable);
        assert!(!report.is_complete());

        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].key, DELIVERY_OPTIMIZATION_KEY);
        assert!(failures[0].log_line().starts_with("Failed to modify HKLM\\"));

        // The key after the failing one was still written
        assert_eq!(store.read_dword(WINDOWS_STORE_KEY, "AutoDownload").unwrap(), Some(2));
        assert_eq!(reg.inspect(&WINDOWS_UPDATE), PolicyState::Mixed);
    }

    #[test]
    fn report_logs_one_line_per_write() {
        let (reg, _) = manager();
        let lines = reg.apply_change_set(&WINDOWS_UPDATE, Toggle::Enable).log_lines();
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            format!("Set HKLM\\{WINDOWS_UPDATE_KEY}\\NoAutoUpdate = 0")
        );
    }

    #[test]
    fn set_and_delete_errors_embed_path() {
        let (reg, store) = manager();
        store.deny_writes("Locked");

        let err = reg.set("Locked", "Value", 1).unwrap_err();
        assert!(matches!(&err, MaintenanceError::RegistryWriteFailed(m) if m.starts_with("HKLM\\Locked\\Value")));

        let err = reg.delete("Locked", "Value").unwrap_err();
        assert!(matches!(&err, MaintenanceError::RegistryDeleteFailed(m) if m.contains("Locked\\Value")));
    }

    #[test]
    fn delete_removes_value_and_tolerates_missing() {
        let (reg, _) = manager();
        reg.set(WINDOWS_STORE_KEY, "AutoDownload", 4).unwrap();
        reg.delete(WINDOWS_STORE_KEY, "AutoDownload").unwrap();
        reg.delete(WINDOWS_STORE_KEY, "AutoDownload").unwrap();
        assert_eq!(reg.get(WINDOWS_STORE_KEY, "AutoDownload", 0), 0);
        assert!(reg.exists(WINDOWS_STORE_KEY));
    }

    #[test]
    fn untouched_registry_is_not_configured() {
        let (reg, _) = manager();
        assert_eq!(reg.inspect(&WINDOWS_UPDATE), PolicyState::NotConfigured);
    }
}
