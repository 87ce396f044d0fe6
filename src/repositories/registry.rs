//! Registry access helpers - thin wrapper over winreg, plus an in-memory
//! store for tests.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::{Arc, RwLock};

/// DWORD access under a single machine-wide hive. Paths are relative to the
/// hive. Missing values read as `Ok(None)`.
pub trait RegistryStore: Send + Sync {
    fn read_dword(&self, key: &str, value: &str) -> io::Result<Option<u32>>;

    /// Open the key, creating it (and its parents) if needed.
    fn ensure_key(&self, key: &str) -> io::Result<()>;

    fn write_dword(&self, key: &str, value: &str, data: u32) -> io::Result<()>;

    /// Deleting a value that does not exist is not an error.
    fn delete_value(&self, key: &str, value: &str) -> io::Result<()>;

    fn key_exists(&self, key: &str) -> io::Result<bool>;
}

impl<T: RegistryStore + ?Sized> RegistryStore for Arc<T> {
    fn read_dword(&self, key: &str, value: &str) -> io::Result<Option<u32>> {
        (**self).read_dword(key, value)
    }

    fn ensure_key(&self, key: &str) -> io::Result<()> {
        (**self).ensure_key(key)
    }

    fn write_dword(&self, key: &str, value: &str, data: u32) -> io::Result<()> {
        (**self).write_dword(key, value, data)
    }

    fn delete_value(&self, key: &str, value: &str) -> io::Result<()> {
        (**self).delete_value(key, value)
    }

    fn key_exists(&self, key: &str) -> io::Result<bool> {
        (**self).key_exists(key)
    }
}

/// HKEY_LOCAL_MACHINE through winreg.
#[cfg(windows)]
#[derive(Debug, Default, Clone, Copy)]
pub struct WinRegistry;

#[cfg(windows)]
impl WinRegistry {
    fn hklm() -> winreg::RegKey {
        winreg::RegKey::predef(winreg::enums::HKEY_LOCAL_MACHINE)
    }
}

#[cfg(windows)]
impl RegistryStore for WinRegistry {
    fn read_dword(&self, key: &str, value: &str) -> io::Result<Option<u32>> {
        let key = match Self::hklm().open_subkey(key) {
            Ok(k) => k,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        match key.get_value::<u32, _>(value) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn ensure_key(&self, key: &str) -> io::Result<()> {
        Self::hklm().create_subkey(key).map(|_| ())
    }

    fn write_dword(&self, key: &str, value: &str, data: u32) -> io::Result<()> {
        let (key, _) = Self::hklm().create_subkey(key)?;
        key.set_value(value, &data)
    }

    fn delete_value(&self, key: &str, value: &str) -> io::Result<()> {
        use winreg::enums::KEY_SET_VALUE;

        let key = match Self::hklm().open_subkey_with_flags(key, KEY_SET_VALUE) {
            Ok(k) => k,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        match key.delete_value(value) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn key_exists(&self, key: &str) -> io::Result<bool> {
        match Self::hklm().open_subkey(key) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// In-process hive. Key paths compare case-insensitively like the real
/// registry; values are stored under their lowercased name too.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    keys: RwLock<BTreeMap<String, BTreeMap<String, u32>>>,
    denied: RwLock<BTreeSet<String>>,
}

impl MemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write or delete under `key` fail with `PermissionDenied`.
    pub fn deny_writes(&self, key: &str) {
        self.denied
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(normalize(key));
    }

    fn check_writable(&self, key: &str) -> io::Result<()> {
        let denied = self
            .denied
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if denied.contains(key) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "Access is denied.",
            ));
        }
        Ok(())
    }
}

fn normalize(key: &str) -> String {
    key.trim_matches('\\').to_ascii_lowercase()
}

/// Insert `key` and every ancestor, returning the values of `key`.
fn create_path<'a>(
    keys: &'a mut BTreeMap<String, BTreeMap<String, u32>>,
    key: &str,
) -> &'a mut BTreeMap<String, u32> {
    for (i, _) in key.match_indices('\\') {
        keys.entry(key[..i].to_string()).or_default();
    }
    keys.entry(key.to_string()).or_default()
}

impl RegistryStore for MemoryRegistry {
    fn read_dword(&self, key: &str, value: &str) -> io::Result<Option<u32>> {
        let keys = self
            .keys
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(keys
            .get(&normalize(key))
            .and_then(|values| values.get(&value.to_ascii_lowercase()))
            .copied())
    }

    fn ensure_key(&self, key: &str) -> io::Result<()> {
        let key = normalize(key);
        self.check_writable(&key)?;
        let mut keys = self
            .keys
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        create_path(&mut keys, &key);
        Ok(())
    }

    fn write_dword(&self, key: &str, value: &str, data: u32) -> io::Result<()> {
        let key = normalize(key);
        self.check_writable(&key)?;
        let mut keys = self
            .keys
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        create_path(&mut keys, &key).insert(value.to_ascii_lowercase(), data);
        Ok(())
    }

    fn delete_value(&self, key: &str, value: &str) -> io::Result<()> {
        let key = normalize(key);
        self.check_writable(&key)?;
        if let Some(values) = self
            .keys
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get_mut(&key)
        {
            values.remove(&value.to_ascii_lowercase());
        }
        Ok(())
    }

    fn key_exists(&self, key: &str) -> io::Result<bool> {
        Ok(self
            .keys
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains_key(&normalize(key)))
    }
}

/// Store for the current host: the real HKLM.
///
/// # Errors
///
/// `Unsupported` off Windows.
pub fn system_store() -> crate::error::Result<Box<dyn RegistryStore>> {
    #[cfg(windows)]
    {
        Ok(Box::new(WinRegistry))
    }

    #[cfg(not(windows))]
    {
        Err(crate::error::MaintenanceError::Unsupported(
            "Registry access".to_string(),
        ))
    }
}
