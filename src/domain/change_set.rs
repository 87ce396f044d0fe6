//! Static registry change sets toggled by the update-policy feature.

use serde::Serialize;

/// Direction of a change-set application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Toggle {
    Enable,
    Disable,
}

impl Toggle {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Enable => "enable",
            Self::Disable => "disable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValueKind {
    /// REG_DWORD
    Dword,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TweakValue {
    pub name: &'static str,
    pub kind: ValueKind,
    pub enabled: u32,
    pub disabled: u32,
}

impl TweakValue {
    #[must_use]
    pub const fn dword(name: &'static str, disabled: u32, enabled: u32) -> Self {
        Self {
            name,
            kind: ValueKind::Dword,
            enabled,
            disabled,
        }
    }

    #[must_use]
    pub const fn value_for(&self, toggle: Toggle) -> u32 {
        match toggle {
            Toggle::Enable => self.enabled,
            Toggle::Disable => self.disabled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TweakKey {
    /// Path under HKLM, without the hive prefix.
    pub path: &'static str,
    pub values: &'static [TweakValue],
}

/// Ordered key path -> value table. Never mutated at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub name: &'static str,
    pub keys: &'static [TweakKey],
}

impl ChangeSet {
    pub fn values(&self) -> impl Iterator<Item = (&'static str, &'static TweakValue)> + '_ {
        self.keys
            .iter()
            .flat_map(|key| key.values.iter().map(move |value| (key.path, value)))
    }
}

pub const WINDOWS_UPDATE_KEY: &str = r"SOFTWARE\Policies\Microsoft\Windows\WindowsUpdate\AU";
pub const DELIVERY_OPTIMIZATION_KEY: &str =
    r"SOFTWARE\Policies\Microsoft\Windows\DeliveryOptimization";
pub const WINDOWS_STORE_KEY: &str = r"SOFTWARE\Policies\Microsoft\WindowsStore";

/// Windows Update, Delivery Optimization and Store auto-update policies.
pub const WINDOWS_UPDATE: ChangeSet = ChangeSet {
    name: "Windows Updates",
    keys: &[
        TweakKey {
            path: WINDOWS_UPDATE_KEY,
            values: &[
                TweakValue::dword("NoAutoUpdate", 1, 0),
                TweakValue::dword("AUOptions", 1, 4),
            ],
        },
        TweakKey {
            path: DELIVERY_OPTIMIZATION_KEY,
            values: &[TweakValue::dword("DODownloadMode", 0, 1)],
        },
        TweakKey {
            path: WINDOWS_STORE_KEY,
            values: &[TweakValue::dword("AutoDownload", 2, 4)],
        },
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_flattened_in_table_order() {
        let names: Vec<_> = WINDOWS_UPDATE.values().map(|(_, v)| v.name).collect();
        assert_eq!(
            names,
            ["NoAutoUpdate", "AUOptions", "DODownloadMode", "AutoDownload"]
        );
    }

    #[test]
    fn every_value_differs_between_states() {
        for (path, value) in WINDOWS_UPDATE.values() {
            assert_ne!(
                value.value_for(Toggle::Enable),
                value.value_for(Toggle::Disable),
                "{path}\\{}",
                value.name
            );
        }
    }
}
