//! Elevation helpers - token queries and relaunching the executable as admin.

use crate::error::{MaintenanceError, Result};
use tracing::warn;

/// Privilege level of the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elevation {
    Elevated,
    Limited,
}

impl Elevation {
    #[must_use]
    pub fn current() -> Self {
        if is_elevated() {
            Self::Elevated
        } else {
            Self::Limited
        }
    }

    #[must_use]
    pub const fn is_elevated(&self) -> bool {
        matches!(self, Self::Elevated)
    }
}

/// Check if the current process is running with admin privileges
#[must_use]
pub fn is_elevated() -> bool {
    #[cfg(windows)]
    {
        use windows::Win32::Foundation::{CloseHandle, HANDLE};
        use windows::Win32::Security::{
            GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY,
        };
        use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

        unsafe {
            let mut token = HANDLE::default();

            if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &raw mut token).is_err() {
                return false;
            }

            let mut elevation = TOKEN_ELEVATION::default();
            let mut return_length = 0u32;

            #[allow(clippy::cast_possible_truncation)]
            let result = GetTokenInformation(
                token,
                TokenElevation,
                Some((&raw mut elevation).cast()),
                std::mem::size_of::<TOKEN_ELEVATION>() as u32,
                &raw mut return_length,
            );

            let _ = CloseHandle(token);

            result.is_ok() && elevation.TokenIsElevated != 0
        }
    }

    #[cfg(not(windows))]
    {
        false
    }
}

/// Whether User Account Control is switched on. Assumed on when the policy
/// value cannot be read.
#[must_use]
pub fn is_uac_enabled() -> bool {
    #[cfg(windows)]
    {
        use winreg::enums::HKEY_LOCAL_MACHINE;
        use winreg::RegKey;

        RegKey::predef(HKEY_LOCAL_MACHINE)
            .open_subkey(r"SOFTWARE\Microsoft\Windows\CurrentVersion\Policies\System")
            .and_then(|key| key.get_value::<u32, _>("EnableLUA"))
            .map_or(true, |value| value == 1)
    }

    #[cfg(not(windows))]
    {
        true
    }
}

/// Relaunch the current executable with the `runas` verb, forwarding `args`.
///
/// The caller is expected to exit once this returns `Ok`. A cancelled UAC
/// prompt surfaces as `ElevationRequired`.
///
/// # Errors
///
/// Returns error if the executable path cannot be determined or ShellExecuteW
/// refuses the request. Always fails on non-Windows hosts.
pub fn run_as_admin(args: &[String]) -> Result<()> {
    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use windows::core::PCWSTR;
        use windows::Win32::UI::Shell::ShellExecuteW;
        use windows::Win32::UI::WindowsAndMessaging::SW_SHOW;

        let exe = std::env::current_exe()?;
        tracing::info!("Relaunching {} as administrator", exe.display());

        let wide = |s: &std::ffi::OsStr| -> Vec<u16> {
            s.encode_wide().chain(std::iter::once(0)).collect()
        };

        let exe_wide = wide(exe.as_os_str());
        let op_wide = wide(std::ffi::OsStr::new("runas"));
        let params = args
            .iter()
            .map(|a| {
                if a.contains(' ') {
                    format!("\"{a}\"")
                } else {
                    a.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        let params_wide = wide(std::ffi::OsStr::new(&params));

        unsafe {
            let hinst = ShellExecuteW(
                None,
                PCWSTR(op_wide.as_ptr()),
                PCWSTR(exe_wide.as_ptr()),
                PCWSTR(params_wide.as_ptr()),
                PCWSTR::null(),
                SW_SHOW,
            );

            // Values <= 32 are error codes
            let rv = hinst.0 as isize;
            if rv <= 32 {
                warn!("ShellExecuteW failed: code {}", rv);
                return Err(MaintenanceError::ElevationRequired(format!(
                    "{} (ShellExecuteW code {rv})",
                    exe.display()
                )));
            }
        }

        Ok(())
    }

    #[cfg(not(windows))]
    {
        let _ = args;
        warn!("Relaunch as administrator requested on a non-Windows host");
        Err(MaintenanceError::ElevationRequired(
            "relaunch (only supported on Windows)".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elevation_matches_token_query() {
        assert_eq!(Elevation::current().is_elevated(), is_elevated());
    }

    #[cfg(not(windows))]
    #[test]
    fn relaunch_is_refused_off_windows() {
        assert!(matches!(
            run_as_admin(&[]),
            Err(MaintenanceError::ElevationRequired(_))
        ));
    }
}
