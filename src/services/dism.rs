//! DISM output interpretation - progress extraction and health analysis.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

fn progress_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"\[[=\s]*\]\s*(\d+(?:\.\d+)?)%",
            r"\[[=\s]*(\d+(?:\.\d+)?)%[=\s]*\]",
            r"(?i)(\d+(?:\.\d+)?)%\s*complete",
            r"(?i)progress:\s*(\d+(?:\.\d+)?)%",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Percentage from a DISM progress line such as `[=====     ] 55.0%`.
pub fn extract_progress(line: &str) -> Option<u8> {
    progress_patterns().iter().find_map(|re| {
        let value: f64 = re.captures(line)?.get(1)?.as_str().parse().ok()?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Some(value.clamp(0.0, 100.0) as u8)
    })
}

const OPERATION_INDICATORS: [&str; 7] = [
    "Scanning the image",
    "Restoring the image",
    "Downloading files",
    "Installing updates",
    "Verifying integrity",
    "Cleaning up",
    "Processing component",
];

/// Name of the phase DISM reports on this line, if any.
pub fn extract_operation(line: &str) -> Option<&'static str> {
    let lower = line.to_lowercase();
    OPERATION_INDICATORS
        .iter()
        .find(|indicator| lower.contains(&indicator.to_lowercase()))
        .copied()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DismHealth {
    Healthy,
    Corrupted,
    Repairable,
    Error,
    Unknown,
}

impl DismHealth {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Corrupted => "corrupted",
            Self::Repairable => "repairable",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

/// Classify `/checkhealth` output.
pub fn analyze_checkhealth(output: &str) -> DismHealth {
    let lower = output.to_lowercase();

    if lower.contains("no component store corruption detected") {
        DismHealth::Healthy
    } else if lower.contains("the component store is repairable") {
        DismHealth::Repairable
    } else if lower.contains("component store corruption detected") {
        DismHealth::Corrupted
    } else if lower.contains("error") || lower.contains("failed") {
        DismHealth::Error
    } else {
        DismHealth::Unknown
    }
}

pub fn recommendations(health: DismHealth) -> &'static [&'static str] {
    match health {
        DismHealth::Healthy => &[
            "System image appears healthy",
            "Consider running SFC /scannow for additional verification",
            "Regular maintenance: Run DISM health checks monthly",
        ],
        DismHealth::Corrupted => &[
            "System image corruption detected",
            "Run DISM /RestoreHealth immediately",
            "After DISM repair, run SFC /scannow",
            "Consider creating a system backup after repair",
        ],
        DismHealth::Repairable => &[
            "System image has repairable corruption",
            "Run DISM /RestoreHealth to fix issues",
            "Monitor system performance after repair",
        ],
        DismHealth::Error => &[
            "Error occurred during health check",
            "Try running as administrator",
            "Check Windows Update service status",
            "Consider running in Safe Mode if issues persist",
        ],
        DismHealth::Unknown => &[
            "Unable to determine system health status",
            "Try running DISM /ScanHealth for detailed analysis",
            "Check system logs for additional information",
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_bar_line() {
        assert_eq!(
            extract_progress("[===========                ] 55.0%"),
            Some(55)
        );
        assert_eq!(
            extract_progress("[==========================100.0%==========================]"),
            Some(100)
        );
        assert_eq!(
            extract_progress("[=====                      10.0%                          ]"),
            Some(10)
        );
        assert_eq!(extract_progress("[=====    ] 100%"), Some(100));
    }

    #[test]
    fn textual_progress_forms() {
        assert_eq!(extract_progress("75.5% complete"), Some(75));
        assert_eq!(extract_progress("Progress: 12%"), Some(12));
        assert_eq!(extract_progress("Deployment Image Servicing and Management tool"), None);
    }

    #[test]
    fn operation_phase() {
        assert_eq!(
            extract_operation("Downloading files from Windows Update..."),
            Some("Downloading files")
        );
        assert_eq!(extract_operation("Image Version: 10.0.22631.1"), None);
    }

    #[test]
    fn checkhealth_classification() {
        assert_eq!(
            analyze_checkhealth("No component store corruption detected.\nThe operation completed successfully."),
            DismHealth::Healthy
        );
        assert_eq!(
            analyze_checkhealth("The component store is repairable."),
            DismHealth::Repairable
        );
        assert_eq!(
            analyze_checkhealth("Component store corruption detected."),
            DismHealth::Corrupted
        );
        assert_eq!(analyze_checkhealth("Error: 87"), DismHealth::Error);
        assert_eq!(analyze_checkhealth(""), DismHealth::Unknown);
    }

    #[test]
    fn corrupted_image_recommends_restore() {
        assert!(recommendations(DismHealth::Corrupted)
            .iter()
            .any(|r| r.contains("RestoreHealth")));
    }
}
