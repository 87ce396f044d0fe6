//! Tool consoles and exporting their contents to text files.

use crate::domain::OutputLine;
use crate::error::{MaintenanceError, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::info;

const RULE_WIDTH: usize = 80;
const SECTION_WIDTH: usize = 60;

/// Text buffer behind one tool tab.
#[derive(Debug, Clone, Default)]
pub struct Console {
    lines: Vec<String>,
}

impl Console {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a child output line; stderr lines get an `ERROR: ` prefix.
    pub fn push_output(&mut self, line: &OutputLine) -> &str {
        let text = if line.is_error() {
            format!("ERROR: {}", line.text)
        } else {
            line.text.clone()
        };
        self.push(text)
    }

    /// Append a status message from the application itself.
    pub fn push_notice(&mut self, text: impl Into<String>) -> &str {
        self.push(text.into())
    }

    fn push(&mut self, text: String) -> &str {
        self.lines.push(text);
        self.lines.last().map_or("", String::as_str)
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Writes console contents to `<dir>/<prefix>_<timestamp>.txt` with a header.
#[derive(Debug, Clone)]
pub struct LogExporter {
    dir: PathBuf,
}

impl LogExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Desktop, else home, else the working directory.
    #[must_use]
    pub fn default_dir() -> PathBuf {
        dirs::desktop_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(prefix: &str, at: DateTime<Local>) -> String {
        format!("{}_{}.txt", prefix, at.format("%Y%m%d_%H%M%S"))
    }

    pub fn header(at: DateTime<Local>) -> String {
        let rule = "=".repeat(RULE_WIDTH);
        let computer = std::env::var("COMPUTERNAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        let user = std::env::var("USERNAME")
            .or_else(|_| std::env::var("USER"))
            .unwrap_or_else(|_| "unknown".to_string());

        format!(
            "{rule}\nSYSTEM MAINTENANCE TOOLS - LOG EXPORT\n{rule}\n\
             Export Date: {}\nComputer: {computer}\nUser: {user}\nOS: {} ({})\n{rule}\n",
            at.format("%Y-%m-%d %H:%M:%S"),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }

    /// # Errors
    ///
    /// Returns error if the directory or file cannot be written.
    pub fn export(&self, prefix: &str, content: &str) -> Result<PathBuf> {
        let now = Local::now();
        let body = format!("{}\n{}\n", Self::header(now), content);
        self.write(&Self::file_name(prefix, now), &body)
    }

    /// Combine several consoles into one file, one section per title.
    /// Blank consoles are left out.
    ///
    /// # Errors
    ///
    /// `ExportFailed` when every section is blank or the file cannot be
    /// written.
    pub fn export_many<'a, I>(&self, prefix: &str, sections: I) -> Result<PathBuf>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let rule = "=".repeat(SECTION_WIDTH);
        let combined: String = sections
            .into_iter()
            .filter(|(_, content)| !content.trim().is_empty())
            .map(|(title, content)| {
                format!("\n{rule}\n{}\n{rule}\n{content}\n", title.to_uppercase())
            })
            .collect();
        if combined.is_empty() {
            return Err(MaintenanceError::ExportFailed(
                "no output to export".to_string(),
            ));
        }

        let now = Local::now();
        let body = format!("{}{}", Self::header(now), combined);
        self.write(&Self::file_name(prefix, now), &body)
    }

    fn write(&self, name: &str, body: &str) -> Result<PathBuf> {
        let path = self.dir.join(name);
        std::fs::create_dir_all(&self.dir)
            .and_then(|()| std::fs::write(&path, body))
            .map_err(|e| MaintenanceError::ExportFailed(format!("{}: {}", path.display(), e)))?;
        info!("Log exported to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stderr_lines_are_prefixed() {
        let mut console = Console::new();
        console.push_notice("Starting System File Checker...");
        console.push_output(&OutputLine::stdout("Beginning system scan."));
        let shown = console.push_output(&OutputLine::stderr("Access denied")).to_string();
        assert_eq!(shown, "ERROR: Access denied");
        assert_eq!(console.lines().len(), 3);

        console.clear();
        assert!(console.is_empty());
    }

    #[test]
    fn file_name_has_timestamp() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(LogExporter::file_name("sfc_log", at), "sfc_log_20240309_140507.txt");
    }

    #[test]
    fn export_writes_header_and_content() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = LogExporter::new(dir.path().join("logs"));
        let path = exporter.export("chkdsk_log", "line one\nline two").unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(&"=".repeat(80)));
        assert!(text.contains("SYSTEM MAINTENANCE TOOLS - LOG EXPORT"));
        assert!(text.ends_with("line one\nline two\n"));
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("chkdsk_log_"));
    }

    #[test]
    fn export_many_writes_sections() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = LogExporter::new(dir.path());
        let path = exporter
            .export_many(
                "combined_logs",
                [("Sfc", "scan ok"), ("Chkdsk", "  \n"), ("Dism", "healthy")],
            )
            .unwrap();
        assert_eq!(path.parent(), Some(exporter.dir()));

        let text = std::fs::read_to_string(path).unwrap();
        let rule = "=".repeat(60);
        assert!(text.contains(&format!("\n{rule}\nSFC\n{rule}\nscan ok\n")));
        assert!(text.contains(&format!("\n{rule}\nDISM\n{rule}\nhealthy\n")));
        assert!(!text.contains("CHKDSK"));
    }

    #[test]
    fn export_many_with_only_blank_sections_fails() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = LogExporter::new(dir.path());
        assert!(matches!(
            exporter.export_many("combined_logs", [("SFC", ""), ("DISM", " ")]),
            Err(MaintenanceError::ExportFailed(_))
        ));
    }
}
