//! Output and result types shared by the runner and the session.

use crate::error::MaintenanceError;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// One line of child output, without its line terminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputLine {
    pub stream: Stream,
    pub text: String,
}

impl OutputLine {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stream: Stream::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            stream: Stream::Stderr,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.stream == Stream::Stderr
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessExit {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub cancelled: bool,
}

impl ProcessExit {
    #[must_use]
    pub fn success(&self) -> bool {
        !self.cancelled && self.code == Some(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedOutput {
    pub exit: ProcessExit,
    pub stdout: String,
    pub stderr: String,
}

/// How a tracked invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed(Option<i32>),
    Cancelled,
    Failed(MaintenanceError),
}

impl Outcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(Some(0)))
    }

    pub fn summary(&self) -> String {
        match self {
            Self::Completed(Some(code)) => format!("Process completed with exit code: {code}"),
            Self::Completed(None) => "Process terminated without an exit code".to_string(),
            Self::Cancelled => "Process terminated by user.".to_string(),
            Self::Failed(e) => e.to_console_line(),
        }
    }
}

impl From<ProcessExit> for Outcome {
    fn from(exit: ProcessExit) -> Self {
        if exit.cancelled {
            Self::Cancelled
        } else {
            Self::Completed(exit.code)
        }
    }
}
