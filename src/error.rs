use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

/// The three transfer phases, used to label failures and progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Export,
    Fetch,
    Import,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Export => write!(f, "export"),
            Phase::Fetch => write!(f, "fetch"),
            Phase::Import => write!(f, "import"),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum TransferError {
    #[error("{what} not found: {path}")]
    NotFound { what: String, path: PathBuf },

    #[error("artifact not produced: nothing matching `{pattern}` under {root}")]
    #[diagnostic(help("check the tool output in the log; it may have written nowhere at all"))]
    ArtifactNotProduced { root: PathBuf, pattern: String },

    #[error("process timed out after {}s: {command}", timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    #[error("failed to start {command}: {message}")]
    Spawn { command: String, message: String },

    #[error("external tool exited with code {exit_code}")]
    ToolFailed { exit_code: i32 },

    #[error("prerequisite installer not found: {0}")]
    InstallerNotFound(String),

    #[error("prerequisite install failed: {0}")]
    InstallFailed(String),

    #[error("installer download failed: {0}")]
    Download(String),

    #[error("installer download returned status {status}: {message}")]
    DownloadStatus { status: u16, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("{phase} failed at step `{step}`")]
    PhaseFailed {
        phase: Phase,
        step: &'static str,
        #[source]
        source: Box<TransferError>,
    },
}

impl TransferError {
    pub fn not_found(what: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        TransferError::NotFound {
            what: what.into(),
            path: path.into(),
        }
    }

    /// Strips any `PhaseFailed` wrapping.
    pub fn root_cause(&self) -> &TransferError {
        match self {
            TransferError::PhaseFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Attaches the failing pipeline step to an error, once.
pub trait StepContext<T> {
    fn at_step(self, phase: Phase, step: &'static str) -> Result<T, TransferError>;
}

impl<T> StepContext<T> for Result<T, TransferError> {
    fn at_step(self, phase: Phase, step: &'static str) -> Result<T, TransferError> {
        self.map_err(|err| match err {
            already @ TransferError::PhaseFailed { .. } => already,
            other => TransferError::PhaseFailed {
                phase,
                step,
                source: Box::new(other),
            },
        })
    }
}
