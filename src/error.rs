//! Error taxonomy for the launcher.
//!
//! Lock bookkeeping errors are logged and dropped by their callers; validation
//! and launch errors are shown to the user without stopping the interactive
//! surface; a missing dependency ends the process with exit code 1.

use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum LauncherError {
    #[error("lock file {path} unavailable: {source}")]
    LockIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Validation(String),

    #[error("{message}")]
    Launch { message: String, remedy: Option<String> },

    #[error("{0}")]
    DependencyMissing(String),

    #[error("a bridge process is already running (pid {0})")]
    AlreadyRunning(u32),
}

impl LauncherError {
    /// Short title used for warning dialogs.
    #[cfg(feature = "gui")]
    pub fn title(&self) -> &'static str {
        match self {
            Self::LockIo { .. } => "Lock file error",
            Self::Validation(_) => "Invalid input",
            Self::Launch { .. } => "Launch failed",
            Self::DependencyMissing(_) => "Dependency Error",
            Self::AlreadyRunning(_) => "Already running",
        }
    }

    /// Remediation text, if any, suitable for appending to the log view.
    pub fn remedy(&self) -> Option<&str> {
        match self {
            Self::Launch { remedy, .. } => remedy.as_deref(),
            _ => None,
        }
    }
}
