//! Error types for the installer stages.

use std::path::PathBuf;

use thiserror::Error;

/// Why the privilege and platform guard refused to continue.
#[derive(Error, Debug)]
pub enum PrecheckFailure {
    /// The effective user is not root.
    #[error("this program must be run as root (try 'sudo toxy')")]
    NotRoot,
    /// The OS release file could not be read.
    #[error("could not read {path}: {source}")]
    OsReleaseUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The OS is not a Debian-family distribution.
    #[error("unsupported operating system '{0}': a Debian-based distribution is required")]
    UnsupportedOs(String),
}

/// An error that aborts an installer run.
#[derive(Error, Debug)]
pub enum InstallError {
    /// The guard rejected this host before anything was changed.
    #[error("precheck failed: {0}")]
    Precheck(#[from] PrecheckFailure),
    /// Adding the Tor repository or refreshing the package index failed.
    #[error("repository setup failed: {0}")]
    Repository(String),
    /// The package manager could not install the packages.
    #[error("package installation failed: {0}")]
    Install(String),
    /// The ProxyChains configuration could not be written.
    #[error("could not write {path}: {source}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The Tor service could not be started.
    #[error("could not start the tor service: {0}")]
    Service(String),
    /// Traffic is not reaching the Tor network through the local proxy.
    #[error("tor verification failed: {0}")]
    Verify(String),
    /// The operator did not confirm the run.
    #[error("aborted: {0}")]
    Aborted(&'static str),
}

/// A non-fatal problem hit while cleaning up a previous install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupWarning {
    /// What cleanup was attempting.
    pub action: String,
    /// What went wrong.
    pub detail: String,
}

impl std::fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.action, self.detail)
    }
}
