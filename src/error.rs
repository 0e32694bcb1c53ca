//! Error taxonomy for the provisioning workflow.
//!
//! Every fatal condition maps onto one variant here; the top-level entry
//! point logs the variant and exits with a uniform status code. Cleanup
//! paths never construct these — they collect failures into a report
//! instead of aborting.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Environment unsuitable for provisioning. Never retried.
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("{tool} version {found} is below the required minimum {required}")]
    VersionTooLow {
        tool: String,
        found: String,
        required: String,
    },

    #[error("insufficient free space on {}: {available} bytes available, {required} required", volume.display())]
    InsufficientResources {
        volume: PathBuf,
        available: u64,
        required: u64,
    },

    #[error("package installation failed: {0}")]
    PackageInstall(String),

    #[error("database provisioning failed: {0}")]
    DatabaseProvision(String),

    /// The database engine's configuration directory could not be located.
    #[error("database engine configuration not found: {0}")]
    ConfigNotFound(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("archive extraction failed: {0}")]
    Extract(String),

    #[error("config rendering failed: {0}")]
    Render(String),

    #[error("service configuration failed: {0}")]
    ServiceConfig(String),

    #[error("database initialization failed: {0}")]
    DbInit(String),

    /// Log or credentials file not writable. Checked before any stage runs
    /// for the log file, so a mid-run hit means the credentials path.
    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An invoked external tool returned non-zero and was not marked
    /// best-effort by the calling stage.
    #[error("{tool} exited with status {status}: {stderr}")]
    Collaborator {
        tool: String,
        status: i32,
        stderr: String,
    },
}

impl ProvisionError {
    pub fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }
}
