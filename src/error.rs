//! Error types for backup runs.

use std::io;
use thiserror::Error;

/// Errors that abort a backup run.
///
/// Every variant maps to a classification label, a remediation hint and a
/// process exit code so the scheduler can surface the failure.
#[derive(Error, Debug)]
pub enum BackupError {
    /// Missing or invalid configuration value.
    #[error("{0}")]
    Config(String),

    /// The storage repository is public, or its visibility could not be confirmed.
    #[error("{0}")]
    SecurityBlocked(String),

    /// Network failure, timeout, authentication rejection or non-success status.
    #[error("{0}")]
    Transport(String),

    /// The remote body is not a valid JSON document.
    #[error("{0}")]
    Parse(String),

    /// A snapshot or the latest pointer could not be written.
    #[error("{0}")]
    StoreWrite(String),

    /// I/O error outside the write path.
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// HTTP client error that was not classified at the call site.
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

impl BackupError {
    /// Short classification label printed in front of the diagnostic.
    pub fn kind(&self) -> &'static str {
        match self {
            BackupError::Config(_) => "configuration error",
            BackupError::SecurityBlocked(_) => "security check failed",
            BackupError::Transport(_) | BackupError::ReqwestError(_) => "transport error",
            BackupError::Parse(_) | BackupError::SerdeJsonError(_) => "parse error",
            BackupError::StoreWrite(_) => "store write error",
            BackupError::IoError(_) => "i/o error",
        }
    }

    /// What the operator should do about it.
    pub fn remediation(&self) -> &'static str {
        match self {
            BackupError::Config(_) => {
                "Set BACKUP_URL, BACKUP_USERNAME, BACKUP_PASSWORD, GITHUB_REPOSITORY and \
                 GITHUB_TOKEN; MAX_BACKUPS must be a positive integer."
            }
            BackupError::SecurityBlocked(_) => {
                "Make the repository private (Settings -> Danger Zone -> Change repository \
                 visibility -> Make private), then re-run the workflow or wait for the next \
                 scheduled run."
            }
            BackupError::Transport(_) | BackupError::ReqwestError(_) => {
                "Check that the server is running, the URL and port are correct, no firewall \
                 blocks the connection and the credentials are valid. The next scheduled run \
                 will try again."
            }
            BackupError::Parse(_) | BackupError::SerdeJsonError(_) => {
                "The endpoint did not return JSON; verify BACKUP_URL points at the management \
                 service and not at a login or proxy page."
            }
            BackupError::StoreWrite(_) | BackupError::IoError(_) => {
                "Check free disk space and write permissions on the backup directory."
            }
        }
    }

    /// Process exit code for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            BackupError::Config(_) => 2,
            BackupError::SecurityBlocked(_) => 3,
            BackupError::Transport(_) | BackupError::ReqwestError(_) => 4,
            BackupError::Parse(_) | BackupError::SerdeJsonError(_) => 5,
            BackupError::StoreWrite(_) => 6,
            BackupError::IoError(_) => 1,
        }
    }
}

/// Digest computation failed; callers treat this as "cannot prove equality".
#[derive(Error, Debug)]
pub enum FingerprintError {
    /// The input could not be read.
    #[error("failed to read input for hashing: {0}")]
    Read(#[from] io::Error),

    /// The hashing task did not complete.
    #[error("hashing task failed: {0}")]
    Task(String),
}
