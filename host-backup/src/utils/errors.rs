//! Error types for backup and restore sessions.
//!
//! Every variant belongs to exactly one [`ErrorKind`]. Validation errors are
//! raised before any I/O, resource errors abort the enclosing session after
//! its cleanup ran, and aggregate errors are raised when a session finished
//! without any unit of work succeeding.

use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification used by the engines and the command surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Resource,
    Unit,
    Aggregate,
    Cleanup,
    Internal,
}

#[derive(Error, Debug)]
pub enum BackupError {
    // Validation
    #[error("Nothing to do: hooks and apps cannot both be ignored")]
    ActionRequired,

    #[error("An archive named '{0}' already exists")]
    NameExists(String),

    #[error("Invalid archive name: '{0}'")]
    InvalidName(String),

    #[error("Output directory is forbidden: {}", .0.display())]
    OutputDirForbidden(PathBuf),

    #[error("Output directory is not empty: {}", .0.display())]
    OutputDirNotEmpty(PathBuf),

    #[error("An output directory is required when compression is disabled")]
    OutputDirRequired,

    #[error("The host is already provisioned, restoring system hooks requires --force")]
    AlreadyInstalled,

    // Resource
    #[error("Not enough disk space at {} (available: {available} B, needed: {needed} B)", .path.display())]
    InsufficientSpace {
        path: PathBuf,
        available: u64,
        needed: u64,
    },

    #[error("Unknown archive: {0}")]
    ArchiveNotFound(String),

    #[error("Archive link is broken: {}", .0.display())]
    BrokenLink(PathBuf),

    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    #[error("Unable to open archive {}: {reason}", .path.display())]
    ArchiveOpen { path: PathBuf, reason: String },

    #[error("Unable to mount archive {}: {reason}", .path.display())]
    ArchiveMount { path: PathBuf, reason: String },

    #[error("Error while writing archive {}: {reason}", .path.display())]
    ArchiveWrite { path: PathBuf, reason: String },

    #[error("Backup method '{0}' failed")]
    MethodFailed(String),

    #[error("Unable to delete {}: {reason}", .path.display())]
    DeleteFailed { path: PathBuf, reason: String },

    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("Reconfiguration failed: {0}")]
    Reconfiguration(String),

    // Unit
    #[error("Hook '{kind}/{name}' not found")]
    HookNotFound { kind: String, name: String },

    #[error("Script {} failed with {status}", .script.display())]
    ScriptFailed { script: PathBuf, status: String },

    #[error("App '{0}' is not installed")]
    AppNotFound(String),

    // Aggregate
    #[error("Nothing has been backed up")]
    NothingBackedUp,

    #[error("Nothing has been restored")]
    NothingRestored,

    // Cleanup
    #[error("Unable to unmount {}: {reason}", .path.display())]
    Unmount { path: PathBuf, reason: String },

    #[error("Cleaning {} failed", .0.display())]
    CleanupFailed(PathBuf),

    // Internal
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Manifest error: {0}")]
    Manifest(#[from] csv::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("System error: {0}")]
    System(#[from] nix::Error),
}

impl BackupError {
    pub fn kind(&self) -> ErrorKind {
        use BackupError::*;
        match self {
            ActionRequired | NameExists(_) | InvalidName(_) | OutputDirForbidden(_)
            | OutputDirNotEmpty(_) | OutputDirRequired | AlreadyInstalled => ErrorKind::Validation,

            InsufficientSpace { .. }
            | ArchiveNotFound(_)
            | BrokenLink(_)
            | InvalidArchive(_)
            | ArchiveOpen { .. }
            | ArchiveMount { .. }
            | ArchiveWrite { .. }
            | MethodFailed(_)
            | DeleteFailed { .. }
            | Provisioning(_)
            | Reconfiguration(_) => ErrorKind::Resource,

            HookNotFound { .. } | ScriptFailed { .. } | AppNotFound(_) => ErrorKind::Unit,

            NothingBackedUp | NothingRestored => ErrorKind::Aggregate,

            Unmount { .. } | CleanupFailed(_) => ErrorKind::Cleanup,

            Config(_) | Io(_) | Serialization(_) | Manifest(_) | Walk(_) | System(_) => {
                ErrorKind::Internal
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(BackupError::ActionRequired.kind(), ErrorKind::Validation);
        assert_eq!(BackupError::NothingBackedUp.kind(), ErrorKind::Aggregate);
        assert_eq!(
            BackupError::InsufficientSpace {
                path: PathBuf::from("/"),
                available: 1,
                needed: 2,
            }
            .kind(),
            ErrorKind::Resource
        );
        assert_eq!(
            BackupError::Unmount {
                path: PathBuf::from("/mnt"),
                reason: "busy".into(),
            }
            .kind(),
            ErrorKind::Cleanup
        );
    }

    #[test]
    fn test_display() {
        let err = BackupError::NameExists("20240101-000000".into());
        assert_eq!(err.to_string(), "An archive named '20240101-000000' already exists");
    }
}
