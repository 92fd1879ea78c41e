//! Exposing an archive's tree under a mount point.

use crate::config::{Config, MountStrategy};
use crate::{BackupError, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::path::Path;
use std::process::Command;
use tracing::debug;

#[derive(Debug, Clone)]
pub enum Mounter {
    /// Read-only FUSE mount through an external helper
    Helper { mount: String, unmount: String },
    /// Unpack into the mount point
    Extract,
}

impl Mounter {
    pub fn from_config(config: &Config) -> Self {
        match config.restore.mount {
            MountStrategy::Archivemount => Mounter::Helper {
                mount: config.restore.mount_helper.clone(),
                unmount: config.restore.unmount_helper.clone(),
            },
            MountStrategy::Extract => Mounter::Extract,
        }
    }

    pub fn mount(&self, archive: &Path, target: &Path) -> Result<()> {
        let mount_error = |reason: String| BackupError::ArchiveMount {
            path: archive.to_path_buf(),
            reason,
        };

        match self {
            Mounter::Helper { mount, .. } => {
                let status = Command::new(mount)
                    .arg("-o")
                    .arg("readonly")
                    .arg(archive)
                    .arg(target)
                    .status()
                    .map_err(|e| mount_error(format!("{}: {}", mount, e)))?;
                if !status.success() {
                    return Err(mount_error(format!("{} exited with {}", mount, status)));
                }
            }
            Mounter::Extract => {
                let file = File::open(archive).map_err(|e| mount_error(e.to_string()))?;
                tar::Archive::new(GzDecoder::new(file))
                    .unpack(target)
                    .map_err(|e| mount_error(e.to_string()))?;
            }
        }

        debug!(archive = %archive.display(), target = %target.display(), "Archive mounted");
        Ok(())
    }

    pub fn unmount(&self, target: &Path) -> Result<()> {
        let Mounter::Helper { unmount, .. } = self else {
            return Ok(());
        };

        let status = Command::new(unmount)
            .arg(target)
            .status()
            .map_err(|e| BackupError::Unmount {
                path: target.to_path_buf(),
                reason: e.to_string(),
            })?;
        if !status.success() {
            return Err(BackupError::Unmount {
                path: target.to_path_buf(),
                reason: format!("{} exited with {}", unmount, status),
            });
        }
        Ok(())
    }
}

/// Check that `archive` opens as a gzip-compressed tarball with a readable
/// first member.
pub fn verify_archive(archive: &Path) -> Result<()> {
    let open_error = |reason: String| BackupError::ArchiveOpen {
        path: archive.to_path_buf(),
        reason,
    };

    let file = File::open(archive).map_err(|e| open_error(e.to_string()))?;
    let mut tarball = tar::Archive::new(GzDecoder::new(file));
    let mut entries = tarball.entries().map_err(|e| open_error(e.to_string()))?;
    match entries.next() {
        Some(Ok(_)) => Ok(()),
        Some(Err(e)) => Err(open_error(e.to_string())),
        None => Err(open_error("archive is empty".to_string())),
    }
}

/// Sum of the member sizes of `archive`.
pub fn members_size(archive: &Path) -> Result<u64> {
    let file = File::open(archive)?;
    let mut tarball = tar::Archive::new(GzDecoder::new(file));
    let mut total = 0;
    for entry in tarball.entries()? {
        total += entry?.size();
    }
    Ok(total)
}
