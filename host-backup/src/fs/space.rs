//! Free-space admission control.
//!
//! A fixed margin is added to every requirement. Only the aggregate archive
//! size is known, so selective restores are checked pessimistically against
//! the whole archive and merely warned about, unless even the small
//! configuration margin is unavailable.

use crate::config::Config;
use crate::{BackupError, Result};
use nix::sys::statvfs::statvfs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// How strictly a shortfall is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpacePolicy {
    /// Full backup creation or full restore: any shortfall is fatal.
    Strict,
    /// Partial restore. `conf_only` is set when neither apps nor data hooks
    /// are being restored.
    Selective { conf_only: bool },
}

/// Outcome of comparing a requirement with the available space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceVerdict {
    Enough,
    /// Short against the total but tolerated for a partial restore
    MayBeShort { available: u64, needed: u64 },
    Insufficient { available: u64, needed: u64 },
}

#[derive(Debug, Clone, Copy)]
pub struct SpaceGuard {
    margin: u64,
    conf_margin: u64,
}

impl SpaceGuard {
    pub fn new(margin: u64, conf_margin: u64) -> Self {
        Self { margin, conf_margin }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.margin_bytes(), config.conf_margin_bytes())
    }

    /// Decide without touching the filesystem.
    pub fn evaluate(&self, required: u64, available: u64, policy: SpacePolicy) -> SpaceVerdict {
        let needed = required.saturating_add(self.margin);
        if available >= needed {
            return SpaceVerdict::Enough;
        }

        match policy {
            SpacePolicy::Strict => SpaceVerdict::Insufficient { available, needed },
            SpacePolicy::Selective { conf_only: true } if available < self.conf_margin => {
                SpaceVerdict::Insufficient {
                    available,
                    needed: self.conf_margin,
                }
            }
            SpacePolicy::Selective { .. } => SpaceVerdict::MayBeShort { available, needed },
        }
    }

    /// Fail with [`BackupError::InsufficientSpace`] when `target`'s
    /// filesystem cannot take `required` bytes under `policy`.
    pub fn ensure_space(&self, required: u64, target: &Path, policy: SpacePolicy) -> Result<()> {
        let available = available_space(target)?;

        match self.evaluate(required, available, policy) {
            SpaceVerdict::Enough => Ok(()),
            SpaceVerdict::MayBeShort { available, needed } => {
                warn!(
                    path = %target.display(),
                    available,
                    needed,
                    "There may not be enough disk space for this restore"
                );
                Ok(())
            }
            SpaceVerdict::Insufficient { available, needed } => {
                debug!(path = %target.display(), available, needed, "Not enough disk space");
                Err(BackupError::InsufficientSpace {
                    path: target.to_path_buf(),
                    available,
                    needed,
                })
            }
        }
    }
}

/// Bytes available to unprivileged users on the filesystem holding `path`.
/// Missing paths are resolved to their closest existing ancestor.
pub fn available_space(path: &Path) -> Result<u64> {
    let anchor = existing_ancestor(path);
    let stat = statvfs(anchor.as_path())?;
    Ok(stat.fragment_size() as u64 * stat.blocks_available() as u64)
}

fn existing_ancestor(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|p| p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MB: u64 = 1024 * 1024;

    fn guard() -> SpaceGuard {
        SpaceGuard::new(100 * MB, 10 * MB)
    }

    #[test]
    fn test_enough_space_includes_margin() {
        assert_eq!(guard().evaluate(0, 100 * MB, SpacePolicy::Strict), SpaceVerdict::Enough);
        assert_eq!(
            guard().evaluate(1, 100 * MB, SpacePolicy::Strict),
            SpaceVerdict::Insufficient {
                available: 100 * MB,
                needed: 100 * MB + 1,
            }
        );
    }

    #[test]
    fn test_selective_shortfall_is_a_warning() {
        let verdict = guard().evaluate(500 * MB, 200 * MB, SpacePolicy::Selective { conf_only: false });
        assert!(matches!(verdict, SpaceVerdict::MayBeShort { .. }));

        let verdict = guard().evaluate(500 * MB, 200 * MB, SpacePolicy::Selective { conf_only: true });
        assert!(matches!(verdict, SpaceVerdict::MayBeShort { .. }));
    }

    #[test]
    fn test_conf_only_below_conf_margin_is_fatal() {
        let verdict = guard().evaluate(500 * MB, 5 * MB, SpacePolicy::Selective { conf_only: true });
        assert_eq!(
            verdict,
            SpaceVerdict::Insufficient {
                available: 5 * MB,
                needed: 10 * MB,
            }
        );
    }

    #[test]
    fn test_ensure_space_on_real_filesystem() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let guard = SpaceGuard::new(0, 0);

        guard.ensure_space(1, temp_dir.path(), SpacePolicy::Strict)?;

        let err = guard
            .ensure_space(u64::MAX / 2, temp_dir.path(), SpacePolicy::Strict)
            .unwrap_err();
        assert!(matches!(err, BackupError::InsufficientSpace { .. }));
        Ok(())
    }

    #[test]
    fn test_available_space_on_missing_path() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let missing = temp_dir.path().join("not/yet/created");
        assert!(available_space(&missing)? > 0);
        Ok(())
    }
}
