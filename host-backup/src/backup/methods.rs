//! Archival methods: turn a sealed manifest into artifacts.
//!
//! `tar` writes a gzip-compressed tarball, `copy` mirrors the manifest into
//! a directory tree, and any other name delegates to the `backup_method`
//! hook of that name. Methods whose name is `mount` or starts with `mount_`
//! get the whole manifest bound into the staging directory first, so the
//! hook can treat staging as the complete archive tree.

use super::BackupSession;
use crate::fs::metadata::create_dir_with_mode;
use crate::fs::space::{SpaceGuard, SpacePolicy};
use crate::fs::walker::copy_path;
use crate::info::INFO_FILE;
use crate::manifest::Manifest;
use crate::{BackupError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info, warn};

const METHOD_KIND: &str = "backup_method";

/// Mode of the canonical archives directory.
pub const ARCHIVES_MODE: u32 = 0o750;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupMethod {
    Copy,
    Tar,
    /// A `backup_method` hook
    External { name: String, bind_first: bool },
}

impl BackupMethod {
    pub fn from_name(name: &str) -> Self {
        match name {
            "copy" => BackupMethod::Copy,
            "tar" => BackupMethod::Tar,
            other => BackupMethod::External {
                name: other.to_string(),
                bind_first: other == "mount" || other.starts_with("mount_"),
            },
        }
    }

    pub fn name(&self) -> &str {
        match self {
            BackupMethod::Copy => "copy",
            BackupMethod::Tar => "tar",
            BackupMethod::External { name, .. } => name,
        }
    }
}

impl BackupSession<'_> {
    /// Produce artifacts with `method` into `output_dir`.
    pub fn apply(&mut self, method: &BackupMethod, output_dir: &Path) -> Result<()> {
        let manifest = self.manifest.clone().ok_or_else(|| {
            BackupError::InvalidArchive(format!("manifest of '{}' is not sealed", self.name))
        })?;

        info!(archive = %self.name, method = method.name(), output = %output_dir.display(), "Applying backup method");
        match method {
            BackupMethod::Copy => {
                self.ensure_output_space(output_dir)?;
                copy_manifest(&manifest, output_dir)
            }
            BackupMethod::Tar => {
                self.ensure_output_space(output_dir)?;
                self.write_archive(&manifest, output_dir)
            }
            BackupMethod::External { name, bind_first } => {
                if *bind_first {
                    self.bind_manifest(&manifest)?;
                }
                let args = [
                    self.staging_dir.display().to_string(),
                    output_dir.display().to_string(),
                ];
                let outcome = self.host.hooks.invoke(
                    METHOD_KIND,
                    std::slice::from_ref(name),
                    &args,
                    &self.script_env(),
                    None,
                );
                if outcome.succeeded.contains_key(name) {
                    Ok(())
                } else {
                    Err(BackupError::MethodFailed(name.clone()))
                }
            }
        }
    }

    fn ensure_output_space(&self, output_dir: &Path) -> Result<()> {
        SpaceGuard::from_config(self.config).ensure_space(self.info.size, output_dir, SpacePolicy::Strict)
    }

    /// Write `<output_dir>/<name>.tar.gz` and publish it in the archives
    /// directory along with its info file.
    fn write_archive(&mut self, manifest: &Manifest, output_dir: &Path) -> Result<()> {
        fs::create_dir_all(output_dir)?;
        let archive = output_dir.join(format!("{}{}", self.name, crate::config::ARCHIVE_SUFFIX));

        let file = File::create(&archive).map_err(|e| BackupError::ArchiveOpen {
            path: archive.clone(),
            reason: e.to_string(),
        })?;
        if let Err(e) = write_tarball(manifest, file) {
            let _ = fs::remove_file(&archive);
            return Err(BackupError::ArchiveWrite {
                path: archive,
                reason: e.to_string(),
            });
        }
        debug!(archive = %archive.display(), "Tarball written");

        let info_path = self.config.info_path(&self.name);
        let mut info_copied = false;
        if let Err(e) = self.publish(&archive, &info_path, &mut info_copied) {
            if info_copied {
                let _ = fs::remove_file(&info_path);
            }
            let _ = fs::remove_file(&archive);
            return Err(BackupError::ArchiveWrite {
                path: archive,
                reason: e.to_string(),
            });
        }
        Ok(())
    }

    /// Copy the info file next to the published archive and link `archive`
    /// into the archives directory when it was written elsewhere.
    fn publish(&self, archive: &Path, info_path: &Path, info_copied: &mut bool) -> Result<()> {
        create_dir_with_mode(&self.config.archives_dir(), ARCHIVES_MODE)?;
        fs::copy(self.staging_dir.join(INFO_FILE), info_path)?;
        *info_copied = true;

        let link = self.config.archive_path(&self.name);
        if link != archive && link.symlink_metadata().is_err() {
            std::os::unix::fs::symlink(archive, &link)?;
            debug!(link = %link.display(), "Archive linked into archives directory");
        }
        Ok(())
    }

    /// Make every manifest source visible at its destination in staging.
    ///
    /// Directories are bind-mounted read-only and files hard-linked when
    /// staging is the canonical work dir; anything that cannot be bound is
    /// copied.
    fn bind_manifest(&mut self, manifest: &Manifest) -> Result<()> {
        for entry in manifest {
            let dest = self.staging_dir.join(&entry.dest);
            if dest == entry.source {
                continue;
            }
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }

            if self.bindable {
                let meta = fs::symlink_metadata(&entry.source)?;
                if meta.is_dir() {
                    fs::create_dir_all(&dest)?;
                    match bind_mount(&self.config.commands.bind_helper, &entry.source, &dest) {
                        Ok(()) => {
                            self.bind_mounts.push(dest);
                            continue;
                        }
                        Err(e) => {
                            warn!(source = %entry.source.display(), error = %e, "Bind mount failed, copying instead");
                            if unmount_recursive(&self.config.restore.unmount_helper, &dest).is_ok() {
                                debug!(dest = %dest.display(), "Dropped partial bind mount");
                            }
                        }
                    }
                } else if fs::hard_link(&entry.source, &dest).is_ok() {
                    continue;
                }
            }

            copy_path(&entry.source, &dest)?;
        }
        Ok(())
    }

    /// Undo bind mounts made by [`bind_manifest`](Self::bind_manifest), most
    /// recent first.
    pub(super) fn release_bind_mounts(&mut self) -> Result<()> {
        while let Some(mount) = self.bind_mounts.pop() {
            if let Err(e) = unmount_recursive(&self.config.restore.unmount_helper, &mount) {
                self.bind_mounts.push(mount.clone());
                return Err(BackupError::Unmount {
                    path: mount,
                    reason: e.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Mirror every manifest entry under `output_dir`.
fn copy_manifest(manifest: &Manifest, output_dir: &Path) -> Result<()> {
    fs::create_dir_all(output_dir)?;
    for entry in manifest {
        let dest = output_dir.join(&entry.dest);
        if dest == entry.source {
            continue;
        }
        copy_path(&entry.source, &dest)?;
    }
    Ok(())
}

/// Stream the manifest into a gzip-compressed tarball, storing symlinks as
/// links.
fn write_tarball(manifest: &Manifest, file: File) -> io::Result<()> {
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    for entry in manifest {
        let meta = fs::symlink_metadata(&entry.source)?;
        if meta.is_dir() {
            builder.append_dir_all(&entry.dest, &entry.source)?;
        } else {
            builder.append_path_with_name(&entry.source, &entry.dest)?;
        }
    }

    builder.into_inner()?.finish()?;
    Ok(())
}

fn bind_mount(helper: &str, source: &Path, dest: &Path) -> io::Result<()> {
    let status = Command::new(helper)
        .arg("-r")
        .arg("--rbind")
        .arg(source)
        .arg(dest)
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!("{} exited with {}", helper, status)))
    }
}

fn unmount_recursive(helper: &str, target: &Path) -> io::Result<()> {
    let status = Command::new(helper).arg("-R").arg(target).status()?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!("{} exited with {}", helper, status)))
    }
}
