//! Backup sessions: one archive in progress, from staging to cleanup.
//!
//! A session owns a staging directory holding the manifest and the info
//! document while hooks and apps are collected ([`BackupSession::collect`]).
//! [`BackupSession::finalize`] seals the manifest, after which the archival
//! methods ([`BackupSession::apply`]) turn it into artifacts.
//! [`BackupSession::clean`] must run on every exit path once the session is
//! open.

mod collect;
pub mod methods;

pub use methods::BackupMethod;

use crate::config::Config;
use crate::fs::metadata::create_dir_with_mode;
use crate::fs::walker::disk_usage;
use crate::host::hooks::{Env, ENV_BACKUP_CSV, ENV_BACKUP_DIR};
use crate::host::Host;
use crate::info::{ArchiveInfo, INFO_FILE};
use crate::manifest::{Manifest, ManifestWriter, MANIFEST_FILE};
use crate::{BackupError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Mode of directories created in the staging tree.
const STAGING_MODE: u32 = 0o750;

/// Callback hook kind run whenever a staging directory is discarded.
const POST_CREATE_KIND: &str = "post_backup_create";

pub struct BackupSession<'a> {
    config: &'a Config,
    host: &'a Host,
    name: String,
    staging_dir: PathBuf,
    /// Staging lives in the canonical work dir: it may receive bind mounts
    /// and is always discarded on cleanup.
    bindable: bool,
    /// The staging directory did not exist before this session
    created: bool,
    info: ArchiveInfo,
    writer: Option<ManifestWriter>,
    manifest: Option<Manifest>,
    bind_mounts: Vec<PathBuf>,
}

impl<'a> BackupSession<'a> {
    /// Prepare the staging directory of archive `name`.
    ///
    /// Without `output_dir` the canonical work dir is used, and any stale
    /// one left by an interrupted session is discarded first. With
    /// `output_dir` the archive is assembled in place there.
    pub fn open(
        config: &'a Config,
        host: &'a Host,
        name: &str,
        description: &str,
        output_dir: Option<&Path>,
    ) -> Result<Self> {
        let (staging_dir, bindable) = match output_dir {
            Some(dir) => (dir.to_path_buf(), false),
            None => (config.work_dir(name), true),
        };

        if bindable && staging_dir.exists() {
            debug!(staging = %staging_dir.display(), "Discarding stale staging directory");
            let discarded = post_create_callback(host, &staging_dir, -1)
                && fs::remove_dir_all(&staging_dir).is_ok();
            if !discarded {
                return Err(BackupError::OutputDirNotEmpty(staging_dir));
            }
        }

        let created = !staging_dir.exists();
        create_dir_with_mode(&staging_dir, STAGING_MODE)?;

        let writer = match ManifestWriter::create(&staging_dir) {
            Ok(writer) => writer,
            Err(e) => {
                if created {
                    let _ = fs::remove_dir_all(&staging_dir);
                }
                return Err(e);
            }
        };

        info!(archive = name, staging = %staging_dir.display(), "Backup session opened");
        Ok(Self {
            config,
            host,
            name: name.to_string(),
            staging_dir,
            bindable,
            created,
            info: ArchiveInfo::new(description, chrono::Utc::now().timestamp()),
            writer: Some(writer),
            manifest: None,
            bind_mounts: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn info(&self) -> &ArchiveInfo {
        &self.info
    }

    pub fn into_info(self) -> ArchiveInfo {
        self.info
    }

    /// The sealed manifest, once [`finalize`](Self::finalize) succeeded.
    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    /// Variables exported to backup hooks and app scripts.
    fn script_env(&self) -> Env {
        let mut env = Env::new();
        env.insert(ENV_BACKUP_DIR.into(), self.staging_dir.display().to_string());
        env.insert(
            ENV_BACKUP_CSV.into(),
            self.staging_dir.join(MANIFEST_FILE).display().to_string(),
        );
        env
    }

    fn writer(&mut self) -> Result<&mut ManifestWriter> {
        match self.writer.as_mut() {
            Some(writer) => Ok(writer),
            None => Err(BackupError::InvalidArchive(format!(
                "manifest of '{}' is already sealed",
                self.name
            ))),
        }
    }

    /// Seal the manifest: record the bookkeeping files and the staged trees,
    /// compute the archive size and write `info.json`.
    pub fn finalize(&mut self) -> Result<()> {
        let Some(mut writer) = self.writer.take() else {
            return match self.manifest {
                Some(_) => Ok(()),
                None => Err(BackupError::InvalidArchive(format!(
                    "manifest of '{}' could not be sealed",
                    self.name
                ))),
            };
        };

        writer.mark_staged(MANIFEST_FILE)?;
        writer.mark_staged(INFO_FILE)?;
        if !self.info.apps.is_empty() {
            writer.mark_staged("apps")?;
        }
        for dir in ["conf", "data"] {
            if self.staging_dir.join(dir).is_dir() {
                writer.mark_staged(dir)?;
            }
        }

        let manifest = writer.finalize()?;
        self.info.size = sources_size(&manifest);
        self.info.save(&self.staging_dir.join(INFO_FILE))?;

        info!(
            archive = %self.name,
            entries = manifest.len(),
            size = self.info.size,
            "Manifest sealed"
        );
        self.manifest = Some(manifest);
        Ok(())
    }

    /// Release the staging directory. `retcode` is 0 on success.
    ///
    /// Bind mounts are undone first and the `post_backup_create` callbacks
    /// run next. The directory is then removed when it is the canonical work
    /// dir, or when the session failed in a directory it created itself.
    pub fn clean(&mut self, retcode: i32) -> Result<()> {
        self.writer = None;

        if let Err(e) = self.release_bind_mounts() {
            error!(staging = %self.staging_dir.display(), error = %e, "Bind mounts still active, keeping staging directory");
            return Err(e);
        }

        if !post_create_callback(self.host, &self.staging_dir, retcode) {
            return Err(BackupError::CleanupFailed(self.staging_dir.clone()));
        }

        let discard = self.bindable || (retcode != 0 && self.created);
        if discard && self.staging_dir.exists() {
            fs::remove_dir_all(&self.staging_dir).map_err(|e| {
                error!(staging = %self.staging_dir.display(), error = %e, "Unable to remove staging directory");
                BackupError::CleanupFailed(self.staging_dir.clone())
            })?;
            debug!(staging = %self.staging_dir.display(), "Staging directory removed");
        }
        Ok(())
    }
}

/// Run the `post_backup_create` callbacks for `staging`; false if any failed.
fn post_create_callback(host: &Host, staging: &Path, retcode: i32) -> bool {
    let args = [staging.display().to_string(), retcode.to_string()];
    let outcome = host
        .hooks
        .invoke(POST_CREATE_KIND, &[], &args, &Env::new(), None);

    for name in &outcome.failed {
        warn!(hook = %name, staging = %staging.display(), "Backup cleaning callback failed");
    }
    outcome.failed.is_empty()
}

/// Total apparent size of the manifest sources, `info.json` excluded.
fn sources_size(manifest: &Manifest) -> u64 {
    manifest
        .iter()
        .filter(|entry| entry.dest != Path::new(INFO_FILE))
        .map(|entry| match disk_usage(&entry.source) {
            Ok(size) => size,
            Err(e) => {
                warn!(source = %entry.source.display(), error = %e, "Unable to measure backup source");
                0
            }
        })
        .sum()
}
