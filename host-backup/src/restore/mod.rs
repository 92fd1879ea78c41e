//! Restore sessions: mount an archive, replay its restore hooks and app
//! restore scripts, then unmount.
//!
//! [`RestoreSession::mount`] validates the archive and exposes its tree;
//! [`RestoreSession::restore`] does the work; [`RestoreSession::clean`] must
//! run on every exit path once mounted.

mod apps;
pub mod mount;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::fs::space::{SpaceGuard, SpacePolicy};
use crate::host::hooks::{parse_hook_file_name, Env};
use crate::host::Host;
use crate::info::{ArchiveInfo, INFO_FILE};
use crate::units::Selection;
use crate::{BackupError, Result};
use mount::{verify_archive, Mounter};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

const RESTORE_KIND: &str = "restore";
const POST_RESTORE_KIND: &str = "post_backup_restore";

/// Domain of the archived host, relative to the archive root.
const CURRENT_HOST_FILE: &str = "conf/ynh/current_host";

/// What a restore session brought back.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreResult {
    pub apps: Vec<String>,
    pub hooks: BTreeMap<String, serde_json::Value>,
}

impl RestoreResult {
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty() && self.hooks.is_empty()
    }
}

pub struct RestoreSession<'a> {
    config: &'a Config,
    host: &'a Host,
    name: String,
    mount_dir: PathBuf,
    mounter: Mounter,
    mounted: bool,
    info: ArchiveInfo,
    result: RestoreResult,
}

impl<'a> RestoreSession<'a> {
    /// Open archive `name` and expose its tree in the work dir.
    ///
    /// Nothing on the host is changed if this fails.
    pub fn mount(config: &'a Config, host: &'a Host, name: &str) -> Result<Self> {
        let summary = Catalog::new(config).info(name, false, false)?;
        let archive = summary.path;
        let mount_dir = config.work_dir(name);
        let mounter = Mounter::from_config(config);

        if mount_dir.exists() {
            debug!(mount = %mount_dir.display(), "Removing stale mount point");
            if mounter.unmount(&mount_dir).is_ok() {
                debug!(mount = %mount_dir.display(), "Stale mount released");
            }
            fs::remove_dir_all(&mount_dir)?;
        }

        verify_archive(&archive)?;
        fs::create_dir_all(&mount_dir)?;

        let mut mounted = false;
        let opened = mounter
            .mount(&archive, &mount_dir)
            .and_then(|()| {
                mounted = true;
                ArchiveInfo::load(&mount_dir.join(INFO_FILE)).map_err(|e| {
                    BackupError::InvalidArchive(format!("unable to read {}: {}", INFO_FILE, e))
                })
            });

        let info = match opened {
            Ok(info) => info,
            Err(e) => {
                if mounted {
                    if let Err(err) = mounter.unmount(&mount_dir) {
                        error!(mount = %mount_dir.display(), error = %err, "Unable to unmount archive");
                        return Err(e);
                    }
                }
                let _ = fs::remove_dir_all(&mount_dir);
                return Err(e);
            }
        };

        info!(archive = name, mount = %mount_dir.display(), "Archive mounted");
        Ok(Self {
            config,
            host,
            name: name.to_string(),
            mount_dir,
            mounter,
            mounted: true,
            info,
            result: RestoreResult::default(),
        })
    }

    pub fn mount_dir(&self) -> &Path {
        &self.mount_dir
    }

    pub fn into_result(self) -> RestoreResult {
        self.result
    }

    /// Restore the selected hooks, then the selected apps.
    ///
    /// Fails when the host cannot be provisioned, when space is short, or
    /// when nothing at all was restored.
    pub fn restore(&mut self, hooks: &Selection, apps: &Selection) -> Result<()> {
        if hooks.is_skip() && !self.config.is_provisioned() {
            self.provision()?;
        }
        self.check_space(hooks, apps)?;

        if !hooks.is_skip() {
            self.restore_hooks(hooks)?;
        }
        if !apps.is_skip() {
            self.restore_apps(apps);
        }

        if self.result.is_empty() {
            error!(archive = %self.name, "Nothing has been restored");
            return Err(BackupError::NothingRestored);
        }

        if !self.result.apps.is_empty() {
            if let Err(e) = self.host.reconfigurer.reconfigure() {
                warn!(error = %e, "Unable to reconfigure access after restoring apps");
            }
        }

        info!(
            archive = %self.name,
            apps = self.result.apps.len(),
            hooks = self.result.hooks.len(),
            "Restore complete"
        );
        Ok(())
    }

    /// Provision a fresh host with the domain recorded in the archive.
    fn provision(&self) -> Result<()> {
        let path = self.mount_dir.join(CURRENT_HOST_FILE);
        let domain = fs::read_to_string(&path)
            .ok()
            .and_then(|content| content.lines().next().map(|l| l.trim().to_string()))
            .filter(|domain| !domain.is_empty())
            .ok_or_else(|| {
                BackupError::InvalidArchive(format!("unable to read {}", CURRENT_HOST_FILE))
            })?;

        self.host
            .provisioner
            .provision(&domain, &self.config.scripts.admin_user, true)
    }

    fn check_space(&self, hooks: &Selection, apps: &Selection) -> Result<()> {
        let policy = if hooks.is_all() && apps.is_all() {
            SpacePolicy::Strict
        } else {
            let recorded: Vec<String> = self.info.hooks.keys().cloned().collect();
            let (selected, _) = hooks.resolve(&recorded);
            let data_hooks = selected.iter().any(|h| h.starts_with("data"));
            SpacePolicy::Selective {
                conf_only: apps.is_skip() && !data_hooks,
            }
        };

        SpaceGuard::from_config(self.config).ensure_space(
            self.info.size,
            &self.config.paths.backup_root,
            policy,
        )
    }

    fn restore_hooks(&mut self, selection: &Selection) -> Result<()> {
        let recorded: Vec<String> = self.info.hooks.keys().cloned().collect();
        let (wanted, unknown) = selection.resolve(&recorded);
        for name in unknown {
            error!(hook = %name, "Hook is not part of the archive, skipping");
        }

        let mut runnable = Vec::new();
        for name in wanted {
            if self.host.hooks.discover(RESTORE_KIND, &name).is_ok() {
                runnable.push(name);
                continue;
            }

            let scripts = match self.archived_restore_scripts(&name) {
                Ok(scripts) => scripts,
                Err(e) => {
                    error!(hook = %name, error = %e, "Unable to read restore hooks shipped in archive, skipping");
                    continue;
                }
            };
            if scripts.is_empty() {
                error!(hook = %name, "No restore script available for hook, skipping");
                continue;
            }
            let installed = scripts
                .iter()
                .map(|script| self.host.hooks.install(RESTORE_KIND, script))
                .collect::<Result<Vec<_>>>();
            match installed {
                Ok(_) => runnable.push(name),
                Err(e) => error!(hook = %name, error = %e, "Unable to install restore hook from archive"),
            }
        }

        if runnable.is_empty() {
            return Ok(());
        }

        info!(archive = %self.name, count = runnable.len(), "Running restore hooks");
        let args = [self.mount_dir.display().to_string()];
        let outcome = self
            .host
            .hooks
            .invoke(RESTORE_KIND, &runnable, &args, &Env::new(), None);
        for name in &outcome.failed {
            warn!(hook = %name, "Restore hook failed");
        }
        self.result.hooks = outcome.succeeded;
        Ok(())
    }

    /// Restore scripts of hook `name` shipped in the archive.
    fn archived_restore_scripts(&self, name: &str) -> Result<Vec<PathBuf>> {
        let dir = self.mount_dir.join("hooks").join(RESTORE_KIND);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut scripts: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| parse_hook_file_name(&e.file_name().to_string_lossy()).1 == name)
            .map(|e| e.path())
            .collect();
        scripts.sort();
        Ok(scripts)
    }

    /// Release the mount point. `retcode` is 0 on success.
    ///
    /// The `post_backup_restore` callbacks always run; the mount point is
    /// removed only once unmounted and when no callback failed.
    pub fn clean(&mut self, retcode: i32) -> Result<()> {
        let mut failure = None;

        if self.mounted {
            match self.mounter.unmount(&self.mount_dir) {
                Ok(()) => self.mounted = false,
                Err(e) => {
                    error!(mount = %self.mount_dir.display(), error = %e, "Unable to unmount archive");
                    failure = Some(e);
                }
            }
        }

        let args = [self.mount_dir.display().to_string(), retcode.to_string()];
        let outcome = self
            .host
            .hooks
            .invoke(POST_RESTORE_KIND, &[], &args, &Env::new(), None);
        for name in &outcome.failed {
            warn!(hook = %name, "Restore cleaning callback failed");
        }

        if failure.is_none() && outcome.failed.is_empty() {
            if self.mount_dir.exists() {
                fs::remove_dir_all(&self.mount_dir)
                    .map_err(|_| BackupError::CleanupFailed(self.mount_dir.clone()))?;
            }
            return Ok(());
        }

        Err(failure.unwrap_or_else(|| BackupError::CleanupFailed(self.mount_dir.clone())))
    }
}
