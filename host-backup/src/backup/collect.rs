//! Collection engine: runs backup hooks and app backup scripts into the
//! staging directory, recording what they produced in the manifest and the
//! info document.

use super::{BackupSession, STAGING_MODE};
use crate::fs::metadata::create_dir_with_mode;
use crate::host::hooks::app_env;
use crate::info::AppInfo;
use crate::units::{Selection, UnitOutcome};
use crate::{BackupError, Result};
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

const BACKUP_KIND: &str = "backup";
const RESTORE_KIND: &str = "restore";

/// Where restore hooks are stored inside an archive.
const RESTORE_HOOKS_DEST: &str = "hooks/restore/";

impl BackupSession<'_> {
    /// Run the selected backup hooks, then back up the selected apps.
    ///
    /// Individual hooks and apps may fail without failing the session; an
    /// error is returned only when nothing at all was collected.
    pub fn collect(&mut self, hooks: &Selection, apps: &Selection) -> Result<()> {
        self.collect_hooks(hooks);
        self.collect_apps(apps)?;

        if self.info.is_empty() {
            error!(archive = %self.name, "Nothing has been backed up");
            return Err(BackupError::NothingBackedUp);
        }
        Ok(())
    }

    fn collect_hooks(&mut self, selection: &Selection) {
        let names = match selection {
            Selection::Skip => return,
            Selection::All => Vec::new(),
            Selection::Only(requested) => {
                let mut names: Vec<String> = Vec::new();
                for name in requested {
                    match self.host.hooks.discover(BACKUP_KIND, name) {
                        Ok(_) if !names.contains(name) => names.push(name.clone()),
                        Ok(_) => {}
                        Err(e) => error!(hook = %name, error = %e, "Unknown backup hook, skipping"),
                    }
                }
                // An empty list would mean every hook
                if names.is_empty() {
                    warn!("None of the requested backup hooks exist");
                    return;
                }
                names
            }
        };

        info!(archive = %self.name, "Running backup hooks");
        let args = [self.staging_dir.display().to_string()];
        let outcome = self.host.hooks.invoke(
            BACKUP_KIND,
            &names,
            &args,
            &self.script_env(),
            Some(&self.staging_dir),
        );

        for name in &outcome.failed {
            warn!(hook = %name, "Backup hook failed");
        }
        self.info.failed_hooks = outcome.failed.into_iter().collect();

        for name in outcome.succeeded.keys() {
            if let Err(e) = self.mark_restore_hook(name) {
                error!(hook = %name, error = %e, "Unable to record restore hook");
            }
        }
        self.info.hooks = outcome.succeeded;
    }

    /// Store the restore counterpart of backup hook `name` in the archive.
    fn mark_restore_hook(&mut self, name: &str) -> Result<()> {
        let descriptor = match self.host.hooks.discover(RESTORE_KIND, name) {
            Ok(descriptor) => descriptor,
            Err(_) => {
                warn!(hook = %name, "No restore hook found, it will not be restorable from this archive");
                return Ok(());
            }
        };

        for script in &descriptor.scripts {
            self.writer()?.mark(&script.path, RESTORE_HOOKS_DEST)?;
        }
        Ok(())
    }

    fn collect_apps(&mut self, selection: &Selection) -> Result<()> {
        if selection.is_skip() {
            return Ok(());
        }

        let installed = self.host.apps.installed()?;
        let (targets, missing) = selection.resolve(&installed);
        for name in missing {
            error!(app = %name, "App is not installed, skipping");
        }
        if targets.is_empty() {
            return Ok(());
        }

        info!(archive = %self.name, count = targets.len(), "Backing up apps");
        for instance in targets {
            match self.collect_app(&instance) {
                UnitOutcome::Succeeded => info!(app = %instance, "App backed up"),
                UnitOutcome::Skipped(reason) => warn!(app = %instance, %reason, "App skipped"),
                UnitOutcome::Failed(e) => error!(app = %instance, error = %e, "App backup failed"),
            }
        }
        Ok(())
    }

    fn collect_app(&mut self, instance: &str) -> UnitOutcome {
        let settings = self.host.apps.settings_dir(instance);
        let script = settings.join("scripts/backup");
        if !script.is_file() {
            return UnitOutcome::Skipped("no backup script".to_string());
        }
        if !settings.join("scripts/restore").is_file() {
            warn!(app = %instance, "App has no restore script, it will not be restorable");
        }

        // Settings stay in the manifest even when the script fails; only
        // rows added after this point are dropped on failure.
        let settings_dest = format!("apps/{}/settings", instance);
        let checkpoint = match self
            .writer()
            .and_then(|w| w.mark(&settings, &settings_dest).and_then(|()| w.checkpoint()))
        {
            Ok(checkpoint) => checkpoint,
            Err(e) => return UnitOutcome::Failed(e),
        };
        let app_dir = self.staging_dir.join("apps").join(instance);

        info!(app = %instance, "Running app backup script");
        match self.run_app_backup(instance, &script, &app_dir) {
            Ok(()) => {
                let description = self.host.apps.describe(instance).unwrap_or_else(|e| {
                    warn!(app = %instance, error = %e, "Unable to describe app");
                    AppInfo {
                        name: self.host.apps.parse_instance_name(instance).0,
                        ..AppInfo::default()
                    }
                });
                self.info.apps.insert(instance.to_string(), description);
                UnitOutcome::Succeeded
            }
            Err(e) => {
                if let Err(err) = self.writer().and_then(|w| w.rollback(checkpoint)) {
                    error!(app = %instance, error = %err, "Unable to drop app entries from manifest");
                }
                if let Err(err) = fs::remove_dir_all(&app_dir) {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        warn!(app = %instance, error = %err, "Unable to remove app staging directory");
                    }
                }
                UnitOutcome::Failed(e)
            }
        }
    }

    fn run_app_backup(&mut self, instance: &str, script: &Path, app_dir: &Path) -> Result<()> {
        let backup_dir = app_dir.join("backup");
        create_dir_with_mode(&backup_dir, STAGING_MODE)?;

        let (app_id, number) = self.host.apps.parse_instance_name(instance);
        let mut env = self.script_env();
        env.extend(app_env(&app_id, instance, number, Some(&backup_dir)));

        let args = [backup_dir.display().to_string(), instance.to_string()];
        self.host.hooks.exec(script, &args, &env, Some(&backup_dir))
    }
}
