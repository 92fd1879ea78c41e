//! App restoration with per-app rollback.

use super::RestoreSession;
use crate::fs::metadata::{chown_recursive, set_mode_recursive};
use crate::fs::walker::copy_tree;
use crate::host::hooks::app_env;
use crate::units::{Selection, UnitOutcome};
use crate::Result;
use std::fs;
use std::path::Path;
use tracing::{debug, error, info, warn};

impl RestoreSession<'_> {
    pub(super) fn restore_apps(&mut self, selection: &Selection) {
        let recorded: Vec<String> = self.info.apps.keys().cloned().collect();
        let (wanted, unknown) = selection.resolve(&recorded);
        for name in unknown {
            error!(app = %name, "App is not part of the archive, skipping");
        }

        for instance in wanted {
            match self.restore_app(&instance) {
                UnitOutcome::Succeeded => {
                    info!(app = %instance, "App restored");
                    self.result.apps.push(instance);
                }
                UnitOutcome::Skipped(reason) => warn!(app = %instance, %reason, "App not restored"),
                UnitOutcome::Failed(e) => error!(app = %instance, error = %e, "App restore failed"),
            }
        }
    }

    fn restore_app(&mut self, instance: &str) -> UnitOutcome {
        if self.host.apps.is_installed(instance) {
            return UnitOutcome::Skipped("already installed".to_string());
        }

        let archived = self.mount_dir.join("apps").join(instance);
        let script = archived.join("settings/scripts/restore");
        if !script.is_file() {
            return UnitOutcome::Skipped("no restore script in archive".to_string());
        }

        let settings = self.host.apps.settings_dir(instance);
        info!(app = %instance, "Running app restore script");
        match self.run_app_restore(instance, &archived, &settings, &script) {
            Ok(()) => UnitOutcome::Succeeded,
            Err(e) => {
                self.rollback_app(instance, &archived, &settings);
                UnitOutcome::Failed(e)
            }
        }
    }

    fn run_app_restore(&self, instance: &str, archived: &Path, settings: &Path, script: &Path) -> Result<()> {
        copy_tree(&archived.join("settings"), settings)?;
        self.restrict_settings(settings)?;

        let backup_dir = archived.join("backup");
        let (app_id, number) = self.host.apps.parse_instance_name(instance);
        let env = app_env(&app_id, instance, number, Some(&backup_dir));
        let args = [backup_dir.display().to_string(), instance.to_string()];
        self.host.hooks.exec(script, &args, &env, Some(&backup_dir))
    }

    /// Settings readable by their owner only, scripts owned by the admin
    /// user and executable by it alone.
    fn restrict_settings(&self, settings: &Path) -> Result<()> {
        set_mode_recursive(settings, 0o700, 0o400)?;

        let scripts = settings.join("scripts");
        if scripts.is_dir() {
            set_mode_recursive(&scripts, 0o700, 0o500)?;
            let admin = &self.config.scripts.admin_user;
            if !chown_recursive(&scripts, admin)? {
                debug!(user = %admin, "Admin user does not exist, keeping script ownership");
            }
        }
        Ok(())
    }

    /// Undo a failed app restore: run the archived remove script, then drop
    /// the settings directory. Failures are only logged.
    fn rollback_app(&self, instance: &str, archived: &Path, settings: &Path) {
        let remove = archived.join("settings/scripts/remove");
        if remove.is_file() {
            let (app_id, number) = self.host.apps.parse_instance_name(instance);
            let env = app_env(&app_id, instance, number, None);
            if let Err(e) = self.host.hooks.exec(&remove, &[instance.to_string()], &env, None) {
                warn!(app = %instance, error = %e, "App was not properly removed");
            }
        }

        if let Err(e) = fs::remove_dir_all(settings) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(app = %instance, error = %e, "Unable to remove app settings");
            }
        }
    }
}
