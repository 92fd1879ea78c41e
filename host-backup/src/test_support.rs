//! Throwaway host layouts for unit tests.

use crate::config::{Config, MountStrategy};
use crate::host::Host;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Write an executable shell script, creating parent directories.
pub fn write_script(path: &Path, body: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("#!/bin/sh\n{}\n", body))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

/// A fake host rooted in a temporary directory: backup area, app settings,
/// system and custom hooks, and a provisioning marker.
pub struct Fixture {
    pub dir: TempDir,
    pub config: Config,
}

impl Fixture {
    pub fn new() -> io::Result<Self> {
        let dir = TempDir::new()?;
        let root = dir.path();

        let mut config = Config::default();
        config.paths.backup_root = root.join("backup");
        config.paths.apps_settings_dir = root.join("apps");
        config.paths.hooks_dir = root.join("hooks");
        config.paths.custom_hooks_dir = root.join("hooks.d");
        config.paths.installed_marker = root.join("installed");
        config.space.margin_mb = 0;
        config.space.conf_margin_mb = 0;
        config.scripts.shell = "sh".to_string();
        config.restore.mount = MountStrategy::Extract;
        config.commands.provision = vec!["true".to_string()];
        config.commands.reconfigure = vec!["true".to_string()];

        fs::create_dir_all(&config.paths.apps_settings_dir)?;
        fs::create_dir_all(&config.paths.hooks_dir)?;
        Ok(Self { dir, config })
    }

    pub fn host(&self) -> Host {
        Host::from_config(&self.config)
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub fn set_provisioned(&self, provisioned: bool) -> io::Result<()> {
        let marker = &self.config.paths.installed_marker;
        if provisioned {
            fs::write(marker, "")
        } else if marker.exists() {
            fs::remove_file(marker)
        } else {
            Ok(())
        }
    }

    /// System hook `<priority>-<name>` of `kind`.
    pub fn add_hook(&self, kind: &str, file_name: &str, body: &str) -> io::Result<PathBuf> {
        let path = self.config.paths.hooks_dir.join(kind).join(file_name);
        write_script(&path, body)?;
        Ok(path)
    }

    /// Backup hook writing `content` under `conf/<name>` in the staging dir,
    /// plus the matching restore hook copying it to `restored/<name>`.
    pub fn add_conf_hook(&self, name: &str, content: &str) -> io::Result<()> {
        self.add_hook(
            "backup",
            &format!("10-{}", name),
            &format!(
                "mkdir -p \"$YNH_BACKUP_DIR/conf\" && echo '{}' > \"$YNH_BACKUP_DIR/conf/{}\"",
                content, name
            ),
        )?;
        let restored = self.path("restored");
        self.add_hook(
            "restore",
            &format!("10-{}", name),
            &format!(
                "mkdir -p '{dir}' && cp \"$1/conf/{name}\" '{dir}/{name}'",
                dir = restored.display(),
                name = name
            ),
        )?;
        Ok(())
    }

    /// Install an app instance whose backup script stores `data.txt` and
    /// whose restore script copies it into the fixture's `restored/` dir.
    pub fn install_app(&self, instance: &str, restore_body: Option<&str>) -> io::Result<PathBuf> {
        let settings = self.config.paths.apps_settings_dir.join(instance);
        fs::create_dir_all(&settings)?;
        fs::write(
            settings.join("manifest.json"),
            format!(
                r#"{{"name": "{}", "version": "1.0", "description": {{"en": "test app"}}}}"#,
                instance
            ),
        )?;
        write_script(
            &settings.join("scripts/backup"),
            "echo \"$YNH_APP_INSTANCE_NAME\" > \"$YNH_APP_BACKUP_DIR/data.txt\"",
        )?;

        let restored = self.path("restored");
        let default_restore = format!(
            "mkdir -p '{dir}' && cp \"$YNH_APP_BACKUP_DIR/data.txt\" '{dir}/{app}.txt'",
            dir = restored.display(),
            app = instance
        );
        write_script(
            &settings.join("scripts/restore"),
            restore_body.unwrap_or(&default_restore),
        )?;
        write_script(
            &settings.join("scripts/remove"),
            &format!("touch '{}/removed-{}'", self.dir.path().display(), instance),
        )?;
        Ok(settings)
    }

    pub fn uninstall_app(&self, instance: &str) -> io::Result<()> {
        fs::remove_dir_all(self.config.paths.apps_settings_dir.join(instance))
    }
}
