//! Hook subsystem: named shell scripts grouped by kind (`backup`, `restore`,
//! `post_backup_create`, ...).
//!
//! Scripts live in `<dir>/<kind>/<priority>-<name>`, in a system directory
//! and a custom one. A custom script replaces a system script with the same
//! file name. Scripts of one kind run in ascending priority.

use crate::fs::metadata::create_dir_with_mode;
use crate::{BackupError, Result};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, error, info, warn};

/// Environment passed to scripts.
pub type Env = BTreeMap<String, String>;

/// Priority of a script whose file name has no numeric prefix.
const DEFAULT_PRIORITY: u32 = 50;

// Variables exported to hook and app scripts
pub const ENV_BACKUP_DIR: &str = "YNH_BACKUP_DIR";
pub const ENV_BACKUP_CSV: &str = "YNH_BACKUP_CSV";
pub const ENV_APP_ID: &str = "YNH_APP_ID";
pub const ENV_APP_INSTANCE_NAME: &str = "YNH_APP_INSTANCE_NAME";
pub const ENV_APP_INSTANCE_NUMBER: &str = "YNH_APP_INSTANCE_NUMBER";
pub const ENV_APP_BACKUP_DIR: &str = "YNH_APP_BACKUP_DIR";

/// Identity variables of an app instance, plus its data directory when the
/// script reads or writes backup data.
pub fn app_env(app_id: &str, instance: &str, number: u32, backup_dir: Option<&Path>) -> Env {
    let mut env = Env::new();
    env.insert(ENV_APP_ID.into(), app_id.into());
    env.insert(ENV_APP_INSTANCE_NAME.into(), instance.into());
    env.insert(ENV_APP_INSTANCE_NUMBER.into(), number.to_string());
    if let Some(dir) = backup_dir {
        env.insert(ENV_APP_BACKUP_DIR.into(), dir.display().to_string());
    }
    env
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookScript {
    pub path: PathBuf,
    pub priority: u32,
}

#[derive(Debug, Clone)]
pub struct HookDescriptor {
    pub kind: String,
    pub name: String,
    /// Sorted by priority
    pub scripts: Vec<HookScript>,
}

/// Result of running a batch of hooks.
#[derive(Debug, Clone, Default)]
pub struct HookOutcome {
    /// Execution record per succeeded hook
    pub succeeded: BTreeMap<String, serde_json::Value>,
    pub failed: BTreeSet<String>,
}

pub trait HookRunner {
    /// Look up the scripts implementing hook `name` of `kind`.
    fn discover(&self, kind: &str, name: &str) -> Result<HookDescriptor>;

    /// Run hooks of `kind`; an empty `names` runs every hook of that kind.
    /// Failures are reported per hook in the outcome, never as an error.
    fn invoke(
        &self,
        kind: &str,
        names: &[String],
        args: &[String],
        env: &Env,
        cwd: Option<&Path>,
    ) -> HookOutcome;

    /// Run a single script; a non-zero exit is an error.
    fn exec(&self, script: &Path, args: &[String], env: &Env, cwd: Option<&Path>) -> Result<()>;

    /// Install `script` as a custom hook of `kind`, returning its new path.
    fn install(&self, kind: &str, script: &Path) -> Result<PathBuf>;
}

/// Split `05-conf_ldap` into `(5, "conf_ldap")`.
pub fn parse_hook_file_name(file_name: &str) -> (u32, &str) {
    match file_name.split_once('-') {
        Some((prefix, name)) if !name.is_empty() => match prefix.parse() {
            Ok(priority) => (priority, name),
            Err(_) => (DEFAULT_PRIORITY, file_name),
        },
        _ => (DEFAULT_PRIORITY, file_name),
    }
}

/// Hooks backed by script directories on the host.
pub struct ScriptHooks {
    system_dir: PathBuf,
    custom_dir: PathBuf,
    shell: String,
}

impl ScriptHooks {
    pub fn new(system_dir: impl Into<PathBuf>, custom_dir: impl Into<PathBuf>, shell: impl Into<String>) -> Self {
        Self {
            system_dir: system_dir.into(),
            custom_dir: custom_dir.into(),
            shell: shell.into(),
        }
    }

    /// Every hook of `kind`, keyed by name.
    fn catalog(&self, kind: &str) -> BTreeMap<String, Vec<HookScript>> {
        // file name -> script, custom entries overriding system ones
        let mut by_file: BTreeMap<String, PathBuf> = BTreeMap::new();
        for dir in [&self.system_dir, &self.custom_dir] {
            let Ok(entries) = fs::read_dir(dir.join(kind)) else {
                continue;
            };
            for entry in entries.flatten() {
                if entry.path().is_file() {
                    by_file.insert(entry.file_name().to_string_lossy().to_string(), entry.path());
                }
            }
        }

        let mut hooks: BTreeMap<String, Vec<HookScript>> = BTreeMap::new();
        for (file_name, path) in by_file {
            let (priority, name) = parse_hook_file_name(&file_name);
            hooks
                .entry(name.to_string())
                .or_default()
                .push(HookScript { path, priority });
        }
        for scripts in hooks.values_mut() {
            scripts.sort_by_key(|s| s.priority);
        }
        hooks
    }
}

impl HookRunner for ScriptHooks {
    fn discover(&self, kind: &str, name: &str) -> Result<HookDescriptor> {
        let scripts = self
            .catalog(kind)
            .remove(name)
            .ok_or_else(|| BackupError::HookNotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            })?;

        Ok(HookDescriptor {
            kind: kind.to_string(),
            name: name.to_string(),
            scripts,
        })
    }

    fn invoke(
        &self,
        kind: &str,
        names: &[String],
        args: &[String],
        env: &Env,
        cwd: Option<&Path>,
    ) -> HookOutcome {
        let mut catalog = self.catalog(kind);
        let mut outcome = HookOutcome::default();

        let mut selected: Vec<(String, Vec<HookScript>)> = if names.is_empty() {
            catalog.into_iter().collect()
        } else {
            let mut selected = Vec::new();
            for name in names {
                match catalog.remove(name) {
                    Some(scripts) => selected.push((name.clone(), scripts)),
                    None => {
                        error!(kind, hook = %name, "Hook not found");
                        outcome.failed.insert(name.clone());
                    }
                }
            }
            selected
        };
        selected.sort_by_key(|(name, scripts)| {
            (scripts.first().map(|s| s.priority).unwrap_or(DEFAULT_PRIORITY), name.clone())
        });

        for (name, scripts) in selected {
            debug!(kind, hook = %name, "Running hook");
            let mut paths = Vec::with_capacity(scripts.len());
            let mut ok = true;

            for script in &scripts {
                if let Err(e) = self.exec(&script.path, args, env, cwd) {
                    error!(kind, hook = %name, error = %e, "Hook failed");
                    ok = false;
                    break;
                }
                paths.push(script.path.display().to_string());
            }

            if ok {
                outcome.succeeded.insert(name, json!({ "path": paths }));
            } else {
                outcome.failed.insert(name);
            }
        }

        outcome
    }

    fn exec(&self, script: &Path, args: &[String], env: &Env, cwd: Option<&Path>) -> Result<()> {
        let mut command = Command::new(&self.shell);
        command.arg(script).args(args).envs(env);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        debug!(script = %script.display(), ?args, "Executing script");
        let output = command.output()?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!(script = %script.display(), "{}", line);
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            warn!(script = %script.display(), "{}", line);
        }

        if output.status.success() {
            Ok(())
        } else {
            Err(BackupError::ScriptFailed {
                script: script.to_path_buf(),
                status: output.status.to_string(),
            })
        }
    }

    fn install(&self, kind: &str, script: &Path) -> Result<PathBuf> {
        let dir = self.custom_dir.join(kind);
        create_dir_with_mode(&dir, 0o755)?;

        let file_name = script
            .file_name()
            .ok_or_else(|| BackupError::InvalidArchive(format!("bad hook path {}", script.display())))?;
        let target = dir.join(file_name);
        fs::copy(script, &target)?;

        info!(kind, script = %target.display(), "Installed hook from archive");
        Ok(target)
    }
}
