//! App registry: installed app instances and their settings directories.

use crate::info::AppInfo;
use crate::{BackupError, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

pub trait AppRegistry {
    /// Installed instance names, sorted.
    fn installed(&self) -> Result<Vec<String>>;

    fn is_installed(&self, instance: &str) -> bool;

    fn describe(&self, instance: &str) -> Result<AppInfo>;

    /// Settings directory of an instance (exists only once installed).
    fn settings_dir(&self, instance: &str) -> PathBuf;

    fn parse_instance_name(&self, instance: &str) -> (String, u32) {
        parse_instance_name(instance)
    }
}

/// Split `wordpress__2` into `("wordpress", 2)`; plain ids are instance 1.
pub fn parse_instance_name(instance: &str) -> (String, u32) {
    if let Some((app_id, number)) = instance.rsplit_once("__") {
        if !app_id.is_empty() && !number.starts_with('0') {
            if let Ok(number) = number.parse::<u32>() {
                return (app_id.to_string(), number);
            }
        }
    }
    (instance.to_string(), 1)
}

/// Registry reading one settings directory per instance, each holding the
/// app's `manifest.json` and `scripts/`.
pub struct SettingsRegistry {
    root: PathBuf,
}

impl SettingsRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AppRegistry for SettingsRegistry {
    fn installed(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    fn is_installed(&self, instance: &str) -> bool {
        self.settings_dir(instance).is_dir()
    }

    fn describe(&self, instance: &str) -> Result<AppInfo> {
        let dir = self.settings_dir(instance);
        if !dir.is_dir() {
            return Err(BackupError::AppNotFound(instance.to_string()));
        }
        describe_from_manifest(&dir.join("manifest.json"), instance)
    }

    fn settings_dir(&self, instance: &str) -> PathBuf {
        self.root.join(instance)
    }
}

fn describe_from_manifest(path: &Path, instance: &str) -> Result<AppInfo> {
    if !path.is_file() {
        let (app_id, _) = parse_instance_name(instance);
        return Ok(AppInfo {
            name: app_id,
            ..AppInfo::default()
        });
    }

    let manifest: Value = serde_json::from_str(&fs::read_to_string(path)?)?;
    let text = |key: &str| match manifest.get(key) {
        Some(Value::String(s)) => s.clone(),
        // Localized fields: prefer English, else any translation
        Some(Value::Object(map)) => map
            .get("en")
            .or_else(|| map.values().next())
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    };

    Ok(AppInfo {
        version: text("version"),
        name: text("name"),
        description: text("description"),
    })
}
