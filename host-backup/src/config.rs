//! Configuration management for the backup tool.
//!
//! Built-in defaults, then an optional TOML file, then `HOST_BACKUP__*`
//! environment overrides (e.g. `HOST_BACKUP__SPACE__MARGIN_MB=50`).

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/host-backup/config.toml";

/// Suffix of compressed archive artifacts.
pub const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// Suffix of the sidecar info document.
pub const INFO_SUFFIX: &str = ".info.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub space: SpaceConfig,
    pub scripts: ScriptsConfig,
    pub restore: RestoreConfig,
    pub commands: CommandsConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the backup area; staging and mount points live in `<root>/tmp`
    pub backup_root: PathBuf,

    /// Canonical archive directory (defaults to `<backup_root>/archives`)
    pub archives_dir: Option<PathBuf>,

    /// Where installed apps keep their settings and scripts
    pub apps_settings_dir: PathBuf,

    /// System hooks, one sub-directory per hook kind
    pub hooks_dir: PathBuf,

    /// Custom hooks, searched in addition to system hooks
    pub custom_hooks_dir: PathBuf,

    /// Present once the host has been provisioned
    pub installed_marker: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpaceConfig {
    /// Margin added to every space requirement, in MiB
    pub margin_mb: u64,

    /// Minimum free space for configuration-only restores, in MiB
    pub conf_margin_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptsConfig {
    /// Interpreter used for hook and app scripts
    pub shell: String,

    /// Owner of restored app scripts
    pub admin_user: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountStrategy {
    /// Read-only FUSE mount through the external helper
    Archivemount,
    /// Unpack the archive into the mount point
    Extract,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    pub mount: MountStrategy,
    pub mount_helper: String,
    pub unmount_helper: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    /// First-time provisioning (argv, extended with domain and admin options)
    pub provision: Vec<String>,

    /// Access/proxy reconfiguration after apps were restored
    pub reconfigure: Vec<String>,

    /// Binds source trees into staging for `mount` methods
    pub bind_helper: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            backup_root: PathBuf::from("/home/yunohost.backup"),
            archives_dir: None,
            apps_settings_dir: PathBuf::from("/etc/yunohost/apps"),
            hooks_dir: PathBuf::from("/usr/share/yunohost/hooks"),
            custom_hooks_dir: PathBuf::from("/etc/yunohost/hooks.d"),
            installed_marker: PathBuf::from("/etc/yunohost/installed"),
        }
    }
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            margin_mb: 100,
            conf_margin_mb: 10,
        }
    }
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            admin_user: "admin".to_string(),
        }
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            mount: MountStrategy::Archivemount,
            mount_helper: "archivemount".to_string(),
            unmount_helper: "umount".to_string(),
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            provision: vec!["yunohost".into(), "tools".into(), "postinstall".into()],
            reconfigure: vec!["yunohost".into(), "app".into(), "ssowatconf".into()],
            bind_helper: "mount".to_string(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration. An explicit path must exist; the default one may not.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::from(Path::new(DEFAULT_CONFIG_PATH)).required(false),
        };

        let settings = config::Config::builder()
            .add_source(file.format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix("HOST_BACKUP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn archives_dir(&self) -> PathBuf {
        self.paths
            .archives_dir
            .clone()
            .unwrap_or_else(|| self.paths.backup_root.join("archives"))
    }

    /// Canonical temporary location for an archive's staging or mount tree
    pub fn work_dir(&self, name: &str) -> PathBuf {
        self.paths.backup_root.join("tmp").join(name)
    }

    pub fn archive_path(&self, name: &str) -> PathBuf {
        self.archives_dir().join(format!("{}{}", name, ARCHIVE_SUFFIX))
    }

    pub fn info_path(&self, name: &str) -> PathBuf {
        self.archives_dir().join(format!("{}{}", name, INFO_SUFFIX))
    }

    pub fn margin_bytes(&self) -> u64 {
        self.space.margin_mb.saturating_mul(1024 * 1024)
    }

    pub fn conf_margin_bytes(&self) -> u64 {
        self.space.conf_margin_mb.saturating_mul(1024 * 1024)
    }

    pub fn is_provisioned(&self) -> bool {
        self.paths.installed_marker.is_file()
    }
}
