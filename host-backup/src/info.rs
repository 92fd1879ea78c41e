//! Archive info document (`info.json`).
//!
//! Written once when the manifest is finalized, stored at the archive root
//! and copied next to the artifact as `<name>.info.json`.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Info file name inside the staging directory and the archive.
pub const INFO_FILE: &str = "info.json";

/// Description of one backed-up app instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveInfo {
    #[serde(default)]
    pub description: String,

    /// Creation time, seconds since the Unix epoch
    pub created_at: i64,

    /// Total size of the manifest sources in bytes (0 when never recorded)
    #[serde(default, alias = "size_bytes")]
    pub size: u64,

    #[serde(default)]
    pub apps: BTreeMap<String, AppInfo>,

    /// Execution record of every hook that succeeded. Records are kept as
    /// raw JSON so archives from other hook versions load unchanged.
    #[serde(default)]
    pub hooks: BTreeMap<String, serde_json::Value>,

    /// Hooks that ran and failed during collection
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_hooks: Vec<String>,
}

impl ArchiveInfo {
    pub fn new(description: impl Into<String>, created_at: i64) -> Self {
        Self {
            description: description.into(),
            created_at,
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    /// True when neither a hook nor an app contributed to the archive.
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty() && self.apps.is_empty()
    }
}
