//! External collaborators the backup and restore engines drive.
//!
//! Each concern sits behind a trait so the engines never depend on how hooks
//! are discovered, where apps are registered or how the host is provisioned.

pub mod apps;
pub mod hooks;
pub mod system;

use crate::config::Config;
use apps::{AppRegistry, SettingsRegistry};
use hooks::{HookRunner, ScriptHooks};
use system::{CommandProvisioner, CommandReconfigurer, Provisioner, Reconfigurer};

/// The collaborators of one process, built once from the configuration.
pub struct Host {
    pub hooks: Box<dyn HookRunner>,
    pub apps: Box<dyn AppRegistry>,
    pub provisioner: Box<dyn Provisioner>,
    pub reconfigurer: Box<dyn Reconfigurer>,
}

impl Host {
    pub fn from_config(config: &Config) -> Self {
        Self {
            hooks: Box::new(ScriptHooks::new(
                config.paths.hooks_dir.clone(),
                config.paths.custom_hooks_dir.clone(),
                config.scripts.shell.clone(),
            )),
            apps: Box::new(SettingsRegistry::new(config.paths.apps_settings_dir.clone())),
            provisioner: Box::new(CommandProvisioner::new(config.commands.provision.clone())),
            reconfigurer: Box::new(CommandReconfigurer::new(config.commands.reconfigure.clone())),
        }
    }
}
