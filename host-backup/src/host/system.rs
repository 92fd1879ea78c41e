//! Host-wide collaborators: first-time provisioning and access/proxy
//! reconfiguration, both delegated to external commands.

use crate::{BackupError, Result};
use std::process::Command;
use tracing::{debug, info};

pub trait Provisioner {
    fn provision(&self, domain: &str, admin_user: &str, as_restore: bool) -> Result<()>;
}

pub trait Reconfigurer {
    fn reconfigure(&self) -> Result<()>;
}

/// Runs the configured provisioning command with
/// `--domain <domain> --admin <user> [--ignore-dyndns]` appended.
pub struct CommandProvisioner {
    argv: Vec<String>,
}

impl CommandProvisioner {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

impl Provisioner for CommandProvisioner {
    fn provision(&self, domain: &str, admin_user: &str, as_restore: bool) -> Result<()> {
        let mut extra = vec![
            "--domain".to_string(),
            domain.to_string(),
            "--admin".to_string(),
            admin_user.to_string(),
        ];
        if as_restore {
            extra.push("--ignore-dyndns".to_string());
        }

        info!(domain, "Provisioning host before restoring");
        run(&self.argv, &extra).map_err(BackupError::Provisioning)
    }
}

pub struct CommandReconfigurer {
    argv: Vec<String>,
}

impl CommandReconfigurer {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

impl Reconfigurer for CommandReconfigurer {
    fn reconfigure(&self) -> Result<()> {
        run(&self.argv, &[]).map_err(BackupError::Reconfiguration)
    }
}

/// Run `argv` followed by `extra`. An empty `argv` is a no-op.
fn run(argv: &[String], extra: &[String]) -> std::result::Result<(), String> {
    let Some((program, args)) = argv.split_first() else {
        debug!("No command configured, skipping");
        return Ok(());
    };

    let status = Command::new(program)
        .args(args)
        .args(extra)
        .status()
        .map_err(|e| format!("{}: {}", program, e))?;

    if status.success() {
        Ok(())
    } else {
        Err(format!("{} exited with {}", program, status))
    }
}
