//! Entry points of the command surface: argument validation, then one
//! backup or restore session whose cleanup runs on every exit path.

use crate::backup::methods::ARCHIVES_MODE;
use crate::backup::{BackupMethod, BackupSession};
use crate::catalog::{ArchiveSummary, Catalog, Listing};
use crate::config::Config;
use crate::fs::metadata::create_dir_with_mode;
use crate::fs::space::{SpaceGuard, SpacePolicy};
use crate::host::Host;
use crate::info::ArchiveInfo;
use crate::restore::{RestoreResult, RestoreSession};
use crate::units::Selection;
use crate::{BackupError, Result};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use tracing::{error, info};

/// Top-level directories an archive may never be written into.
const FORBIDDEN_OUTPUT_ROOTS: &[&str] = &[
    "bin", "boot", "dev", "etc", "lib", "root", "run", "sbin", "sys", "usr", "var",
];

#[derive(Debug, Clone)]
pub struct CreateRequest {
    /// Defaults to the local time, `YYYYMMDD-HHMMSS`
    pub name: Option<String>,
    pub description: String,
    pub output_dir: Option<PathBuf>,
    pub compress: bool,
    pub hooks: Selection,
    pub apps: Selection,
    /// Defaults to `tar`, or `copy` when not compressing
    pub methods: Vec<String>,
}

impl Default for CreateRequest {
    fn default() -> Self {
        Self {
            name: None,
            description: String::new(),
            output_dir: None,
            compress: true,
            hooks: Selection::All,
            apps: Selection::All,
            methods: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RestoreRequest {
    pub name: String,
    pub hooks: Selection,
    pub apps: Selection,
    /// Restore system hooks on an already provisioned host
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedArchive {
    pub name: String,
    #[serde(flatten)]
    pub info: ArchiveInfo,
}

/// Create an archive.
pub fn create(config: &Config, host: &Host, request: &CreateRequest) -> Result<CreatedArchive> {
    let output_dir = validate_create(config, request)?;
    let name = match &request.name {
        Some(name) => name.clone(),
        None => default_name(),
    };
    validate_name(&name)?;
    if Catalog::new(config).exists(&name) {
        return Err(BackupError::NameExists(name));
    }

    let methods: Vec<BackupMethod> = if request.methods.is_empty() {
        vec![BackupMethod::from_name(if request.compress { "tar" } else { "copy" })]
    } else {
        request.methods.iter().map(|m| BackupMethod::from_name(m)).collect()
    };

    create_dir_with_mode(&config.archives_dir(), ARCHIVES_MODE)?;
    let target = output_dir.clone().unwrap_or_else(|| config.archives_dir());
    SpaceGuard::from_config(config).ensure_space(0, &target, SpacePolicy::Strict)?;

    let staging = if request.compress { None } else { output_dir.as_deref() };
    let mut session = BackupSession::open(config, host, &name, &request.description, staging)?;

    let outcome = run_backup(&mut session, request, &methods, &target);
    let retcode = if outcome.is_ok() { 0 } else { 1 };
    if let Err(e) = session.clean(retcode) {
        error!(archive = %name, error = %e, "Backup cleaning failed");
    }
    outcome?;

    info!(archive = %name, "Backup created");
    Ok(CreatedArchive {
        name,
        info: session.into_info(),
    })
}

fn run_backup(
    session: &mut BackupSession,
    request: &CreateRequest,
    methods: &[BackupMethod],
    target: &Path,
) -> Result<()> {
    session.collect(&request.hooks, &request.apps)?;
    session.finalize()?;
    for method in methods {
        session.apply(method, target)?;
    }
    Ok(())
}

/// Validate a create request before touching anything. Returns the
/// absolute output directory, if any.
fn validate_create(config: &Config, request: &CreateRequest) -> Result<Option<PathBuf>> {
    if request.hooks.is_skip() && request.apps.is_skip() {
        return Err(BackupError::ActionRequired);
    }

    let Some(dir) = &request.output_dir else {
        if !request.compress {
            return Err(BackupError::OutputDirRequired);
        }
        return Ok(None);
    };

    let dir = absolute(dir)?;
    if is_forbidden_output(&dir, &absolute(&config.archives_dir())?) {
        return Err(BackupError::OutputDirForbidden(dir));
    }
    if !request.compress && dir.is_dir() && dir.read_dir()?.next().is_some() {
        return Err(BackupError::OutputDirNotEmpty(dir));
    }
    Ok(Some(dir))
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(BackupError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn default_name() -> String {
    chrono::Local::now().format("%Y%m%d-%H%M%S").to_string()
}

/// Make `path` absolute and drop `.` and `..` components without touching
/// the filesystem.
fn absolute(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::from("/");
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    Ok(normalized)
}

fn is_forbidden_output(dir: &Path, archives_dir: &Path) -> bool {
    if dir.starts_with(archives_dir) {
        return true;
    }
    match dir.components().nth(1) {
        None => true,
        Some(Component::Normal(top)) => FORBIDDEN_OUTPUT_ROOTS
            .iter()
            .any(|root| top == std::ffi::OsStr::new(root)),
        Some(_) => false,
    }
}

/// Restore an archive.
pub fn restore(config: &Config, host: &Host, request: &RestoreRequest) -> Result<RestoreResult> {
    validate_name(&request.name)?;
    if request.hooks.is_skip() && request.apps.is_skip() {
        return Err(BackupError::ActionRequired);
    }
    if config.is_provisioned() && !request.hooks.is_skip() && !request.force {
        return Err(BackupError::AlreadyInstalled);
    }

    let mut session = RestoreSession::mount(config, host, &request.name)?;
    let outcome = session.restore(&request.hooks, &request.apps);
    let retcode = if outcome.is_ok() { 0 } else { 1 };
    if let Err(e) = session.clean(retcode) {
        error!(archive = %request.name, error = %e, "Restore cleaning failed");
    }
    outcome?;

    Ok(session.into_result())
}

/// List archives, optionally with their summaries.
pub fn list(config: &Config, with_info: bool, human_readable: bool) -> Result<Listing> {
    Catalog::new(config).list(with_info, human_readable)
}

/// Summary of one archive.
pub fn info(config: &Config, name: &str, with_details: bool, human_readable: bool) -> Result<ArchiveSummary> {
    validate_name(name)?;
    Catalog::new(config).info(name, with_details, human_readable)
}

/// Delete an archive's artifact and info file.
pub fn delete(config: &Config, host: &Host, name: &str) -> Result<()> {
    validate_name(name)?;
    Catalog::new(config).delete(host.hooks.as_ref(), name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;
    use crate::ErrorKind;
    use std::fs;

    fn named(name: &str) -> CreateRequest {
        CreateRequest {
            name: Some(name.to_string()),
            ..CreateRequest::default()
        }
    }

    #[test]
    fn test_is_forbidden_output() {
        let archives = Path::new("/home/yunohost.backup/archives");
        assert!(is_forbidden_output(Path::new("/"), archives));
        assert!(is_forbidden_output(Path::new("/etc"), archives));
        assert!(is_forbidden_output(Path::new("/var/backups"), archives));
        assert!(is_forbidden_output(Path::new("/home/yunohost.backup/archives/x"), archives));
        assert!(!is_forbidden_output(Path::new("/home/yunohost.backup/other"), archives));
        assert!(!is_forbidden_output(Path::new("/mnt/usb"), archives));
        assert!(!is_forbidden_output(Path::new("/etcetera"), archives));
    }

    #[test]
    fn test_absolute() -> Result<()> {
        assert_eq!(absolute(Path::new("/mnt/./usb/../disk"))?, PathBuf::from("/mnt/disk"));
        assert_eq!(absolute(Path::new("/../.."))?, PathBuf::from("/"));
        Ok(())
    }

    #[test]
    fn test_validation_runs_before_staging() -> Result<()> {
        let fixture = Fixture::new()?;
        let host = fixture.host();
        let request = CreateRequest {
            hooks: Selection::Skip,
            apps: Selection::Skip,
            ..named("nothing")
        };

        let err = create(&fixture.config, &host, &request).unwrap_err();
        assert!(matches!(err, BackupError::ActionRequired));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!fixture.config.work_dir("nothing").exists());
        assert!(!fixture.config.archives_dir().exists());
        Ok(())
    }

    #[test]
    fn test_output_dir_rules() -> Result<()> {
        let fixture = Fixture::new()?;
        let host = fixture.host();

        let request = CreateRequest {
            compress: false,
            ..named("copy")
        };
        assert!(matches!(
            create(&fixture.config, &host, &request).unwrap_err(),
            BackupError::OutputDirRequired
        ));

        let busy = fixture.path("busy");
        fs::create_dir_all(&busy)?;
        fs::write(busy.join("file"), "")?;
        let request = CreateRequest {
            compress: false,
            output_dir: Some(busy),
            ..named("copy")
        };
        assert!(matches!(
            create(&fixture.config, &host, &request).unwrap_err(),
            BackupError::OutputDirNotEmpty(_)
        ));

        let request = CreateRequest {
            output_dir: Some(fixture.config.archives_dir().join("nested")),
            ..named("copy")
        };
        assert!(matches!(
            create(&fixture.config, &host, &request).unwrap_err(),
            BackupError::OutputDirForbidden(_)
        ));

        assert!(matches!(
            create(&fixture.config, &host, &named("a/b")).unwrap_err(),
            BackupError::InvalidName(_)
        ));
        Ok(())
    }

    #[test]
    fn test_name_collision_keeps_first_archive() -> Result<()> {
        let fixture = Fixture::new()?;
        fixture.add_conf_hook("conf_ssh", "first")?;
        let host = fixture.host();

        let created = create(&fixture.config, &host, &named("weekly"))?;
        assert_eq!(created.name, "weekly");
        let archive = fixture.config.archive_path("weekly");
        let before = fs::metadata(&archive)?.len();

        let err = create(&fixture.config, &host, &named("weekly")).unwrap_err();
        assert!(matches!(err, BackupError::NameExists(_)));
        assert_eq!(fs::metadata(&archive)?.len(), before);
        Ok(())
    }

    #[test]
    fn test_uncompressed_copy_into_output_dir() -> Result<()> {
        let fixture = Fixture::new()?;
        fixture.add_conf_hook("conf_ssh", "plain")?;
        let host = fixture.host();
        let output = fixture.path("export");

        let request = CreateRequest {
            compress: false,
            output_dir: Some(output.clone()),
            ..named("plain")
        };
        create(&fixture.config, &host, &request)?;

        assert!(output.join("info.json").is_file());
        assert!(output.join("backup.csv").is_file());
        assert_eq!(fs::read_to_string(output.join("conf/conf_ssh"))?.trim(), "plain");
        assert!(!fixture.config.archive_path("plain").exists());
        Ok(())
    }

    #[test]
    fn test_failed_backup_leaves_no_staging() -> Result<()> {
        let fixture = Fixture::new()?;
        let host = fixture.host();

        let err = create(&fixture.config, &host, &named("empty")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Aggregate);
        assert!(!fixture.config.work_dir("empty").exists());
        assert!(!fixture.config.archive_path("empty").exists());
        Ok(())
    }

    #[test]
    fn test_restore_validation() -> Result<()> {
        let fixture = Fixture::new()?;
        fixture.set_provisioned(true)?;
        let host = fixture.host();

        let request = RestoreRequest {
            name: "any".into(),
            hooks: Selection::Skip,
            apps: Selection::Skip,
            force: false,
        };
        assert!(matches!(
            restore(&fixture.config, &host, &request).unwrap_err(),
            BackupError::ActionRequired
        ));

        let request = RestoreRequest {
            name: "any".into(),
            ..RestoreRequest::default()
        };
        assert!(matches!(
            restore(&fixture.config, &host, &request).unwrap_err(),
            BackupError::AlreadyInstalled
        ));

        let request = RestoreRequest {
            name: "any".into(),
            force: true,
            ..RestoreRequest::default()
        };
        assert!(matches!(
            restore(&fixture.config, &host, &request).unwrap_err(),
            BackupError::ArchiveNotFound(_)
        ));
        Ok(())
    }

    #[test]
    fn test_names_with_path_components_are_rejected() -> Result<()> {
        let fixture = Fixture::new()?;
        let host = fixture.host();
        let victim = fixture.config.paths.backup_root.join("victim");
        fs::create_dir_all(&victim)?;

        for name in ["../victim", "..", "a/b", ""] {
            let request = RestoreRequest {
                name: name.into(),
                force: true,
                ..RestoreRequest::default()
            };
            assert!(matches!(
                restore(&fixture.config, &host, &request).unwrap_err(),
                BackupError::InvalidName(_)
            ));
            assert!(matches!(
                info(&fixture.config, name, false, false).unwrap_err(),
                BackupError::InvalidName(_)
            ));
            assert!(matches!(
                delete(&fixture.config, &host, name).unwrap_err(),
                BackupError::InvalidName(_)
            ));
        }
        assert!(victim.is_dir());
        Ok(())
    }

    #[test]
    fn test_backup_then_restore() -> Result<()> {
        let fixture = Fixture::new()?;
        fixture.add_conf_hook("conf_ssh", "round trip")?;
        fixture.install_app("wiki", None)?;
        let host = fixture.host();

        create(&fixture.config, &host, &named("full"))?;
        fixture.uninstall_app("wiki")?;
        fixture.set_provisioned(true)?;

        let request = RestoreRequest {
            name: "full".into(),
            force: true,
            ..RestoreRequest::default()
        };
        let result = restore(&fixture.config, &host, &request)?;

        assert_eq!(result.apps, vec!["wiki".to_string()]);
        assert!(result.hooks.contains_key("conf_ssh"));
        assert_eq!(fs::read_to_string(fixture.path("restored/conf_ssh"))?.trim(), "round trip");
        assert_eq!(fs::read_to_string(fixture.path("restored/wiki.txt"))?.trim(), "wiki");
        assert!(!fixture.config.work_dir("full").exists());
        Ok(())
    }
}
