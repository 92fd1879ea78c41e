//! Archive catalog: the archives published in the canonical archives
//! directory, each an artifact `<name>.tar.gz` (possibly a symlink to an
//! artifact stored elsewhere) plus its `<name>.info.json`.

use crate::config::{Config, ARCHIVE_SUFFIX};
use crate::host::hooks::{Env, HookRunner};
use crate::info::{AppInfo, ArchiveInfo};
use crate::restore::mount::members_size;
use crate::utils::format::{format_bytes, format_timestamp};
use crate::{BackupError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

const PRE_DELETE_KIND: &str = "pre_backup_delete";
const POST_DELETE_KIND: &str = "post_backup_delete";

/// Archive size, raw or formatted for humans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Size {
    Bytes(u64),
    Human(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveSummary {
    /// Resolved artifact path
    pub path: PathBuf,
    pub created_at: String,
    pub description: String,
    pub size: Size,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apps: Option<BTreeMap<String, AppInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hooks: Option<BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Listing {
    Names(Vec<String>),
    Detailed(BTreeMap<String, ArchiveSummary>),
}

pub struct Catalog<'a> {
    config: &'a Config,
}

impl<'a> Catalog<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Names of the published archives, sorted.
    pub fn names(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(self.config.archives_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                e.file_name()
                    .to_string_lossy()
                    .strip_suffix(ARCHIVE_SUFFIX)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
            })
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.config.archive_path(name).symlink_metadata().is_ok()
    }

    /// Every archive, optionally with its summary. Archives whose summary
    /// cannot be read are left out of a detailed listing.
    pub fn list(&self, with_info: bool, human_readable: bool) -> Result<Listing> {
        let names = self.names()?;
        if !with_info {
            return Ok(Listing::Names(names));
        }

        let mut detailed = BTreeMap::new();
        for name in names {
            match self.info(&name, false, human_readable) {
                Ok(summary) => {
                    detailed.insert(name, summary);
                }
                Err(e) => warn!(archive = %name, error = %e, "Skipping unreadable archive"),
            }
        }
        Ok(Listing::Detailed(detailed))
    }

    /// Summary of archive `name`.
    pub fn info(&self, name: &str, with_details: bool, human_readable: bool) -> Result<ArchiveSummary> {
        let link = self.config.archive_path(name);
        let meta = link
            .symlink_metadata()
            .map_err(|_| BackupError::ArchiveNotFound(name.to_string()))?;

        let path = if meta.file_type().is_symlink() {
            let target = fs::read_link(&link)?;
            let target = match link.parent() {
                Some(dir) if target.is_relative() => dir.join(target),
                _ => target,
            };
            if !target.exists() {
                return Err(BackupError::BrokenLink(target));
            }
            fs::canonicalize(&target)?
        } else {
            link
        };

        let info_path = self.config.info_path(name);
        let info = ArchiveInfo::load(&info_path).map_err(|e| {
            BackupError::InvalidArchive(format!("unable to read {}: {}", info_path.display(), e))
        })?;

        let size = if info.size == 0 {
            members_size(&path)?
        } else {
            info.size
        };

        Ok(ArchiveSummary {
            path,
            created_at: format_timestamp(info.created_at),
            description: info.description,
            size: if human_readable {
                Size::Human(format_bytes(size))
            } else {
                Size::Bytes(size)
            },
            apps: with_details.then_some(info.apps),
            hooks: with_details.then_some(info.hooks),
        })
    }

    /// Delete archive `name`: its artifact and info file, or neither.
    pub fn delete(&self, hooks: &dyn HookRunner, name: &str) -> Result<()> {
        let files = [self.config.archive_path(name), self.config.info_path(name)];
        for file in &files {
            if !file.is_file() {
                return Err(BackupError::ArchiveNotFound(name.to_string()));
            }
        }

        let args = [name.to_string()];
        let pre = hooks.invoke(PRE_DELETE_KIND, &[], &args, &Env::new(), None);
        for hook in &pre.failed {
            warn!(hook = %hook, archive = %name, "Pre-delete callback failed");
        }

        for file in &files {
            fs::remove_file(file).map_err(|e| BackupError::DeleteFailed {
                path: file.clone(),
                reason: e.to_string(),
            })?;
        }

        let post = hooks.invoke(POST_DELETE_KIND, &[], &args, &Env::new(), None);
        for hook in &post.failed {
            warn!(hook = %hook, archive = %name, "Post-delete callback failed");
        }

        info!(archive = %name, "Archive deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{BackupMethod, BackupSession};
    use crate::test_support::Fixture;
    use crate::units::Selection;

    fn archive(fixture: &Fixture, name: &str) -> Result<()> {
        let host = fixture.host();
        let mut session = BackupSession::open(&fixture.config, &host, name, "nightly", None)?;
        session.collect(&Selection::All, &Selection::All)?;
        session.finalize()?;
        session.apply(&BackupMethod::Tar, &fixture.config.archives_dir())?;
        session.clean(0)
    }

    #[test]
    fn test_list_is_sorted() -> Result<()> {
        let fixture = Fixture::new()?;
        fixture.add_conf_hook("conf_ssh", "x")?;
        archive(&fixture, "b")?;
        archive(&fixture, "a")?;
        fs::write(fixture.config.archives_dir().join("notes.txt"), "")?;

        let catalog = Catalog::new(&fixture.config);
        assert_eq!(catalog.names()?, vec!["a".to_string(), "b".to_string()]);

        match catalog.list(true, true)? {
            Listing::Detailed(map) => {
                assert_eq!(map.keys().collect::<Vec<_>>(), vec!["a", "b"]);
                assert_eq!(map["a"].description, "nightly");
                assert!(matches!(map["a"].size, Size::Human(_)));
            }
            other => panic!("unexpected listing: {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_list_without_archives_dir() -> Result<()> {
        let fixture = Fixture::new()?;
        assert!(Catalog::new(&fixture.config).names()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_info_details() -> Result<()> {
        let fixture = Fixture::new()?;
        fixture.install_app("wiki", None)?;
        archive(&fixture, "details")?;

        let catalog = Catalog::new(&fixture.config);
        let summary = catalog.info("details", true, false)?;
        assert_eq!(summary.path, fixture.config.archive_path("details"));
        assert!(summary.apps.unwrap().contains_key("wiki"));
        assert!(matches!(summary.size, Size::Bytes(n) if n > 0));

        let brief = catalog.info("details", false, false)?;
        assert!(brief.apps.is_none());
        let json = serde_json::to_value(&brief)?;
        assert!(json.get("hooks").is_none());
        Ok(())
    }

    #[test]
    fn test_info_falls_back_to_member_sizes() -> Result<()> {
        let fixture = Fixture::new()?;
        fixture.add_conf_hook("conf_ssh", "x")?;
        archive(&fixture, "legacy")?;

        let info_path = fixture.config.info_path("legacy");
        let mut info = ArchiveInfo::load(&info_path)?;
        info.size = 0;
        info.save(&info_path)?;

        let summary = Catalog::new(&fixture.config).info("legacy", false, false)?;
        let expected = members_size(&fixture.config.archive_path("legacy"))?;
        assert!(expected > 0);
        assert_eq!(summary.size, Size::Bytes(expected));
        Ok(())
    }

    #[test]
    fn test_broken_link() -> Result<()> {
        let fixture = Fixture::new()?;
        let archives = fixture.config.archives_dir();
        fs::create_dir_all(&archives)?;
        std::os::unix::fs::symlink(fixture.path("gone.tar.gz"), archives.join("gone.tar.gz"))?;

        let catalog = Catalog::new(&fixture.config);
        let err = catalog.info("gone", false, false).unwrap_err();
        assert!(matches!(err, BackupError::BrokenLink(_)));
        assert!(matches!(
            catalog.info("unknown", false, false).unwrap_err(),
            BackupError::ArchiveNotFound(_)
        ));
        Ok(())
    }

    #[test]
    fn test_delete_both_or_neither() -> Result<()> {
        let fixture = Fixture::new()?;
        fixture.add_conf_hook("conf_ssh", "x")?;
        archive(&fixture, "keep")?;
        archive(&fixture, "drop")?;
        fs::remove_file(fixture.config.info_path("keep"))?;
        fixture.add_hook(
            POST_DELETE_KIND,
            "50-record",
            &format!("echo \"$1\" > '{}'", fixture.path("deleted").display()),
        )?;

        let host = fixture.host();
        let catalog = Catalog::new(&fixture.config);

        let err = catalog.delete(host.hooks.as_ref(), "keep").unwrap_err();
        assert!(matches!(err, BackupError::ArchiveNotFound(_)));
        assert!(fixture.config.archive_path("keep").exists());

        catalog.delete(host.hooks.as_ref(), "drop")?;
        assert!(!fixture.config.archive_path("drop").exists());
        assert!(!fixture.config.info_path("drop").exists());
        assert_eq!(fs::read_to_string(fixture.path("deleted"))?.trim(), "drop");
        assert_eq!(catalog.names()?, vec!["keep".to_string()]);
        Ok(())
    }
}
