//! Backup manifest: the ordered list of `(source, dest)` pairs defining what
//! an archive contains.
//!
//! The manifest is a headerless CSV file with every field quoted, living in
//! the staging directory as `backup.csv`. Hook scripts append rows to it
//! directly (its path is exported to them), so the writer opens it in append
//! mode and flushes after every row. [`ManifestWriter::finalize`] consumes the
//! writer and reads the file back, so nothing can be appended once a consumer
//! holds a [`Manifest`].

use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Manifest file name inside the staging directory and the archive.
pub const MANIFEST_FILE: &str = "backup.csv";

/// One manifest row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Absolute path on the host
    pub source: PathBuf,
    /// Path relative to the archive root
    pub dest: PathBuf,
}

/// Append-only side of the manifest, alive during collection.
pub struct ManifestWriter {
    staging_dir: PathBuf,
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl ManifestWriter {
    /// Start an empty manifest in `staging_dir`, truncating any previous one.
    pub fn create(staging_dir: &Path) -> Result<Self> {
        let path = staging_dir.join(MANIFEST_FILE);
        File::create(&path)?;
        let file = OpenOptions::new().append(true).open(&path)?;

        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .quote_style(csv::QuoteStyle::Always)
            .from_writer(file);

        Ok(Self {
            staging_dir: staging_dir.to_path_buf(),
            path,
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record `source` to be stored at `dest`.
    ///
    /// A `dest` ending with `/` is a directory to put `source` into, keeping
    /// its basename; any other `dest` renames `source`.
    ///
    /// ```text
    /// mark("/var/www/wordpress", "sources")  => sources
    /// mark("/var/www/wordpress", "sources/") => sources/wordpress
    /// ```
    pub fn mark(&mut self, source: impl AsRef<Path>, dest: &str) -> Result<()> {
        let source = source.as_ref();
        let dest = if dest.ends_with('/') {
            match source.file_name() {
                Some(name) => Path::new(dest).join(name),
                None => PathBuf::from(dest.trim_end_matches('/')),
            }
        } else {
            PathBuf::from(dest)
        };

        self.writer.serialize(ManifestEntry {
            source: source.to_path_buf(),
            dest,
        })?;
        self.writer.flush()?;
        Ok(())
    }

    /// Record a path relative to the staging directory, stored under the same
    /// relative path in the archive.
    pub fn mark_staged(&mut self, relative: &str) -> Result<()> {
        let source = self.staging_dir.join(relative);
        self.mark(source, relative)
    }

    /// Current end of the manifest, to roll back to if a unit of work fails.
    pub fn checkpoint(&mut self) -> Result<u64> {
        self.writer.flush()?;
        Ok(self.writer.get_ref().metadata()?.len())
    }

    /// Drop every row written after `checkpoint`, by this writer or by
    /// scripts.
    pub fn rollback(&mut self, checkpoint: u64) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().set_len(checkpoint)?;
        Ok(())
    }

    /// Close the writer and return the ordered, read-only manifest, including
    /// rows appended by external scripts.
    pub fn finalize(mut self) -> Result<Manifest> {
        self.writer.flush()?;
        let path = self.path.clone();
        drop(self);
        Manifest::load(&path)
    }
}

/// Finalized manifest, read back in file order.
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)?;

        let entries = reader
            .deserialize::<ManifestEntry>()
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ManifestEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = &'a ManifestEntry;
    type IntoIter = std::slice::Iter<'a, ManifestEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_mark_rename_and_inside() -> Result<()> {
        let staging = TempDir::new()?;
        let mut writer = ManifestWriter::create(staging.path())?;

        writer.mark("/var/www/wordpress", "sources")?;
        writer.mark("/var/www/wordpress", "sources/")?;
        writer.mark_staged("conf")?;

        let manifest = writer.finalize()?;
        let dests: Vec<_> = manifest.iter().map(|e| e.dest.clone()).collect();
        assert_eq!(
            dests,
            vec![
                PathBuf::from("sources"),
                PathBuf::from("sources/wordpress"),
                PathBuf::from("conf"),
            ]
        );
        assert_eq!(manifest.entries()[2].source, staging.path().join("conf"));
        Ok(())
    }

    #[test]
    fn test_every_field_is_quoted() -> Result<()> {
        let staging = TempDir::new()?;
        let mut writer = ManifestWriter::create(staging.path())?;
        writer.mark("/etc/hosts", "conf/hosts")?;
        let manifest = writer.finalize()?;

        let raw = std::fs::read_to_string(manifest.path())?;
        assert_eq!(raw.trim_end(), r#""/etc/hosts","conf/hosts""#);
        Ok(())
    }

    #[test]
    fn test_external_rows_keep_their_position() -> Result<()> {
        let staging = TempDir::new()?;
        let mut writer = ManifestWriter::create(staging.path())?;
        writer.mark("/first", "first")?;

        // A hook script appending through the exported manifest path
        let mut external = OpenOptions::new().append(true).open(writer.path())?;
        writeln!(external, "\"/second\",\"second\"")?;
        drop(external);

        writer.mark("/third", "third")?;
        let manifest = writer.finalize()?;

        let sources: Vec<_> = manifest.iter().map(|e| e.source.clone()).collect();
        assert_eq!(
            sources,
            vec![
                PathBuf::from("/first"),
                PathBuf::from("/second"),
                PathBuf::from("/third"),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_rollback_drops_later_rows() -> Result<()> {
        let staging = TempDir::new()?;
        let mut writer = ManifestWriter::create(staging.path())?;
        writer.mark("/kept", "kept")?;

        let checkpoint = writer.checkpoint()?;
        writer.mark("/etc/yunohost/apps/wiki", "apps/wiki/settings")?;
        let mut external = OpenOptions::new().append(true).open(writer.path())?;
        writeln!(external, "\"/var/www/wiki\",\"apps/wiki/backup/www\"")?;
        drop(external);

        writer.rollback(checkpoint)?;
        writer.mark("/after", "after")?;

        let manifest = writer.finalize()?;
        let dests: Vec<_> = manifest.iter().map(|e| e.dest.clone()).collect();
        assert_eq!(dests, vec![PathBuf::from("kept"), PathBuf::from("after")]);
        Ok(())
    }

    #[test]
    fn test_create_truncates_previous_manifest() -> Result<()> {
        let staging = TempDir::new()?;
        std::fs::write(staging.path().join(MANIFEST_FILE), "\"/old\",\"old\"\n")?;

        let manifest = ManifestWriter::create(staging.path())?.finalize()?;
        assert!(manifest.is_empty());
        Ok(())
    }
}
