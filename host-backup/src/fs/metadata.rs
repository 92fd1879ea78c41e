//! Ownership and permission handling for staged and restored trees.

use crate::Result;
use nix::unistd::{chown, User};
use std::fs;
use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::Path;
use walkdir::WalkDir;

/// Create `path` and its missing parents with the given mode (umask applies).
pub fn create_dir_with_mode(path: &Path, mode: u32) -> io::Result<()> {
    fs::DirBuilder::new().recursive(true).mode(mode).create(path)
}

/// Apply `dir_mode` to every directory and `file_mode` to every regular file
/// below `root`. Symlinks are left untouched.
pub fn set_mode_recursive(root: &Path, dir_mode: u32, file_mode: u32) -> io::Result<()> {
    // Parents first, so directories stay traversable while we descend.
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            continue;
        }
        let mode = if file_type.is_dir() { dir_mode } else { file_mode };
        fs::set_permissions(entry.path(), fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

/// Give every entry below `root` to `user`. Returns `false` without touching
/// anything when the user does not exist on this host.
pub fn chown_recursive(root: &Path, user: &str) -> Result<bool> {
    let Some(user) = User::from_name(user)? else {
        return Ok(false);
    };

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_symlink() {
            continue;
        }
        chown(entry.path(), Some(user.uid), None)?;
    }

    Ok(true)
}

/// Unix permission bits of `path` (without file type bits).
pub fn mode_of(path: &Path) -> io::Result<u32> {
    Ok(fs::metadata(path)?.permissions().mode() & 0o7777)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_set_mode_recursive() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("settings");
        fs::create_dir_all(root.join("scripts"))?;
        fs::write(root.join("settings.yml"), b"id: app")?;
        fs::write(root.join("scripts/restore"), b"#!/bin/sh")?;

        set_mode_recursive(&root.join("scripts"), 0o700, 0o500)?;
        set_mode_recursive(&root, 0o700, 0o400)?;

        assert_eq!(mode_of(&root)?, 0o700);
        assert_eq!(mode_of(&root.join("settings.yml"))?, 0o400);
        assert_eq!(mode_of(&root.join("scripts/restore"))?, 0o400);

        // Restore write access so the temp dir can be dropped.
        set_mode_recursive(&root, 0o755, 0o644)
    }

    #[test]
    fn test_create_dir_with_mode() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("a/b");
        create_dir_with_mode(&path, 0o750)?;
        assert!(path.is_dir());
        // umask may only remove bits
        assert_eq!(mode_of(&path)? & !0o750, 0);
        Ok(())
    }

    #[test]
    fn test_chown_unknown_user() -> Result<()> {
        let temp_dir = TempDir::new()?;
        assert!(!chown_recursive(temp_dir.path(), "no-such-user-host-backup")?);
        Ok(())
    }
}
