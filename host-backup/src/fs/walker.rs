//! Directory traversal for size accounting and tree copies.
//!
//! Sizes follow `du -sb` semantics: the apparent size of every entry in the
//! tree, directories and symlinks included, without following links.

use std::fs;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// Apparent size of `root` and everything below it.
///
/// # Example
/// ```no_run
/// use host_backup::fs::walker::disk_usage;
/// use std::path::Path;
///
/// let size = disk_usage(Path::new("/etc/yunohost/apps")).unwrap();
/// println!("{} bytes", size);
/// ```
pub fn disk_usage(root: &Path) -> io::Result<u64> {
    let mut total = 0u64;

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        total += entry.metadata().map_err(io::Error::from)?.len();
    }

    Ok(total)
}

/// Copy a directory tree, recreating symlinks instead of following them.
/// `dest` is created if missing; existing files are overwritten.
pub fn copy_tree(src: &Path, dest: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            fs::set_permissions(&target, entry.metadata().map_err(io::Error::from)?.permissions())?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            if target.symlink_metadata().is_ok() {
                fs::remove_file(&target)?;
            }
            std::os::unix::fs::symlink(link, &target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

/// Copy a file or a directory tree to `dest`.
pub fn copy_path(src: &Path, dest: &Path) -> io::Result<()> {
    if src.is_dir() {
        return copy_tree(src, dest);
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dest)?;
    Ok(())
}
