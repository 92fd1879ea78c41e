//! Host Backup Library
//!
//! Backs up and restores a self-hosting server's system configuration and
//! installed apps as gzip-compressed tar archives, driven by hook scripts.

pub mod backup;
pub mod catalog;
pub mod config;
pub mod fs;
pub mod host;
pub mod info;
pub mod manifest;
pub mod ops;
pub mod restore;
pub mod units;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use config::Config;
pub use units::Selection;
pub use utils::errors::{BackupError, ErrorKind};
pub type Result<T> = std::result::Result<T, BackupError>;
