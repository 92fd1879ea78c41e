//! Filesystem helpers: size accounting, tree copies, permissions, free space.

pub mod metadata;
pub mod space;
pub mod walker;
