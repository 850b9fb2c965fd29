//! Interleaved Bloom filter layouts, counting agents, and index building.

pub mod build;
pub mod compressed;
pub mod ibf;

use std::path::{Path, PathBuf};

/// File location of one part of a split index: `<prefix>_<part>`.
/// Single-file indexes live at the prefix itself.
pub fn part_path(prefix: &Path, part: usize) -> PathBuf {
    PathBuf::from(format!("{}_{}", prefix.display(), part))
}
