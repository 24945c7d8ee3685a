//! Existence probe for published artifacts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What the probe knows about a published file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: PathBuf,
    pub size: u64,
}

/// Pluggable probe; `None` is a cache miss.
pub type ProbeFn = Arc<dyn Fn(&Path) -> Option<FileInfo> + Send + Sync>;

/// Stat the path. Zero-length and missing files are both misses.
pub fn stat(path: &Path) -> Option<FileInfo> {
    let meta = std::fs::metadata(path).ok()?;
    if !meta.is_file() || meta.len() == 0 {
        return None;
    }
    Some(FileInfo {
        path: path.to_path_buf(),
        size: meta.len(),
    })
}

pub fn default_probe() -> ProbeFn {
    Arc::new(stat)
}
