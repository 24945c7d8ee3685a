//! Cache root resolution.

use crate::env;
use crate::error::{CacheError, CacheResult};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Final component every cache root ends in.
pub const SENTINEL: &str = ".minikube";

/// Absolute directory all artifact kinds live under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheRoot(PathBuf);

impl CacheRoot {
    /// Resolve from `MINIKUBE_HOME`, falling back to `~/.minikube`.
    pub fn from_env() -> CacheResult<Self> {
        let base = match env::non_empty(env::MINIKUBE_HOME) {
            Some(v) => PathBuf::from(v),
            None => dirs::home_dir().ok_or_else(|| {
                CacheError::Internal("could not determine home directory".to_string())
            })?,
        };
        let root = Self::new(base)?;
        debug!("Cache root: {}", root.display());
        Ok(root)
    }

    /// Build a root from a base directory, appending the sentinel unless present.
    pub fn new(base: impl Into<PathBuf>) -> CacheResult<Self> {
        let base = base.into();
        let dir = if base.file_name().is_some_and(|n| n == SENTINEL) {
            base
        } else {
            base.join(SENTINEL)
        };
        let dir = if dir.is_absolute() {
            dir
        } else {
            std::env::current_dir()
                .map_err(|e| CacheError::io("getting current directory", e))?
                .join(dir)
        };
        Ok(Self(dir))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn join(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.0.join(rel)
    }

    pub fn display(&self) -> std::path::Display<'_> {
        self.0.display()
    }

    /// Directory holding boot images.
    pub fn iso_dir(&self) -> PathBuf {
        self.0.join("iso")
    }

    /// Directory holding binaries, drivers, licenses and preloads.
    pub fn cache_dir(&self) -> PathBuf {
        self.0.join("cache")
    }

    pub fn preload_dir(&self) -> PathBuf {
        self.cache_dir().join("preloaded-tarball")
    }

    /// Directory holding saved container images.
    pub fn kic_dir(&self) -> PathBuf {
        self.0.join("kic")
    }
}

impl AsRef<Path> for CacheRoot {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}
