//! Path resolution: descriptor to (final, lock, download) paths.

use super::artifact::Artifact;
use crate::error::CacheResult;
use crate::localpath::CacheRoot;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Paths belonging to one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactPaths {
    /// Where the verified artifact is published.
    pub target: PathBuf,
    /// Side-car advisory lock file.
    pub lock: PathBuf,
    /// Side-car partial download, kept for resume.
    pub download: PathBuf,
}

impl ArtifactPaths {
    pub fn for_target(target: PathBuf) -> Self {
        Self {
            lock: with_suffix(&target, ".lock"),
            download: with_suffix(&target, ".download"),
            target,
        }
    }

    /// `<target>.checksum`: the digest a verified download was checked
    /// against, kept for later re-verification.
    pub fn checksum_record(&self) -> PathBuf {
        with_suffix(&self.target, ".checksum")
    }
}

/// Resolve the paths for `artifact` under `root`.
pub fn resolve(root: &CacheRoot, artifact: &Artifact) -> CacheResult<ArtifactPaths> {
    artifact.validate()?;
    Ok(ArtifactPaths::for_target(target_path(root, artifact)))
}

fn target_path(root: &CacheRoot, artifact: &Artifact) -> PathBuf {
    match artifact {
        Artifact::BootImage(b) => root.iso_dir().join(b.file_name()),
        Artifact::Preload(p) => root.preload_dir().join(p.tarball_name()),
        Artifact::Binary(b) => root
            .cache_dir()
            .join(&b.os)
            .join(&b.arch)
            .join(&b.version)
            .join(&b.name),
        Artifact::Driver(d) => root
            .cache_dir()
            .join("driver")
            .join(&d.arch)
            .join(&d.version)
            .join(&d.name),
        Artifact::ContainerImage(i) => root
            .kic_dir()
            .join(format!("{}.tar", sanitize_file_name(&i.reference.short_name()))),
        Artifact::Licenses(l) => root
            .cache_dir()
            .join("licenses")
            .join(&l.version)
            .join("licenses.tar.gz"),
    }
}

/// Replace characters that would create directories (or are illegal on
/// the host) so an image reference maps to a single file name.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            ':' if cfg!(windows) => '_',
            c => c,
        })
        .collect()
}

/// Forward-slash rendering of a path for logs.
pub fn display_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = OsString::from(path.as_os_str());
    s.push(suffix);
    PathBuf::from(s)
}
