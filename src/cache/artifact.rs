//! Logical artifact descriptors.
//!
//! A descriptor fully determines where an artifact lives in the cache;
//! nothing else (clock, environment) feeds into path resolution once it
//! has been built.

use super::image::ImageRef;
use crate::error::{CacheError, CacheResult};
use std::fmt;

/// Architecture name of the running host in release-artifact terms.
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "arm" => "arm",
        "powerpc64" => "ppc64le",
        "s390x" => "s390x",
        other => other,
    }
}

/// OS name of the running host in release-artifact terms.
pub fn host_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// A bootable VM image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BootImage {
    pub version: String,
    pub arch: String,
    /// Explicit source URLs; empty means the built-in mirror list.
    pub urls: Vec<String>,
}

impl BootImage {
    pub fn new(version: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            arch: arch.into(),
            urls: Vec::new(),
        }
    }

    pub fn with_urls(mut self, urls: Vec<String>) -> Self {
        self.urls = urls;
        self
    }

    /// File name the image is published under.
    pub fn file_name(&self) -> String {
        match self.urls.first() {
            Some(url) => url_basename(url).to_string(),
            None => format!("minikube-{}-{}.iso", self.version, self.arch),
        }
    }
}

/// A tarball of pre-pulled images for one Kubernetes version and runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Preload {
    pub k8s_version: String,
    pub runtime: String,
    pub generation: String,
    pub arch: String,
}

impl Preload {
    /// Build a descriptor; `crio` is normalized to `cri-o`.
    pub fn new(
        k8s_version: impl Into<String>,
        runtime: impl Into<String>,
        generation: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        let runtime = runtime.into();
        let runtime = if runtime == "crio" {
            "cri-o".to_string()
        } else {
            runtime
        };
        Self {
            k8s_version: k8s_version.into(),
            runtime,
            generation: generation.into(),
            arch: arch.into(),
        }
    }

    pub fn storage_driver(&self) -> &'static str {
        if self.runtime == "cri-o" {
            "overlay"
        } else {
            "overlay2"
        }
    }

    pub fn tarball_name(&self) -> String {
        format!(
            "preloaded-images-k8s-{}-{}-{}-{}-{}.tar.lz4",
            self.generation,
            self.k8s_version,
            self.runtime,
            self.storage_driver(),
            self.arch
        )
    }
}

/// A versioned release binary such as kubectl or kubelet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binary {
    pub name: String,
    pub version: String,
    pub os: String,
    pub arch: String,
}

impl Binary {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        os: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// Whether the binary runs on this host as-is.
    pub fn is_host_native(&self) -> bool {
        self.os == host_os() && self.arch == host_arch()
    }
}

/// A VM driver plugin binary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Driver {
    pub name: String,
    pub version: String,
    pub arch: String,
}

impl Driver {
    pub fn new(name: impl Into<String>, version: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            arch: arch.into(),
        }
    }
}

/// A container image saved as a tarball.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerImage {
    pub reference: ImageRef,
    pub arch: String,
}

impl ContainerImage {
    pub fn parse(reference: &str, arch: impl Into<String>) -> CacheResult<Self> {
        Ok(Self {
            reference: ImageRef::parse(reference)?,
            arch: arch.into(),
        })
    }
}

/// The third-party license bundle for a release.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Licenses {
    pub version: String,
}

/// Any cacheable artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Artifact {
    BootImage(BootImage),
    Preload(Preload),
    Binary(Binary),
    Driver(Driver),
    ContainerImage(ContainerImage),
    Licenses(Licenses),
}

impl Artifact {
    /// Short kind label used in logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BootImage(_) => "iso",
            Self::Preload(_) => "preload",
            Self::Binary(_) => "binary",
            Self::Driver(_) => "driver",
            Self::ContainerImage(_) => "image",
            Self::Licenses(_) => "licenses",
        }
    }

    /// Human-readable identity, used as the progress key.
    pub fn key(&self) -> String {
        match self {
            Self::BootImage(b) => b.file_name(),
            Self::Preload(p) => p.tarball_name(),
            Self::Binary(b) => format!("{} {} {}/{}", b.name, b.version, b.os, b.arch),
            Self::Driver(d) => format!("{} {} {}", d.name, d.version, d.arch),
            Self::ContainerImage(i) => i.reference.to_string(),
            Self::Licenses(l) => format!("licenses {}", l.version),
        }
    }

    /// Reject descriptors that would produce empty or escaping path components.
    pub fn validate(&self) -> CacheResult<()> {
        match self {
            Self::BootImage(b) => {
                if b.urls.is_empty() {
                    component("iso version", &b.version)?;
                    component("iso arch", &b.arch)?;
                }
                component("iso file name", &b.file_name())
            }
            Self::Preload(p) => {
                component("kubernetes version", &p.k8s_version)?;
                component("container runtime", &p.runtime)?;
                component("preload generation", &p.generation)?;
                component("preload arch", &p.arch)
            }
            Self::Binary(b) => {
                component("binary name", &b.name)?;
                component("binary version", &b.version)?;
                component("binary os", &b.os)?;
                component("binary arch", &b.arch)
            }
            Self::Driver(d) => {
                component("driver name", &d.name)?;
                component("driver version", &d.version)?;
                component("driver arch", &d.arch)
            }
            Self::ContainerImage(i) => component("image arch", &i.arch),
            Self::Licenses(l) => component("licenses version", &l.version),
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.key())
    }
}

fn component(what: &str, value: &str) -> CacheResult<()> {
    if value.trim().is_empty() {
        return Err(CacheError::InvalidDescriptor(format!("{what} is empty")));
    }
    if value.contains('/') || value.contains('\\') || value == "." || value == ".." {
        return Err(CacheError::InvalidDescriptor(format!(
            "{what} {value:?} is not a plain path component"
        )));
    }
    Ok(())
}

/// Last path segment of a URL, ignoring query and fragment.
pub(crate) fn url_basename(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let path = &url[..end];
    path.rsplit('/').next().unwrap_or(path)
}
