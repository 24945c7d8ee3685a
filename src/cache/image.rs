//! Container image references and tarball writers.

use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Registry host rewritten on parse.
const LEGACY_REGISTRY: &str = "k8s.gcr.io";
const DEFAULT_REGISTRY: &str = "registry.k8s.io";

/// A parsed image reference: `[registry/]repository[:tag][@digest]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    pub registry: Option<String>,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageRef {
    /// Parse `name`, `name:tag`, `name@digest` or `name:tag@digest`.
    pub fn parse(reference: &str) -> CacheResult<Self> {
        let invalid = |reason: &str| {
            CacheError::InvalidDescriptor(format!("image reference {reference:?}: {reason}"))
        };
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(invalid("empty"));
        }

        let (name_tag, digest) = match reference.split_once('@') {
            Some((n, d)) => {
                if !d.contains(':') || d.starts_with(':') || d.ends_with(':') {
                    return Err(invalid("digest must be <algorithm>:<hex>"));
                }
                (n, Some(d.to_string()))
            }
            None => (reference, None),
        };

        // A colon after the last slash separates the tag; one before it is a registry port.
        let last_slash = name_tag.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match name_tag[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&name_tag[..split], Some(name_tag[split + 1..].to_string()))
            }
            None => (name_tag, None),
        };
        if tag.as_deref() == Some("") {
            return Err(invalid("empty tag"));
        }

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_string()), rest.to_string())
            }
            _ => (None, name.to_string()),
        };
        if repository.is_empty() || repository.split('/').any(str::is_empty) {
            return Err(invalid("empty repository component"));
        }

        let registry = registry.map(|r| {
            if r == LEGACY_REGISTRY {
                DEFAULT_REGISTRY.to_string()
            } else {
                r
            }
        });

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Repository including registry, without tag or digest.
    pub fn name(&self) -> String {
        match &self.registry {
            Some(r) => format!("{r}/{}", self.repository),
            None => self.repository.clone(),
        }
    }

    /// Final repository component.
    pub fn basename(&self) -> &str {
        self.repository
            .rsplit('/')
            .next()
            .unwrap_or(&self.repository)
    }

    /// `<basename>:<tag>` (or `@<digest>` for digest-only references).
    pub fn short_name(&self) -> String {
        match (&self.tag, &self.digest) {
            (Some(tag), _) => format!("{}:{tag}", self.basename()),
            (None, Some(digest)) => format!("{}@{digest}", self.basename()),
            (None, None) => format!("{}:latest", self.basename()),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

/// Writes an image to a tarball on disk.
#[async_trait]
pub trait ImageSaver: Send + Sync {
    /// Save `image` for `linux/<arch>` into `dest`.
    async fn save(
        &self,
        image: &ImageRef,
        arch: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> CacheResult<()>;
}

/// Saves images by shelling out to a docker-compatible CLI.
#[derive(Debug, Clone)]
pub struct DockerCliSaver {
    program: String,
}

impl Default for DockerCliSaver {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCliSaver {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn exec(
        &self,
        image: &ImageRef,
        args: &[&str],
        cancel: &CancellationToken,
    ) -> CacheResult<()> {
        debug!("Executing: {} {:?}", self.program, args);
        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::select! {
            out = child => out.map_err(|e| {
                CacheError::command_failed(format!("{} {:?}", self.program, args), e)
            })?,
            _ = cancel.cancelled() => return Err(CacheError::Cancelled),
        };

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(classify_failure(&image.to_string(), stderr.trim()))
        }
    }
}

#[async_trait]
impl ImageSaver for DockerCliSaver {
    async fn save(
        &self,
        image: &ImageRef,
        arch: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> CacheResult<()> {
        let reference = image.to_string();
        let platform = format!("linux/{arch}");
        info!("Pulling image: {}", reference);
        self.exec(image, &["pull", "--platform", &platform, &reference], cancel)
            .await?;

        let dest = dest.to_string_lossy();
        info!("Saving image {} to {}", reference, dest);
        self.exec(image, &["save", "-o", &dest, &reference], cancel)
            .await
    }
}

/// Map a writer failure to an error, singling out registry auth problems.
pub fn classify_failure(image: &str, stderr: &str) -> CacheError {
    let lower = stderr.to_ascii_lowercase();
    let auth = [
        "requires login",
        "unauthorized",
        "authentication required",
        "denied",
    ]
    .iter()
    .any(|needle| lower.contains(needle));

    if auth {
        CacheError::AuthRequired {
            target: image.to_string(),
            reason: stderr.to_string(),
        }
    } else {
        CacheError::ImageSave {
            image: image.to_string(),
            reason: stderr.to_string(),
        }
    }
}
