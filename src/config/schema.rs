//! Configuration schema for minicache
//!
//! Configuration is stored at `~/.config/minicache/config.toml`

use crate::source::preload::PreloadMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Cache behaviour
    pub cache: CacheConfig,

    /// Preloaded image tarballs
    pub preload: PreloadConfig,

    /// Upstream locations
    pub sources: SourcesConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Cache and transfer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Seconds to wait for another holder of an artifact lock
    pub lock_timeout_secs: u64,

    /// Timeout for HEAD and metadata requests
    pub head_timeout_secs: u64,

    /// Probe with HEAD before downloading so partial files can resume
    pub probe_ranges: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            lock_timeout_secs: 600,
            head_timeout_secs: 10,
            probe_ranges: true,
        }
    }
}

impl CacheConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn head_timeout(&self) -> Duration {
        Duration::from_secs(self.head_timeout_secs)
    }
}

/// Preloaded tarball settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    /// Use preloaded tarballs at all
    pub enabled: bool,

    /// Where to look: auto, gcs or github
    pub source: PreloadMode,

    /// Current tarball generation; other generations are purged
    pub generation: String,

    /// Object-store bucket holding tarballs
    pub bucket: String,

    /// Release repository holding tarballs as assets
    pub repository: String,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            source: PreloadMode::Auto,
            generation: "v18".to_string(),
            bucket: "minikube-preloaded-volume-tarballs".to_string(),
            repository: "kubernetes-sigs/minikube-preloads".to_string(),
        }
    }
}

/// Base URLs for every upstream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Object store serving ISOs, preloads and licenses
    pub object_store_url: String,

    /// Object-store metadata API
    pub object_store_api_url: String,

    /// Release host serving release assets
    pub release_host_url: String,

    /// Release host API
    pub release_api_url: String,

    /// Repository publishing ISOs and drivers
    pub release_repository: String,

    /// Object-store path holding ISOs
    pub iso_path: String,

    /// Regional ISO mirror
    pub iso_mirror_url: String,

    /// Kubernetes release binaries
    pub kubernetes_release_url: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            object_store_url: "https://storage.googleapis.com".to_string(),
            object_store_api_url: "https://storage.googleapis.com/storage/v1".to_string(),
            release_host_url: "https://github.com".to_string(),
            release_api_url: "https://api.github.com".to_string(),
            release_repository: "kubernetes/minikube".to_string(),
            iso_path: "minikube/iso".to_string(),
            iso_mirror_url: "https://kubernetes.oss-cn-hangzhou.aliyuncs.com/minikube/iso"
                .to_string(),
            kubernetes_release_url: "https://dl.k8s.io/release".to_string(),
        }
    }
}

impl SourcesConfig {
    /// Point every upstream at one base URL, e.g. a local test server.
    pub fn all_at(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            object_store_url: format!("{base}/gcs"),
            object_store_api_url: format!("{base}/gcs-api"),
            release_host_url: format!("{base}/github"),
            release_api_url: format!("{base}/github-api"),
            release_repository: "kubernetes/minikube".to_string(),
            iso_path: "minikube/iso".to_string(),
            iso_mirror_url: format!("{base}/mirror/iso"),
            kubernetes_release_url: format!("{base}/k8s/release"),
        }
    }
}
