//! Preload source choice and the per-process existence memo.

use crate::download::HttpClient;
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Where a preload was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreloadSource {
    Gcs,
    Github,
}

impl fmt::Display for PreloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gcs => "gcs",
            Self::Github => "github",
        })
    }
}

/// Which sources to consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreloadMode {
    /// Object store first, release host second.
    #[default]
    Auto,
    Gcs,
    Github,
}

impl PreloadMode {
    /// Sources to try, in order.
    pub fn order(self) -> &'static [PreloadSource] {
        match self {
            Self::Auto => &[PreloadSource::Gcs, PreloadSource::Github],
            Self::Gcs => &[PreloadSource::Gcs],
            Self::Github => &[PreloadSource::Github],
        }
    }
}

impl std::str::FromStr for PreloadMode {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "gcs" => Ok(Self::Gcs),
            "github" => Ok(Self::Github),
            other => Err(CacheError::InvalidDescriptor(format!(
                "unknown preload source {other:?}"
            ))),
        }
    }
}

/// Memoized answer for one (Kubernetes version, runtime).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreloadState {
    pub exists: bool,
    /// `None` when the answer came from the local cache or nothing was found.
    pub source: Option<PreloadSource>,
}

/// Process-wide `(k8sVersion, runtime) -> state` table. Never cleared.
#[derive(Debug, Default)]
pub struct PreloadExistenceCache {
    states: Mutex<HashMap<(String, String), PreloadState>>,
}

impl PreloadExistenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, k8s_version: &str, runtime: &str) -> Option<PreloadState> {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states
            .get(&(k8s_version.to_string(), runtime.to_string()))
            .copied()
    }

    pub fn set(&self, k8s_version: &str, runtime: &str, state: PreloadState) {
        debug!(
            "Preload state for {} {}: exists={} source={:?}",
            k8s_version, runtime, state.exists, state.source
        );
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.insert((k8s_version.to_string(), runtime.to_string()), state);
    }
}

/// Answers whether a remote preload URL exists.
#[async_trait]
pub trait PreloadIndex: Send + Sync {
    async fn exists(&self, url: &str, cancel: &CancellationToken) -> CacheResult<bool>;
}

/// HEAD-based index.
#[derive(Debug, Clone)]
pub struct HttpPreloadIndex {
    client: HttpClient,
}

impl HttpPreloadIndex {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PreloadIndex for HttpPreloadIndex {
    async fn exists(&self, url: &str, cancel: &CancellationToken) -> CacheResult<bool> {
        let info = self.client.head(url, cancel).await?;
        Ok(info.status == 200)
    }
}
