//! Transport engine.
//!
//! `Fetcher::fetch` moves one source URL to one destination path: it
//! dispatches on the URL scheme to a [`Getter`], which fills the
//! `.download` sibling of the destination and verifies it, then renames
//! that sibling into place.

pub mod checksum;
pub mod client;
mod file;
mod http;

pub use checksum::{Algorithm, ChecksumDirective};
pub use client::{HeadInfo, HttpClient};
pub use file::FileGetter;
pub use http::HttpGetter;

use crate::error::{CacheError, CacheResult};
use crate::progress::ProgressTracker;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Test hook replacing the whole transport: `(source, dest)`.
pub type DownloadMock =
    Arc<dyn Fn(String, PathBuf) -> BoxFuture<'static, CacheResult<()>> + Send + Sync>;

/// Everything a getter needs for one transfer.
#[derive(Clone)]
pub struct Transfer {
    /// Label for progress reporting.
    pub key: String,
    pub url: Url,
    /// Partial file the getter writes and leaves verified.
    pub temp: PathBuf,
    pub checksum: Option<ChecksumDirective>,
    pub tracker: Arc<dyn ProgressTracker>,
    pub cancel: CancellationToken,
}

/// Fetches one URL scheme into `transfer.temp`.
#[async_trait]
pub trait Getter: Send + Sync {
    async fn get(&self, transfer: Transfer) -> CacheResult<()>;

    /// Whether this getter talks to the network.
    fn is_remote(&self) -> bool {
        true
    }
}

#[derive(Clone)]
pub struct Fetcher {
    getters: HashMap<String, Arc<dyn Getter>>,
    mock: Option<DownloadMock>,
    deny_network: bool,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut schemes: Vec<&String> = self.getters.keys().collect();
        schemes.sort();
        f.debug_struct("Fetcher")
            .field("schemes", &schemes)
            .field("mocked", &self.mock.is_some())
            .field("deny_network", &self.deny_network)
            .finish()
    }
}

impl Fetcher {
    /// Standard dispatch table: `file`, `http`, `https`.
    pub fn new(client: HttpClient, probe_ranges: bool) -> Self {
        let deny_network = client.network_denied();
        let http: Arc<dyn Getter> = Arc::new(HttpGetter::new(client, probe_ranges));
        let mut getters: HashMap<String, Arc<dyn Getter>> = HashMap::new();
        getters.insert("file".to_string(), Arc::new(FileGetter));
        getters.insert("http".to_string(), http.clone());
        getters.insert("https".to_string(), http);
        Self {
            getters,
            mock: None,
            deny_network,
        }
    }

    /// Register or replace the getter for `scheme`.
    pub fn with_getter(mut self, scheme: &str, getter: Arc<dyn Getter>) -> Self {
        self.getters.insert(scheme.to_ascii_lowercase(), getter);
        self
    }

    /// Install a mock that short-circuits every fetch.
    pub fn with_mock(mut self, mock: DownloadMock) -> Self {
        self.mock = Some(mock);
        self
    }

    pub fn is_mocked(&self) -> bool {
        self.mock.is_some()
    }

    /// Fetch `source` (with optional `?checksum=` directive) to `dest`.
    pub async fn fetch(
        &self,
        source: &str,
        dest: &Path,
        key: &str,
        tracker: Arc<dyn ProgressTracker>,
        cancel: &CancellationToken,
    ) -> CacheResult<()> {
        if let Some(parent) = dest.parent() {
            create_dir_all(parent).await?;
        }

        if let Some(mock) = &self.mock {
            debug!("Mock download {} -> {}", source, dest.display());
            return mock(source.to_string(), dest.to_path_buf()).await;
        }

        let (url, checksum) = checksum::split_source(source)?;
        let scheme = url.scheme().to_ascii_lowercase();
        let getter = self
            .getters
            .get(&scheme)
            .ok_or_else(|| CacheError::UnsupportedScheme(scheme.clone()))?;

        if self.deny_network && getter.is_remote() {
            return Err(CacheError::UnmockedDownload {
                url: source.to_string(),
            });
        }
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        let temp = download_path(dest);
        info!("Downloading {} -> {}", url, dest.display());
        getter
            .get(Transfer {
                key: key.to_string(),
                url,
                temp: temp.clone(),
                checksum,
                tracker,
                cancel: cancel.clone(),
            })
            .await?;

        tokio::fs::rename(&temp, dest).await.map_err(|e| {
            CacheError::io(
                format!("renaming {} to {}", temp.display(), dest.display()),
                e,
            )
        })?;
        debug!("Published {}", dest.display());
        Ok(())
    }
}

/// The `.download` sibling of `dest`.
pub fn download_path(dest: &Path) -> PathBuf {
    let mut s = OsString::from(dest.as_os_str());
    s.push(".download");
    PathBuf::from(s)
}

/// Create `dir` and its parents with mode 0755.
pub async fn create_dir_all(dir: &Path) -> CacheResult<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o755);
    builder
        .create(dir)
        .await
        .map_err(|e| CacheError::io(format!("creating {}", dir.display()), e))
}

/// Whether this process is a test harness binary.
///
/// Unit tests see `cfg(test)`. Integration test executables are built by
/// cargo into a `deps` directory with a metadata hash in their name.
pub fn is_test_binary() -> bool {
    if cfg!(test) {
        return true;
    }
    std::env::current_exe()
        .map(|exe| is_cargo_test_path(&exe))
        .unwrap_or(false)
}

/// `.../deps/<name>-<16 hex digits>[.exe]`
fn is_cargo_test_path(exe: &Path) -> bool {
    let in_deps = exe
        .parent()
        .and_then(|p| p.file_name())
        .is_some_and(|n| n == "deps");
    let hashed = exe
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.rsplit_once('-'))
        .is_some_and(|(name, hash)| {
            !name.is_empty() && hash.len() == 16 && hash.chars().all(|c| c.is_ascii_hexdigit())
        });
    in_deps && hashed
}

/// Strip query strings (which may carry tokens) from URLs before they are
/// logged or reported.
pub fn redact(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}

/// Remove `path`, logging anything but "already gone".
pub(crate) fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// Mock that creates `dest` containing the source string.
pub fn create_dst_download_mock() -> DownloadMock {
    Arc::new(|source: String, dest: PathBuf| -> BoxFuture<'static, CacheResult<()>> {
        Box::pin(async move {
            tokio::fs::write(&dest, source.as_bytes())
                .await
                .map_err(|e| CacheError::io(format!("writing {}", dest.display()), e))
        })
    })
}
