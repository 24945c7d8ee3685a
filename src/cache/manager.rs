//! Cache facade: one entry point per artifact kind.
//!
//! Every entry point follows the same shape: resolve paths, take the
//! artifact lock, probe for a published file, and only on a miss walk the
//! candidate sources until one succeeds. The lock is held for the whole
//! sequence, so concurrent callers for one artifact fetch it once.

use super::artifact::{Artifact, Binary, BootImage, ContainerImage, Driver, Licenses, Preload};
use super::image::{DockerCliSaver, ImageSaver};
use super::lock::{self, LOCK_TIMEOUT};
use super::paths::{self, ArtifactPaths};
use super::probe::{self, default_probe, ProbeFn};
use super::{artifact, clean};
use crate::config::schema::PreloadConfig;
use crate::config::Config;
use crate::download::{
    self, checksum, redact, remove_quietly, ChecksumDirective, DownloadMock, Fetcher, HttpClient,
};
use crate::env;
use crate::error::{CacheError, CacheResult, SourceFailure};
use crate::localpath::CacheRoot;
use crate::progress::{default_tracker, ProgressTracker};
use crate::source::preload::{HttpPreloadIndex, PreloadState};
use crate::source::{
    ChecksumFetcher, HttpChecksumFetcher, Origin, PreloadExistenceCache, PreloadIndex,
    PreloadSource, SourceCandidate, SourceSelector,
};
use futures_util::future::try_join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub struct CacheManager {
    root: CacheRoot,
    lock_timeout: Duration,
    preload: PreloadConfig,
    selector: SourceSelector,
    fetcher: Fetcher,
    checksums: Arc<dyn ChecksumFetcher>,
    preload_index: Arc<dyn PreloadIndex>,
    preload_states: Arc<PreloadExistenceCache>,
    probe: ProbeFn,
    tracker: Arc<dyn ProgressTracker>,
    image_saver: Arc<dyn ImageSaver>,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("root", &self.root)
            .field("lock_timeout", &self.lock_timeout)
            .field("fetcher", &self.fetcher)
            .finish_non_exhaustive()
    }
}

impl CacheManager {
    /// Build a manager with an HTTP client configured from `config` and
    /// bearer tokens from the environment.
    pub fn new(root: CacheRoot, config: &Config) -> Self {
        Self::with_client(root, config, client_from_env(config))
    }

    /// Build a manager around an existing client.
    pub fn with_client(root: CacheRoot, config: &Config, client: HttpClient) -> Self {
        Self {
            root,
            lock_timeout: config.cache.lock_timeout(),
            preload: config.preload.clone(),
            selector: SourceSelector::new(config.sources.clone(), config.preload.clone()),
            fetcher: Fetcher::new(client.clone(), config.cache.probe_ranges),
            checksums: Arc::new(HttpChecksumFetcher::new(client.clone())),
            preload_index: Arc::new(HttpPreloadIndex::new(client)),
            preload_states: Arc::new(PreloadExistenceCache::new()),
            probe: default_probe(),
            tracker: default_tracker("Downloading artifacts"),
            image_saver: Arc::new(DockerCliSaver::default()),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Fetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Replace the transport with a mock.
    pub fn with_download_mock(mut self, mock: DownloadMock) -> Self {
        self.fetcher = self.fetcher.with_mock(mock);
        self
    }

    pub fn with_probe(mut self, probe: ProbeFn) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_checksum_fetcher(mut self, checksums: Arc<dyn ChecksumFetcher>) -> Self {
        self.checksums = checksums;
        self
    }

    pub fn with_preload_index(mut self, index: Arc<dyn PreloadIndex>) -> Self {
        self.preload_index = index;
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn ProgressTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_image_saver(mut self, saver: Arc<dyn ImageSaver>) -> Self {
        self.image_saver = saver;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn root(&self) -> &CacheRoot {
        &self.root
    }

    /// Paths an artifact resolves to, without fetching anything.
    pub fn resolve(&self, artifact: &Artifact) -> CacheResult<ArtifactPaths> {
        paths::resolve(&self.root, artifact)
    }

    /// Memoized preload answer for `(k8s_version, runtime)`.
    pub fn preload_state(&self, k8s_version: &str, runtime: &str) -> Option<PreloadState> {
        self.preload_states.get(k8s_version, runtime)
    }

    /// Cache a boot image.
    pub async fn iso(&self, iso: &BootImage, cancel: &CancellationToken) -> CacheResult<PathBuf> {
        self.materialize(&Artifact::BootImage(iso.clone()), cancel)
            .await
    }

    /// Cache a release binary, marking it executable when it runs on this host.
    pub async fn binary(&self, bin: &Binary, cancel: &CancellationToken) -> CacheResult<PathBuf> {
        self.materialize(&Artifact::Binary(bin.clone()), cancel)
            .await
    }

    /// Cache several binaries concurrently, failing on the first error.
    pub async fn binaries(
        &self,
        bins: &[Binary],
        cancel: &CancellationToken,
    ) -> CacheResult<Vec<PathBuf>> {
        try_join_all(bins.iter().map(|b| self.binary(b, cancel))).await
    }

    /// Cache a driver binary.
    pub async fn driver(&self, driver: &Driver, cancel: &CancellationToken) -> CacheResult<PathBuf> {
        self.materialize(&Artifact::Driver(driver.clone()), cancel)
            .await
    }

    /// Cache the license bundle for a release.
    pub async fn licenses(
        &self,
        licenses: &Licenses,
        cancel: &CancellationToken,
    ) -> CacheResult<PathBuf> {
        self.materialize(&Artifact::Licenses(licenses.clone()), cancel)
            .await
    }

    /// Cache a preloaded tarball. `None` when no preload exists for it.
    /// `force` checks the sources even when preload is disabled.
    pub async fn preload(
        &self,
        preload: &Preload,
        force: bool,
        cancel: &CancellationToken,
    ) -> CacheResult<Option<PathBuf>> {
        if !self.preload_exists(preload, force, cancel).await {
            info!(
                "No preload available for {} {}",
                preload.k8s_version, preload.runtime
            );
            return Ok(None);
        }
        self.materialize(&Artifact::Preload(preload.clone()), cancel)
            .await
            .map(Some)
    }

    /// Whether a preload exists locally or remotely. Answers are memoized
    /// per `(k8s_version, runtime)` for the life of the manager.
    pub async fn preload_exists(
        &self,
        preload: &Preload,
        force: bool,
        cancel: &CancellationToken,
    ) -> bool {
        if !self.preload.enabled && !force {
            debug!("Preload disabled");
            return false;
        }
        if let Some(state) = self.preload_states.get(&preload.k8s_version, &preload.runtime) {
            return state.exists;
        }

        let local = self
            .resolve(&Artifact::Preload(preload.clone()))
            .ok()
            .and_then(|p| (self.probe)(&p.target));
        if local.is_some() {
            self.remember(preload, true, None);
            return true;
        }

        for source in self.selector.preload_mode().order() {
            let url = self.selector.preload(preload, *source).url;
            match self.preload_index.exists(&url, cancel).await {
                Ok(true) => {
                    debug!("Preload found at {} ({})", url, source);
                    self.remember(preload, true, Some(*source));
                    return true;
                }
                Ok(false) => debug!("Preload not at {}", url),
                Err(e) => warn!("Checking preload at {} failed: {}", url, e),
            }
        }
        self.remember(preload, false, None);
        false
    }

    fn remember(&self, preload: &Preload, exists: bool, source: Option<PreloadSource>) {
        self.preload_states.set(
            &preload.k8s_version,
            &preload.runtime,
            PreloadState { exists, source },
        );
    }

    /// Re-check a cached preload against the checksum recorded when it was
    /// downloaded. A mismatching tarball is removed along with its record,
    /// so the next [`Self::preload`] fetches it again.
    pub async fn verify_preload(
        &self,
        preload: &Preload,
        cancel: &CancellationToken,
    ) -> CacheResult<PathBuf> {
        let paths = self.resolve(&Artifact::Preload(preload.clone()))?;
        let mut held = lock::acquire(&paths.lock, self.lock_timeout, cancel).await?;
        let result = verify_recorded(&paths).await;
        held.release();
        result.map(|()| paths.target)
    }

    /// Save a container image as a tarball in the image cache.
    #[instrument(level = "info", skip_all, fields(image = %image.reference))]
    pub async fn image(
        &self,
        image: &ContainerImage,
        cancel: &CancellationToken,
    ) -> CacheResult<PathBuf> {
        let artifact = Artifact::ContainerImage(image.clone());
        let paths = self.resolve(&artifact)?;
        let mut held = lock::acquire(&paths.lock, self.lock_timeout, cancel).await?;
        let result = self.save_image(image, &paths, cancel).await;
        held.release();
        result
    }

    async fn save_image(
        &self,
        image: &ContainerImage,
        paths: &ArtifactPaths,
        cancel: &CancellationToken,
    ) -> CacheResult<PathBuf> {
        if let Some(hit) = (self.probe)(&paths.target) {
            debug!("Cache hit: {} ({} bytes)", hit.path.display(), hit.size);
            return Ok(paths.target.clone());
        }
        let staging = temp_sibling(&paths.target)?;
        let saved = self
            .image_saver
            .save(&image.reference, &image.arch, &staging, cancel)
            .await;
        if let Err(e) = saved {
            remove_quietly(&staging);
            return Err(e);
        }
        publish(&staging, &paths.target).await?;
        info!("Cached image {}", paths.target.display());
        Ok(paths.target.clone())
    }

    /// Purge preloads from generations other than the configured one.
    pub async fn clean_old_generations(&self) -> usize {
        clean::clean_old_generations(&self.root.preload_dir(), &self.preload.generation).await
    }

    /// Start-up purge, skipped in child processes.
    pub async fn startup_cleanup(&self) -> usize {
        if env::is_child_process() {
            debug!("Child process, skipping preload cleanup");
            return 0;
        }
        self.clean_old_generations().await
    }

    #[instrument(level = "info", skip_all, fields(artifact = %artifact))]
    async fn materialize(
        &self,
        artifact: &Artifact,
        cancel: &CancellationToken,
    ) -> CacheResult<PathBuf> {
        let paths = self.resolve(artifact)?;
        let mut held = lock::acquire(&paths.lock, self.lock_timeout, cancel).await?;
        let result = self.fill(artifact, &paths, cancel).await;
        held.release();
        result
    }

    /// Body of [`Self::materialize`], run with the artifact lock held.
    async fn fill(
        &self,
        artifact: &Artifact,
        paths: &ArtifactPaths,
        cancel: &CancellationToken,
    ) -> CacheResult<PathBuf> {
        if let Some(hit) = (self.probe)(&paths.target) {
            debug!("Cache hit: {} ({} bytes)", hit.path.display(), hit.size);
            return Ok(paths.target.clone());
        }
        debug!("Cache miss: {}", paths::display_slash(&paths.target));

        let candidates = self.candidates(artifact);
        let (winner, digest) = self
            .fetch_first(artifact, &candidates, &paths.target, cancel)
            .await?;

        if let Artifact::Preload(p) = artifact {
            let source = match winner.origin {
                Origin::ReleaseHost => Some(PreloadSource::Github),
                _ => Some(PreloadSource::Gcs),
            };
            self.remember(p, true, source);
            record_checksum(paths, digest.as_ref()).await?;
        }
        post_process(artifact, &paths.target).await?;
        Ok(paths.target.clone())
    }

    fn candidates(&self, artifact: &Artifact) -> Vec<SourceCandidate> {
        match artifact {
            Artifact::BootImage(b) => self.selector.boot_image(b),
            Artifact::Binary(b) => self.selector.binary(b),
            Artifact::Driver(d) => self.selector.driver(d),
            Artifact::Licenses(l) => self.selector.licenses(l),
            Artifact::Preload(p) => {
                let chosen = self
                    .preload_states
                    .get(&p.k8s_version, &p.runtime)
                    .and_then(|s| s.source);
                match chosen {
                    Some(source) => vec![self.selector.preload(p, source)],
                    None => self
                        .selector
                        .preload_candidates(p)
                        .into_iter()
                        .map(|(_, c)| c)
                        .collect(),
                }
            }
            Artifact::ContainerImage(_) => Vec::new(),
        }
    }

    /// Try each candidate in order. Transient and not-found failures move on
    /// to the next one; anything else is returned immediately. Returns the
    /// winning candidate and the digest its download was verified against.
    async fn fetch_first<'a>(
        &self,
        artifact: &Artifact,
        candidates: &'a [SourceCandidate],
        target: &Path,
        cancel: &CancellationToken,
    ) -> CacheResult<(&'a SourceCandidate, Option<ChecksumDirective>)> {
        let key = artifact.key();
        let mut failures = Vec::new();

        for candidate in candidates {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }
            let digest = match self.checksums.fetch(candidate, cancel).await {
                Ok(d) => d,
                Err(CacheError::Cancelled) => return Err(CacheError::Cancelled),
                Err(e) => {
                    warn!(
                        "Checksum unavailable for {}, downloading unverified: {}",
                        candidate.url, e
                    );
                    None
                }
            };

            let result = match &digest {
                Some(d) => {
                    let url = checksum::fold_into(&candidate.url, d);
                    self.fetcher
                        .fetch(&url, target, &key, self.tracker.clone(), cancel)
                        .await
                }
                None => self.fetch_unverified(candidate, target, &key, cancel).await,
            };

            match result {
                Ok(()) => {
                    info!(
                        "Cached {} from {} ({})",
                        key,
                        redact(&candidate.url),
                        candidate.origin
                    );
                    return Ok((candidate, digest));
                }
                Err(e) if e.is_failover() => {
                    warn!("Source {} failed: {}", redact(&candidate.url), e);
                    failures.push(SourceFailure {
                        url: candidate.url.clone(),
                        error: e,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Err(CacheError::NoSourceAvailable {
            artifact: key,
            failures,
        })
    }

    /// Download into a fresh sibling so an unverified partial never sits
    /// in the resumable `.download` slot, then publish by rename.
    async fn fetch_unverified(
        &self,
        candidate: &SourceCandidate,
        target: &Path,
        key: &str,
        cancel: &CancellationToken,
    ) -> CacheResult<()> {
        if let Some(parent) = target.parent() {
            download::create_dir_all(parent).await?;
        }
        let staging = temp_sibling(target)?;
        let result = self
            .fetcher
            .fetch(&candidate.url, &staging, key, self.tracker.clone(), cancel)
            .await;
        match result {
            Ok(()) => publish(&staging, target).await,
            Err(e) => {
                remove_quietly(&staging);
                remove_quietly(&download::download_path(&staging));
                Err(e)
            }
        }
    }
}

/// Client with probe timeout from config and bearer tokens from the environment.
pub fn client_from_env(config: &Config) -> HttpClient {
    let mut client = HttpClient::new(config.cache.head_timeout());
    if let Some(token) = env::non_empty(env::GOOGLE_OAUTH_ACCESS_TOKEN) {
        for base in [
            &config.sources.object_store_url,
            &config.sources.object_store_api_url,
        ] {
            if let Some(host) = host_of(base) {
                client = client.with_bearer(host, token.clone());
            }
        }
    }
    if let Some(token) = env::non_empty(env::GITHUB_TOKEN) {
        if let Some(host) = host_of(&config.sources.release_api_url) {
            client = client.with_bearer(host, token);
        }
    }
    client
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(str::to_string)
}

/// Reserve a uniquely named file next to `target`.
fn temp_sibling(target: &Path) -> CacheResult<PathBuf> {
    let dir = target
        .parent()
        .ok_or_else(|| CacheError::Internal(format!("{} has no parent", target.display())))?;
    std::fs::create_dir_all(dir)
        .map_err(|e| CacheError::io(format!("creating {}", dir.display()), e))?;
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file = tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| CacheError::io(format!("creating temp file in {}", dir.display()), e))?;
    file.into_temp_path()
        .keep()
        .map_err(|e| CacheError::io("keeping temp file", e.error))
}

async fn publish(staging: &Path, target: &Path) -> CacheResult<()> {
    tokio::fs::rename(staging, target).await.map_err(|e| {
        CacheError::io(
            format!("renaming {} to {}", staging.display(), target.display()),
            e,
        )
    })
}

/// Write the digest a preload was verified against next to it. An
/// unverified download leaves no record, and a stale one is removed.
async fn record_checksum(
    paths: &ArtifactPaths,
    digest: Option<&ChecksumDirective>,
) -> CacheResult<()> {
    let record = paths.checksum_record();
    match digest {
        Some(d) => {
            tokio::fs::write(&record, d.to_string())
                .await
                .map_err(|e| CacheError::io(format!("writing {}", record.display()), e))?;
            debug!("Recorded checksum {} in {}", d, record.display());
        }
        None => remove_quietly(&record),
    }
    Ok(())
}

async fn verify_recorded(paths: &ArtifactPaths) -> CacheResult<()> {
    if probe::stat(&paths.target).is_none() {
        return Err(CacheError::NotFound(paths.target.display().to_string()));
    }
    let record = paths.checksum_record();
    let text = match tokio::fs::read_to_string(&record).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CacheError::NotFound(format!(
                "checksum record {}",
                record.display()
            )))
        }
        Err(e) => return Err(CacheError::io(format!("reading {}", record.display()), e)),
    };
    let directive: ChecksumDirective = text.trim().parse()?;

    let target = paths.target.clone();
    let check = directive.clone();
    let result = tokio::task::spawn_blocking(move || checksum::verify_file(&target, &check))
        .await
        .map_err(|e| CacheError::Internal(format!("checksum task failed: {e}")))?;
    match result {
        Ok(()) => {
            debug!("{} matches {}", paths.target.display(), directive);
            Ok(())
        }
        Err(e) => {
            if matches!(e, CacheError::ChecksumMismatch { .. }) {
                warn!("Removing corrupt preload {}", paths.target.display());
                remove_quietly(&paths.target);
                remove_quietly(&record);
            }
            Err(e)
        }
    }
}

async fn post_process(artifact: &Artifact, target: &Path) -> CacheResult<()> {
    let executable = match artifact {
        Artifact::Binary(b) => b.is_host_native(),
        Artifact::Driver(d) => d.arch == artifact::host_arch(),
        _ => false,
    };
    if executable {
        make_executable(target).await?;
    }
    Ok(())
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> CacheResult<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(|e| CacheError::io(format!("chmod {}", path.display()), e))?;
    debug!("Marked {} executable", path.display());
    Ok(())
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> CacheResult<()> {
    Ok(())
}
