//! End-to-end scenarios through the cache facade.

use crate::support::{config_at, manager_at, payload, sha256_hex, RangeResponder};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use minicache::cache::image::classify_failure;
use minicache::cache::{
    Artifact, Binary, CacheManager, ContainerImage, ImageRef, ImageSaver, Preload,
};
use minicache::config::Config;
use minicache::download::{Algorithm, ChecksumDirective, DownloadMock};
use minicache::error::{CacheError, CacheResult, ErrorKind};
use minicache::localpath::CacheRoot;
use minicache::progress::NoopTracker;
use minicache::source::{ChecksumFetcher, PreloadIndex, PreloadSource, SourceCandidate};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test(flavor = "multi_thread")]
async fn cold_then_warm_binary() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    let body = payload(32 * 1024);
    let url = "/k8s/release/v1.20.2/bin/linux/amd64/kubectl";
    Mock::given(path(format!("{url}.sha256")))
        .respond_with(ResponseTemplate::new(200).set_body_string(sha256_hex(&body)))
        .mount(&server)
        .await;
    Mock::given(path(url))
        .respond_with(RangeResponder::new(body.clone()))
        .mount(&server)
        .await;

    let manager = manager_at(temp.path(), &server.uri());
    let bin = Binary::new("kubectl", "v1.20.2", "linux", "amd64");
    let cancel = CancellationToken::new();

    let first = manager.binary(&bin, &cancel).await.unwrap();
    assert_eq!(
        first,
        temp.path().join(".minikube/cache/linux/amd64/v1.20.2/kubectl")
    );
    assert_eq!(std::fs::metadata(&first).unwrap().len(), body.len() as u64);
    #[cfg(unix)]
    if bin.is_host_native() {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&first).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    let traffic = server.received_requests().await.unwrap().len();
    let second = manager.binary(&bin, &cancel).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(server.received_requests().await.unwrap().len(), traffic);
}

#[tokio::test(flavor = "multi_thread")]
async fn preload_falls_back_to_release_host() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    let preload = Preload::new("v1.30.0", "docker", "v18", "amd64");
    let tarball = preload.tarball_name();
    let body = payload(16 * 1024);

    Mock::given(method("HEAD"))
        .and(path(format!(
            "/gcs/minikube-preloaded-volume-tarballs/{tarball}"
        )))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(path(format!(
        "/github/kubernetes-sigs/minikube-preloads/releases/download/v18/{tarball}"
    )))
    .respond_with(RangeResponder::new(body.clone()))
    .mount(&server)
    .await;
    Mock::given(path(
        "/github-api/repos/kubernetes-sigs/minikube-preloads/releases/tags/v18",
    ))
    .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "tag_name": "v18",
        "assets": [
            { "name": "unrelated.tar.lz4", "digest": "sha256:00" },
            { "name": tarball.clone(), "digest": format!("sha256:{}", sha256_hex(&body)) },
        ],
    })))
    .expect(1)
    .mount(&server)
    .await;

    let manager = manager_at(temp.path(), &server.uri());
    let cancel = CancellationToken::new();
    let published = manager.preload(&preload, false, &cancel).await.unwrap().unwrap();

    assert!(published.ends_with(format!("cache/preloaded-tarball/{tarball}")));
    assert_eq!(std::fs::read(&published).unwrap(), body);
    let state = manager.preload_state("v1.30.0", "docker").unwrap();
    assert!(state.exists);
    assert_eq!(state.source, Some(PreloadSource::Github));

    // Second call is served locally; the listing is not fetched again.
    manager.preload(&preload, false, &cancel).await.unwrap().unwrap();
    server.verify().await;
}

struct LoginRequired;

#[async_trait]
impl ImageSaver for LoginRequired {
    async fn save(
        &self,
        image: &ImageRef,
        _arch: &str,
        _dest: &Path,
        _cancel: &CancellationToken,
    ) -> CacheResult<()> {
        Err(classify_failure(
            &image.to_string(),
            "Error response from daemon: pull access denied, repository requires login",
        ))
    }
}

#[tokio::test]
async fn image_auth_failure_surfaces() {
    let temp = TempDir::new().unwrap();
    let manager = CacheManager::new(CacheRoot::new(temp.path()).unwrap(), &Config::default())
        .with_image_saver(Arc::new(LoginRequired));
    let image =
        ContainerImage::parse("registry.example/org/name:1.2@sha256:deadbeef", "amd64").unwrap();

    let paths = manager
        .resolve(&minicache::cache::Artifact::ContainerImage(image.clone()))
        .unwrap();
    assert!(paths.target.ends_with("kic/name:1.2.tar"));

    let err = manager
        .image(&image, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthRequired);
    assert_eq!(err.exit_code(), 63);
    assert!(!paths.target.exists());
    let leftovers: Vec<_> = std::fs::read_dir(paths.target.parent().unwrap())
        .unwrap()
        .flatten()
        .filter(|e| e.path().extension().is_some_and(|x| x == "tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn docker_cli_login_error_maps_to_auth() {
    use minicache::cache::DockerCliSaver;
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    let script = temp.path().join("fake-docker");
    std::fs::write(
        &script,
        "#!/bin/sh\necho 'unauthorized: authentication required' >&2\nexit 1\n",
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let manager = CacheManager::new(CacheRoot::new(temp.path()).unwrap(), &Config::default())
        .with_image_saver(Arc::new(DockerCliSaver::new(script.to_string_lossy())));
    let image = ContainerImage::parse("gcr.io/private/app:1.0", "arm64").unwrap();
    let err = manager
        .image(&image, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthRequired);
}

#[cfg(unix)]
#[tokio::test]
async fn docker_cli_saves_image() {
    use minicache::cache::DockerCliSaver;
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    let script = temp.path().join("fake-docker");
    // `save -o <dest> <ref>` writes the reference into dest.
    std::fs::write(
        &script,
        "#!/bin/sh\nif [ \"$1\" = save ]; then printf '%s' \"$4\" > \"$3\"; fi\nexit 0\n",
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let manager = CacheManager::new(CacheRoot::new(temp.path()).unwrap(), &Config::default())
        .with_image_saver(Arc::new(DockerCliSaver::new(script.to_string_lossy())));
    let image = ContainerImage::parse("k8s.gcr.io/pause:3.9", "amd64").unwrap();
    let published = manager
        .image(&image, &CancellationToken::new())
        .await
        .unwrap();
    assert!(published.ends_with("kic/pause:3.9.tar"));
    assert_eq!(
        std::fs::read_to_string(published).unwrap(),
        "registry.k8s.io/pause:3.9"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_binary_guard_opens_no_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let temp = TempDir::new().unwrap();
    let config = crate::support::config_at(&base);
    let manager = CacheManager::new(CacheRoot::new(temp.path()).unwrap(), &config);
    let err = manager
        .binary(
            &Binary::new("kubelet", "v1.30.0", "linux", "amd64"),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnmockedDownload);
    assert_eq!(err.exit_code(), 66);
    assert_eq!(
        listener.accept().map_err(|e| e.kind()).err(),
        Some(std::io::ErrorKind::WouldBlock)
    );
}

/// Index that reports every preload as published.
struct Everywhere;

#[async_trait]
impl PreloadIndex for Everywhere {
    async fn exists(&self, _url: &str, _cancel: &CancellationToken) -> CacheResult<bool> {
        Ok(true)
    }
}

/// Checksum source answering with one fixed digest, or none.
struct FixedDigest(Option<ChecksumDirective>);

#[async_trait]
impl ChecksumFetcher for FixedDigest {
    async fn fetch(
        &self,
        _candidate: &SourceCandidate,
        _cancel: &CancellationToken,
    ) -> CacheResult<Option<ChecksumDirective>> {
        Ok(self.0.clone())
    }
}

fn counting_mock(downloads: Arc<AtomicUsize>, delay: Duration) -> DownloadMock {
    Arc::new(move |source: String, dest: PathBuf| -> BoxFuture<'static, CacheResult<()>> {
        let downloads = downloads.clone();
        Box::pin(async move {
            downloads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            tokio::fs::write(&dest, source.as_bytes())
                .await
                .map_err(|e| CacheError::io("mock write", e))
        })
    })
}

fn mocked_preloads(home: &Path, downloads: Arc<AtomicUsize>, delay: Duration) -> CacheManager {
    CacheManager::new(CacheRoot::new(home).unwrap(), &Config::default())
        .with_tracker(Arc::new(NoopTracker))
        .with_preload_index(Arc::new(Everywhere))
        .with_checksum_fetcher(Arc::new(FixedDigest(None)))
        .with_download_mock(counting_mock(downloads, delay))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_preloads_download_once() {
    let temp = TempDir::new().unwrap();
    let downloads = Arc::new(AtomicUsize::new(0));
    let manager = mocked_preloads(temp.path(), downloads.clone(), Duration::from_secs(1));
    let preload = Preload::new("v1.30.0", "docker", "v18", "amd64");
    let cancel = CancellationToken::new();

    let results = futures_util::future::join_all(
        (0..4).map(|_| manager.preload(&preload, false, &cancel)),
    )
    .await;

    let expected = manager
        .resolve(&Artifact::Preload(preload.clone()))
        .unwrap()
        .target;
    for result in results {
        assert_eq!(result.unwrap(), Some(expected.clone()));
    }
    assert_eq!(downloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn zero_byte_preload_is_fetched_again_once() {
    let temp = TempDir::new().unwrap();
    let downloads = Arc::new(AtomicUsize::new(0));
    let manager = mocked_preloads(temp.path(), downloads.clone(), Duration::ZERO);
    let preload = Preload::new("v1.30.0", "docker", "v18", "amd64");
    let paths = manager
        .resolve(&Artifact::Preload(preload.clone()))
        .unwrap();
    std::fs::create_dir_all(paths.target.parent().unwrap()).unwrap();
    std::fs::write(&paths.target, b"").unwrap();

    let cancel = CancellationToken::new();
    let first = manager.preload(&preload, false, &cancel).await.unwrap().unwrap();
    assert!(std::fs::metadata(&first).unwrap().len() > 0);
    manager.preload(&preload, false, &cancel).await.unwrap().unwrap();
    assert_eq!(downloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn verified_preload_keeps_a_checksum_record() {
    let temp = TempDir::new().unwrap();
    let preload = Preload::new("v1.30.0", "containerd", "v18", "amd64");
    let body = payload(8192);
    let bucket = temp.path().join("origin/gcs/minikube-preloaded-volume-tarballs");
    std::fs::create_dir_all(&bucket).unwrap();
    std::fs::write(bucket.join(preload.tarball_name()), &body).unwrap();

    let base = url::Url::from_directory_path(temp.path().join("origin")).unwrap();
    let digest = ChecksumDirective::new(Algorithm::Sha256, &sha256_hex(&body)).unwrap();
    let manager = CacheManager::new(
        CacheRoot::new(temp.path().join("home")).unwrap(),
        &config_at(base.as_str()),
    )
    .with_tracker(Arc::new(NoopTracker))
    .with_preload_index(Arc::new(Everywhere))
    .with_checksum_fetcher(Arc::new(FixedDigest(Some(digest.clone()))));
    let paths = manager
        .resolve(&Artifact::Preload(preload.clone()))
        .unwrap();
    let cancel = CancellationToken::new();

    let published = manager.preload(&preload, false, &cancel).await.unwrap().unwrap();
    assert_eq!(
        std::fs::read_to_string(paths.checksum_record()).unwrap(),
        digest.to_string()
    );
    assert_eq!(
        manager.verify_preload(&preload, &cancel).await.unwrap(),
        published
    );

    let mut corrupt = body.clone();
    corrupt[0] ^= 0xff;
    std::fs::write(&published, &corrupt).unwrap();
    let err = manager.verify_preload(&preload, &cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
    assert!(!published.exists());
    assert!(!paths.checksum_record().exists());

    let again = manager.preload(&preload, false, &cancel).await.unwrap().unwrap();
    assert_eq!(std::fs::read(again).unwrap(), body);
}
