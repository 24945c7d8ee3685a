//! Multi-process behaviour. The test binary re-executes itself with a
//! role in the environment; children run one materialization and exit.

use crate::support::{manager_at, payload, SlowServer};
use futures_util::future::BoxFuture;
use minicache::cache::{Artifact, Binary, CacheManager};
use minicache::config::Config;
use minicache::download::DownloadMock;
use minicache::error::{CacheError, CacheResult};
use minicache::localpath::CacheRoot;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const ROLE: &str = "MINICACHE_TEST_ROLE";
const ROOT: &str = "MINICACHE_TEST_ROOT";
const SIDE_CHANNEL: &str = "MINICACHE_TEST_SIDE_CHANNEL";
const SERVER: &str = "MINICACHE_TEST_SERVER";

const BODY_LEN: usize = 4 * 1024 * 1024;
const SLOW_PATH: &str = "/k8s/release/v1.30.0/bin/linux/amd64/kubeadm";

fn child(test: &str, envs: &[(&str, String)]) -> Command {
    let mut cmd = Command::new(std::env::current_exe().unwrap());
    cmd.args([test, "--exact", "--nocapture", "--test-threads=1"])
        .stdout(Stdio::null())
        .stderr(Stdio::inherit());
    for (k, v) in envs {
        cmd.env(k, v);
    }
    cmd
}

/// Mock transport that records each invocation in a shared file.
fn side_channel_mock(side: PathBuf) -> DownloadMock {
    Arc::new(move |source: String, dest: PathBuf| -> BoxFuture<'static, CacheResult<()>> {
        let side = side.clone();
        Box::pin(async move {
            let mut f = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&side)
                .map_err(|e| CacheError::io("side channel", e))?;
            writeln!(f, "{}", std::process::id()).map_err(|e| CacheError::io("side channel", e))?;
            tokio::time::sleep(Duration::from_secs(1)).await;
            tokio::fs::write(&dest, source)
                .await
                .map_err(|e| CacheError::io("mock write", e))
        })
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn child_materialize() {
    if std::env::var(ROLE).as_deref() != Ok("materialize") {
        return;
    }
    let root = std::env::var(ROOT).unwrap();
    let side = PathBuf::from(std::env::var(SIDE_CHANNEL).unwrap());
    let manager = CacheManager::new(CacheRoot::new(root).unwrap(), &Config::default())
        .with_download_mock(side_channel_mock(side));
    let published = manager
        .binary(
            &Binary::new("kubectl", "v1.20.2", "linux", "amd64"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(published.exists());
}

#[test]
fn single_flight_across_processes() {
    let temp = TempDir::new().unwrap();
    let side = temp.path().join("transport-calls");
    let envs = [
        (ROLE, "materialize".to_string()),
        (ROOT, temp.path().display().to_string()),
        (SIDE_CHANNEL, side.display().to_string()),
    ];

    let mut a = child("cross_process::child_materialize", &envs).spawn().unwrap();
    let mut b = child("cross_process::child_materialize", &envs).spawn().unwrap();
    assert!(a.wait().unwrap().success());
    assert!(b.wait().unwrap().success());

    let calls = std::fs::read_to_string(&side).unwrap();
    assert_eq!(calls.lines().count(), 1, "transport ran more than once: {calls:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn child_slow_download() {
    if std::env::var(ROLE).as_deref() != Ok("slow-download") {
        return;
    }
    let root = std::env::var(ROOT).unwrap();
    let server = std::env::var(SERVER).unwrap();
    let manager = manager_at(std::path::Path::new(&root), &server);
    let _ = manager
        .binary(
            &Binary::new("kubeadm", "v1.30.0", "linux", "amd64"),
            &CancellationToken::new(),
        )
        .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn killed_transfer_never_publishes() {
    let body = payload(BODY_LEN);
    let server = SlowServer::start(SLOW_PATH, body.clone(), 32 * 1024, Duration::from_millis(10));
    let temp = TempDir::new().unwrap();
    // CacheRoot appends the sentinel; the child gets the same base.
    let envs = [
        (ROLE, "slow-download".to_string()),
        (ROOT, temp.path().display().to_string()),
        (SERVER, server.base.clone()),
    ];

    let manager = manager_at(temp.path(), &server.base);
    let bin = Binary::new("kubeadm", "v1.30.0", "linux", "amd64");
    let paths = manager.resolve(&Artifact::Binary(bin.clone())).unwrap();

    let mut proc = child("cross_process::child_slow_download", &envs).spawn().unwrap();
    let mut waited = Duration::ZERO;
    while !paths.download.exists() && waited < Duration::from_secs(10) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        waited += Duration::from_millis(50);
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    proc.kill().unwrap();
    proc.wait().unwrap();

    assert!(!paths.target.exists(), "killed transfer published a file");
    let partial = std::fs::metadata(&paths.download).unwrap().len();
    assert!(partial < BODY_LEN as u64);

    let published = manager
        .binary(&bin, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(std::fs::metadata(&published).unwrap().len(), BODY_LEN as u64);
    assert_eq!(std::fs::read(published).unwrap(), body);
}
