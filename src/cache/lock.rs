//! Per-artifact exclusive lock, held across tasks and processes.
//!
//! Advisory file locks are per-process on some platforms, so each path
//! also gets an in-process async mutex. Both are taken, in that order.

use crate::error::{CacheError, CacheResult};
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default bound on how long to wait for another holder.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(600);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(200);

type PathMutex = Arc<tokio::sync::Mutex<()>>;

static IN_PROCESS: LazyLock<Mutex<HashMap<PathBuf, PathMutex>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn path_mutex(path: &Path) -> PathMutex {
    let mut map = IN_PROCESS.lock().unwrap_or_else(|e| e.into_inner());
    map.entry(path.to_path_buf()).or_default().clone()
}

/// Drop the entry for `path` once nobody holds or waits on it.
fn prune(path: &Path) {
    let mut map = IN_PROCESS.lock().unwrap_or_else(|e| e.into_inner());
    if map.get(path).is_some_and(|m| Arc::strong_count(m) == 1) {
        map.remove(path);
    }
}

/// A held lock. Released on [`DownloadLock::release`] or drop.
#[derive(Debug)]
pub struct DownloadLock {
    path: PathBuf,
    file: Option<File>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl DownloadLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release both lock layers. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                debug!("Unlocking {} failed: {}", self.path.display(), e);
            }
            debug!("Released lock {}", self.path.display());
        }
        if self.guard.take().is_some() {
            prune(&self.path);
        }
    }
}

impl Drop for DownloadLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Acquire the exclusive lock at `path`, waiting at most `timeout`.
pub async fn acquire(
    path: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
) -> CacheResult<DownloadLock> {
    let deadline = Instant::now() + timeout;
    let timed_out = || CacheError::LockTimeout {
        path: path.to_path_buf(),
        timeout,
    };

    let waited = tokio::select! {
        res = tokio::time::timeout(timeout, path_mutex(path).lock_owned()) => {
            res.map_err(|_| timed_out())
        }
        _ = cancel.cancelled() => Err(CacheError::Cancelled),
    };
    let guard = match waited {
        Ok(guard) => guard,
        Err(e) => {
            prune(path);
            return Err(e);
        }
    };

    match lock_file(path, deadline, cancel).await {
        Ok(file) => {
            debug!("Acquired lock {}", path.display());
            Ok(DownloadLock {
                path: path.to_path_buf(),
                file: Some(file),
                guard: Some(guard),
            })
        }
        Err(e) => {
            drop(guard);
            prune(path);
            Err(e.unwrap_or_else(timed_out))
        }
    }
}

/// Take the advisory lock, polling until `deadline`. `Err(None)` is a timeout.
async fn lock_file(
    path: &Path,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<File, Option<CacheError>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CacheError::io(format!("creating {}", parent.display()), e))?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| CacheError::io(format!("opening lock {}", path.display()), e))?;

    let mut warned = false;
    loop {
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => return Ok(file),
            Err(e) if is_contended(&e) => {
                if Instant::now() >= deadline {
                    return Err(None);
                }
                if !warned {
                    info!(
                        "Waiting for another process to finish with {}",
                        path.display()
                    );
                    warned = true;
                }
                tokio::select! {
                    _ = tokio::time::sleep(LOCK_POLL_INTERVAL) => {}
                    _ = cancel.cancelled() => return Err(Some(CacheError::Cancelled)),
                }
            }
            Err(e) => {
                return Err(Some(CacheError::io(format!("locking {}", path.display()), e)));
            }
        }
    }
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
