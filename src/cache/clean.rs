//! Purge preloaded tarballs from other generations.

use std::path::Path;
use tracing::{debug, info, warn};

const PRELOAD_PREFIX: &str = "preloaded-images-k8s-";

/// Generation token of a preload file name: its 4th `-`-separated field.
pub fn generation_of(file_name: &str) -> Option<&str> {
    if !file_name.starts_with(PRELOAD_PREFIX) {
        return None;
    }
    file_name.split('-').nth(3).filter(|g| !g.is_empty())
}

/// Remove every preload in `dir` whose generation differs from `current`.
///
/// Failures are logged and skipped. Returns the number of files removed.
pub async fn clean_old_generations(dir: &Path, current: &str) -> usize {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            warn!("Failed to list {}: {}", dir.display(), e);
            return 0;
        }
    };

    let mut removed = 0;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read entry in {}: {}", dir.display(), e);
                break;
            }
        };
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(generation) = generation_of(name) else {
            debug!("Skipping non-preload entry {}", name);
            continue;
        };
        if generation == current {
            continue;
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => {
                info!("Removed old preload {} (generation {})", name, generation);
                removed += 1;
            }
            Err(e) => warn!("Failed to remove {}: {}", entry.path().display(), e),
        }
    }
    removed
}
