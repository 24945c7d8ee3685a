//! `file://` getter.

use super::{Getter, Transfer};
use crate::error::{CacheError, CacheResult};
use crate::progress::track_progress;
use async_trait::async_trait;
use std::fs::File;
use std::io::{Read, Write};

const BUFFER_SIZE: usize = 64 * 1024;

/// Copies a local file into the download slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileGetter;

#[async_trait]
impl Getter for FileGetter {
    async fn get(&self, transfer: Transfer) -> CacheResult<()> {
        tokio::task::spawn_blocking(move || copy(&transfer))
            .await
            .map_err(|e| CacheError::Internal(format!("copy task failed: {e}")))?
    }

    fn is_remote(&self) -> bool {
        false
    }
}

fn copy(t: &Transfer) -> CacheResult<()> {
    let src = t.url.to_file_path().map_err(|()| CacheError::InvalidUrl {
        url: t.url.to_string(),
        reason: "not a local file path".to_string(),
    })?;
    let input = File::open(&src).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CacheError::NotFound(src.display().to_string())
        } else {
            CacheError::io(format!("opening {}", src.display()), e)
        }
    })?;
    let total = input
        .metadata()
        .map_err(|e| CacheError::io(format!("reading metadata of {}", src.display()), e))?
        .len();

    let mut output = File::create(&t.temp)
        .map_err(|e| CacheError::io(format!("creating {}", t.temp.display()), e))?;
    let mut hasher = t.checksum.as_ref().map(|d| d.hasher());
    let mut reader = track_progress(
        t.tracker.as_ref(),
        &t.key,
        super::redact(t.url.as_str()),
        0,
        total,
        input,
    );
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        if t.cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }
        let n = reader
            .read(&mut buf)
            .map_err(|e| CacheError::io(format!("reading {}", src.display()), e))?;
        if n == 0 {
            break;
        }
        output
            .write_all(&buf[..n])
            .map_err(|e| CacheError::io(format!("writing {}", t.temp.display()), e))?;
        if let Some(h) = hasher.as_mut() {
            h.update(&buf[..n]);
        }
    }
    output
        .sync_all()
        .map_err(|e| CacheError::io(format!("syncing {}", t.temp.display()), e))?;

    if let (Some(directive), Some(hasher)) = (&t.checksum, hasher) {
        if let Err(e) = directive.check(hasher, &t.temp) {
            super::remove_quietly(&t.temp);
            return Err(e);
        }
    }
    reader.finish();
    Ok(())
}
