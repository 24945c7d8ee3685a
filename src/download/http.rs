//! HTTP(S) getter with HEAD probing and byte-range resume.
//!
//! `ureq` calls block, so they run on detached threads and the body is
//! handed over in chunks. Only the async side touches the partial file, and
//! it waits on the cancellation token alongside every chunk. A server that
//! stalls mid-body therefore cannot hold a cancelled download.

use super::checksum::{ChecksumDirective, Hasher};
use super::client::{head_info, status_error, HttpClient};
use super::{redact, remove_quietly, Getter, Transfer};
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use std::io::{self, Read};
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const BUFFER_SIZE: usize = 64 * 1024;
/// Chunks in flight between the socket thread and the writer.
const CHUNK_QUEUE: usize = 8;

type Chunk = io::Result<Vec<u8>>;

#[derive(Debug, Clone)]
pub struct HttpGetter {
    client: HttpClient,
    probe_ranges: bool,
}

impl HttpGetter {
    pub fn new(client: HttpClient, probe_ranges: bool) -> Self {
        Self {
            client,
            probe_ranges,
        }
    }
}

#[async_trait]
impl Getter for HttpGetter {
    async fn get(&self, transfer: Transfer) -> CacheResult<()> {
        download(&self.client, &transfer, self.probe_ranges).await
    }
}

enum Outcome {
    Done,
    Restart,
}

async fn download(client: &HttpClient, t: &Transfer, probe_ranges: bool) -> CacheResult<()> {
    let url = t.url.as_str();

    let head = if probe_ranges {
        let info = client.head(url, &t.cancel).await?;
        match info.status {
            200..=299 => Some(info),
            401 | 403 | 404 | 410 => return Err(status_error(url, info.status)),
            code => {
                debug!("HEAD {} answered {}, continuing without range info", url, code);
                None
            }
        }
    } else {
        None
    };
    let total = head.as_ref().and_then(|h| h.content_length);
    let ranges = head.as_ref().is_some_and(|h| h.accepts_ranges);

    let partial = partial_size(&t.temp).await;
    let mut start = 0;
    if partial > 0 {
        match total {
            Some(total) if ranges && partial < total => {
                info!("Resuming {} from byte {} of {}", url, partial, total);
                start = partial;
            }
            Some(total) if partial == total || (partial > total && t.checksum.is_some()) => {
                debug!("Partial {} already has {} bytes", t.temp.display(), partial);
                return finish_partial(t, partial).await;
            }
            _ => debug!("Discarding partial {}", t.temp.display()),
        }
    }

    let mut restarted = false;
    loop {
        match transfer_from(client, t, start, total).await? {
            Outcome::Done => return Ok(()),
            Outcome::Restart if !restarted => {
                warn!("Restarting {} from byte 0", url);
                restarted = true;
                start = 0;
            }
            Outcome::Restart => {
                return Err(CacheError::transport(url, "range not satisfiable after restart"))
            }
        }
    }
}

async fn partial_size(path: &Path) -> u64 {
    tokio::fs::metadata(path)
        .await
        .ok()
        .filter(|m| m.is_file())
        .map_or(0, |m| m.len())
}

/// Treat the existing partial as the whole body, pending its checksum.
async fn finish_partial(t: &Transfer, size: u64) -> CacheResult<()> {
    if let Some(directive) = &t.checksum {
        let result = verify_file(&t.temp, directive).await;
        if matches!(result, Err(CacheError::ChecksumMismatch { .. })) {
            remove_quietly(&t.temp);
        }
        result?;
    }
    t.tracker
        .begin(&t.key, redact(t.url.as_str()), size, size)
        .finish();
    Ok(())
}

async fn verify_file(path: &Path, directive: &ChecksumDirective) -> CacheResult<()> {
    let (path, directive) = (path.to_path_buf(), directive.clone());
    tokio::task::spawn_blocking(move || super::checksum::verify_file(&path, &directive))
        .await
        .map_err(|e| CacheError::Internal(format!("checksum task failed: {e}")))?
}

/// Hasher primed with the bytes already in the partial.
async fn hash_prefix(path: &Path, directive: &ChecksumDirective) -> CacheResult<Hasher> {
    let path = path.to_path_buf();
    let mut hasher = directive.hasher();
    tokio::task::spawn_blocking(move || {
        let mut prefix = std::fs::File::open(&path)
            .map_err(|e| CacheError::io(format!("opening {}", path.display()), e))?;
        hasher
            .consume_reader(&mut prefix)
            .map_err(|e| CacheError::io(format!("hashing {}", path.display()), e))?;
        Ok(hasher)
    })
    .await
    .map_err(|e| CacheError::Internal(format!("hashing task failed: {e}")))?
}

async fn transfer_from(
    client: &HttpClient,
    t: &Transfer,
    start: u64,
    head_total: Option<u64>,
) -> CacheResult<Outcome> {
    let url = t.url.as_str();
    let resp = client
        .get(url, (start > 0).then_some(start), &t.cancel)
        .await?;
    let status = resp.status().as_u16();
    let body_len = head_info(&resp).content_length;

    let (start, append) = match status {
        206 if start > 0 => (start, true),
        200 | 206 => {
            if start > 0 {
                debug!("Server ignored range request for {}, restarting", url);
            }
            (0, false)
        }
        416 if start > 0 => {
            drop(resp);
            return range_not_satisfiable(client, t, start).await;
        }
        code => return Err(status_error(url, code)),
    };
    let total = body_len.map(|n| n + start).or(head_total);

    let mut file = open_temp(&t.temp, append).await?;
    let mut hasher = match &t.checksum {
        Some(d) if append => Some(hash_prefix(&t.temp, d).await?),
        Some(d) => Some(d.hasher()),
        None => None,
    };

    let mut chunks = stream_body(resp.into_body().into_reader())?;
    let mut handle = t
        .tracker
        .begin(&t.key, redact(url), start, total.unwrap_or(0));
    let mut written = start;
    loop {
        let chunk = tokio::select! {
            biased;
            _ = t.cancel.cancelled() => {
                sync_quietly(&mut file).await;
                return Err(CacheError::Cancelled);
            }
            chunk = chunks.recv() => chunk,
        };
        let bytes = match chunk {
            None => break,
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                sync_quietly(&mut file).await;
                return Err(CacheError::transport(url, e));
            }
        };
        file.write_all(&bytes)
            .await
            .map_err(|e| CacheError::io(format!("writing {}", t.temp.display()), e))?;
        if let Some(h) = hasher.as_mut() {
            h.update(&bytes);
        }
        written += bytes.len() as u64;
        handle.update(written);
    }
    file.flush()
        .await
        .map_err(|e| CacheError::io(format!("flushing {}", t.temp.display()), e))?;
    file.sync_all()
        .await
        .map_err(|e| CacheError::io(format!("syncing {}", t.temp.display()), e))?;

    if let Some(total) = total {
        if written != total {
            return Err(CacheError::transport(
                url,
                format!("short body: got {written} of {total} bytes"),
            ));
        }
    }

    if let (Some(directive), Some(hasher)) = (&t.checksum, hasher) {
        if let Err(e) = directive.check(hasher, &t.temp) {
            remove_quietly(&t.temp);
            return Err(e);
        }
        debug!("Checksum {} verified for {}", directive, t.temp.display());
    }
    handle.finish();
    Ok(Outcome::Done)
}

/// Pump `body` into a bounded channel from a detached thread.
///
/// The thread exits at EOF, on a read error, or at its next chunk once the
/// receiver is dropped. A read that never returns keeps only this thread.
fn stream_body(mut body: impl Read + Send + 'static) -> CacheResult<mpsc::Receiver<Chunk>> {
    let (tx, rx) = mpsc::channel::<Chunk>(CHUNK_QUEUE);
    std::thread::Builder::new()
        .name("minicache-body".to_string())
        .spawn(move || loop {
            let mut buf = vec![0u8; BUFFER_SIZE];
            let chunk = match body.read(&mut buf) {
                Ok(0) => return,
                Ok(n) => {
                    buf.truncate(n);
                    Ok(buf)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(e),
            };
            let failed = chunk.is_err();
            if tx.blocking_send(chunk).is_err() || failed {
                return;
            }
        })
        .map_err(|e| CacheError::io("spawning body reader", e))?;
    Ok(rx)
}

/// A 416 means our partial is complete only if the server agrees on its
/// length and the checksum (when known) matches.
async fn range_not_satisfiable(
    client: &HttpClient,
    t: &Transfer,
    start: u64,
) -> CacheResult<Outcome> {
    let info = client.head(t.url.as_str(), &t.cancel).await?;
    if info.is_success() && info.content_length == Some(start) {
        let complete = match &t.checksum {
            Some(d) => verify_file(&t.temp, d).await.is_ok(),
            None => true,
        };
        if complete {
            debug!("416 on {}: partial is complete", t.url);
            t.tracker
                .begin(&t.key, redact(t.url.as_str()), start, start)
                .finish();
            return Ok(Outcome::Done);
        }
    }
    remove_quietly(&t.temp);
    Ok(Outcome::Restart)
}

async fn open_temp(path: &Path, append: bool) -> CacheResult<File> {
    let mut opts = OpenOptions::new();
    opts.create(true);
    if append {
        opts.append(true);
    } else {
        opts.write(true).truncate(true);
    }
    opts.open(path)
        .await
        .map_err(|e| CacheError::io(format!("opening {}", path.display()), e))
}

async fn sync_quietly(file: &mut File) {
    let _ = file.flush().await;
    let _ = file.sync_all().await;
}
