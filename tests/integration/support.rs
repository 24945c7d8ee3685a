//! Shared fixtures: range-aware responders, a throttled server, managers.

use minicache::cache::CacheManager;
use minicache::config::schema::SourcesConfig;
use minicache::config::Config;
use minicache::download::HttpClient;
use minicache::localpath::CacheRoot;
use minicache::progress::{NoopTracker, ProgressHandle, ProgressTracker};
use sha2::{Digest, Sha256};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use wiremock::{Request, Respond, ResponseTemplate};

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Config with every upstream pointed at `base`.
pub fn config_at(base: &str) -> Config {
    Config {
        sources: SourcesConfig::all_at(base),
        ..Config::default()
    }
}

/// Manager rooted in `dir` talking to `base`, with real network allowed.
pub fn manager_at(dir: &Path, base: &str) -> CacheManager {
    let config = config_at(base);
    let client = HttpClient::new(config.cache.head_timeout()).allow_network();
    CacheManager::with_client(CacheRoot::new(dir).unwrap(), &config, client)
        .with_tracker(Arc::new(NoopTracker))
}

/// Parse `bytes=N-` into `N`.
pub fn range_start(value: &str) -> Option<u64> {
    value
        .strip_prefix("bytes=")?
        .strip_suffix('-')?
        .parse()
        .ok()
}

/// Serves `body`, honoring `Range: bytes=N-` with 206 (or 416 past the end).
pub struct RangeResponder {
    pub body: Vec<u8>,
}

impl RangeResponder {
    pub fn new(body: Vec<u8>) -> Self {
        Self { body }
    }
}

impl Respond for RangeResponder {
    fn respond(&self, req: &Request) -> ResponseTemplate {
        let len = self.body.len() as u64;
        let start = req
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(range_start);

        match start {
            Some(start) if start >= len => ResponseTemplate::new(416)
                .insert_header("Content-Range", format!("bytes */{len}").as_str()),
            Some(start) => ResponseTemplate::new(206)
                .insert_header("Accept-Ranges", "bytes")
                .insert_header(
                    "Content-Range",
                    format!("bytes {start}-{}/{len}", len - 1).as_str(),
                )
                .set_body_bytes(self.body[start as usize..].to_vec()),
            None => ResponseTemplate::new(200)
                .insert_header("Accept-Ranges", "bytes")
                .set_body_bytes(self.body.clone()),
        }
    }
}

/// Minimal HTTP/1.1 server that trickles a payload out in small chunks,
/// so transfers can be interrupted midway. `<path>.sha256` serves the
/// payload digest. One thread per connection, `Connection: close`.
pub struct SlowServer {
    pub base: String,
}

impl SlowServer {
    pub fn start(path: &str, body: Vec<u8>, chunk: usize, interval: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let path = path.to_string();
        let body = Arc::new(body);

        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let path = path.clone();
                let body = body.clone();
                thread::spawn(move || serve(stream, &path, &body, chunk, interval));
            }
        });
        Self { base }
    }
}

fn serve(stream: TcpStream, path: &str, body: &[u8], chunk: usize, interval: Duration) {
    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(s) => s,
        Err(_) => return,
    });
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    let mut range = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("range") {
                range = range_start(value.trim());
            }
        }
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();
    let mut out = stream;

    if target == format!("{path}.sha256") {
        let digest = sha256_hex(body);
        let _ = write!(
            out,
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            digest.len(),
            digest
        );
        return;
    }
    if target != path {
        let _ = write!(out, "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        return;
    }

    let len = body.len();
    let start = range.map_or(0, |s| s as usize).min(len);
    let head = if range.is_some() {
        format!(
            "HTTP/1.1 206 Partial Content\r\nAccept-Ranges: bytes\r\nContent-Range: bytes {start}-{}/{len}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            len - 1,
            len - start
        )
    } else {
        format!(
            "HTTP/1.1 200 OK\r\nAccept-Ranges: bytes\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n"
        )
    };
    if out.write_all(head.as_bytes()).is_err() || method == "HEAD" {
        return;
    }
    for piece in body[start..].chunks(chunk) {
        if out.write_all(piece).is_err() {
            return;
        }
        thread::sleep(interval);
    }
}

/// Tracker that records every call as a line of text.
#[derive(Debug, Clone, Default)]
pub struct RecordingTracker(pub Arc<Mutex<Vec<String>>>);

impl RecordingTracker {
    pub fn log(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn finishes(&self) -> usize {
        self.log().iter().filter(|l| *l == "finish").count()
    }
}

struct RecordingHandle(Arc<Mutex<Vec<String>>>);

impl ProgressHandle for RecordingHandle {
    fn update(&mut self, _current: u64) {}

    fn finish(&mut self) {
        self.0.lock().unwrap().push("finish".to_string());
    }
}

impl ProgressTracker for RecordingTracker {
    fn begin(&self, key: &str, source: &str, current: u64, total: u64) -> Box<dyn ProgressHandle> {
        self.0
            .lock()
            .unwrap()
            .push(format!("begin {key} {source} {current}/{total}"));
        Box::new(RecordingHandle(self.0.clone()))
    }
}
