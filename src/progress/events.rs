//! CloudEvents 1.0 envelopes written one per line.

use serde::Serialize;
use serde_json::{json, Value};
use std::io::Write;
use std::sync::{Arc, Mutex};

pub const SOURCE: &str = "https://minikube.sigs.k8s.io/";
pub const SPEC_VERSION: &str = "1.0";
pub const CONTENT_TYPE: &str = "application/json";

pub const TYPE_DOWNLOAD: &str = "io.k8s.sigs.minikube.download";
pub const TYPE_DOWNLOAD_PROGRESS: &str = "io.k8s.sigs.minikube.download.progress";
pub const TYPE_ERROR: &str = "io.k8s.sigs.minikube.error";
pub const TYPE_INFO: &str = "io.k8s.sigs.minikube.info";

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    id: String,
    source: &'static str,
    #[serde(rename = "type")]
    event_type: &'a str,
    specversion: &'static str,
    datacontenttype: &'static str,
    data: Value,
}

type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;
type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Serializes event envelopes to a shared line-oriented writer.
#[derive(Clone)]
pub struct EventEmitter {
    out: SharedWriter,
    next_id: IdGenerator,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter").finish_non_exhaustive()
    }
}

impl EventEmitter {
    pub fn stdout() -> Self {
        Self::with_writer(std::io::stdout())
    }

    pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(writer))),
            next_id: Arc::new(|| uuid::Uuid::new_v4().to_string()),
        }
    }

    /// Replace the id source, e.g. with a fixed value in tests.
    pub fn with_id_generator(mut self, f: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.next_id = Arc::new(f);
        self
    }

    pub fn emit(&self, event_type: &str, data: Value) {
        let envelope = Envelope {
            id: (self.next_id)(),
            source: SOURCE,
            event_type,
            specversion: SPEC_VERSION,
            datacontenttype: CONTENT_TYPE,
            data,
        };
        let line = match serde_json::to_string(&envelope) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to encode {} event: {}", event_type, e);
                return;
            }
        };
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        // Best effort; a closed stdout must not abort a download.
        let _ = writeln!(out, "{line}").and_then(|()| out.flush());
    }

    /// `source` must already be redacted.
    pub fn download_started(&self, artifact: &str, source: &str, step: &str) {
        self.emit(
            TYPE_DOWNLOAD,
            json!({ "artifact": artifact, "source": source, "step": step }),
        );
    }

    pub fn download_progress(&self, artifact: &str, step: &str, progress: f64) {
        self.emit(
            TYPE_DOWNLOAD_PROGRESS,
            json!({ "artifact": artifact, "step": step, "progress": progress }),
        );
    }

    pub fn info(&self, message: &str) {
        self.emit(TYPE_INFO, json!({ "message": message }));
    }

    pub fn error(&self, name: &str, exit_code: u8, message: &str) {
        self.emit(
            TYPE_ERROR,
            json!({ "name": name, "exitcode": exit_code, "message": message }),
        );
    }
}

/// In-memory writer whose contents can be read back, for tests.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Parsed events, one per non-empty line.
    pub fn events(&self) -> Vec<Value> {
        self.contents()
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut inner = self.0.lock().unwrap_or_else(|e| e.into_inner());
        inner.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
