//! Download progress reporting.
//!
//! Two trackers share one contract: an interactive bar for terminals and
//! a CloudEvents line stream for machine consumers. Which one runs is
//! decided once per process from the output mode.

mod bar;
pub mod events;
mod json;

pub use bar::BarTracker;
pub use events::EventEmitter;
pub use json::{Clock, JsonTracker};

use std::io::{self, Read};
use std::sync::{Arc, OnceLock};

/// How the process reports progress and failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Text,
    Json,
}

static OUTPUT_MODE: OnceLock<OutputMode> = OnceLock::new();

/// Set the process-wide output mode. Only the first call has an effect.
pub fn set_output_mode(mode: OutputMode) -> bool {
    OUTPUT_MODE.set(mode).is_ok()
}

pub fn output_mode() -> OutputMode {
    OUTPUT_MODE.get().copied().unwrap_or_default()
}

/// Creates a progress handle per transfer.
pub trait ProgressTracker: Send + Sync {
    /// Start reporting for `key` fetched from `source` (a redacted URL),
    /// already at `current` of `total` bytes.
    fn begin(&self, key: &str, source: &str, current: u64, total: u64) -> Box<dyn ProgressHandle>;
}

/// Receives byte counts for one transfer.
pub trait ProgressHandle: Send {
    fn update(&mut self, current: u64);
    fn finish(&mut self);
}

/// Tracker that reports nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracker;

struct NoopHandle;

impl ProgressHandle for NoopHandle {
    fn update(&mut self, _current: u64) {}
    fn finish(&mut self) {}
}

impl ProgressTracker for NoopTracker {
    fn begin(&self, _key: &str, _source: &str, _current: u64, _total: u64) -> Box<dyn ProgressHandle> {
        Box::new(NoopHandle)
    }
}

/// Tracker matching the process output mode.
pub fn default_tracker(step: &str) -> Arc<dyn ProgressTracker> {
    match output_mode() {
        OutputMode::Json => Arc::new(JsonTracker::new(EventEmitter::stdout(), step)),
        OutputMode::Text => Arc::new(BarTracker::new()),
    }
}

/// A reader that reports bytes as they pass through.
///
/// Reaching EOF does not complete the transfer: the caller finishes the
/// handle with [`TrackedReader::finish`] once the bytes are verified, so
/// an aborted or rejected transfer never claims completion.
pub struct TrackedReader<R> {
    inner: R,
    handle: Box<dyn ProgressHandle>,
    current: u64,
}

impl<R: Read> TrackedReader<R> {
    pub fn position(&self) -> u64 {
        self.current
    }

    /// Report the transfer as complete.
    pub fn finish(mut self) {
        self.handle.finish();
    }
}

impl<R: Read> Read for TrackedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.current += n as u64;
            self.handle.update(self.current);
        }
        Ok(n)
    }
}

/// Wrap `reader` so reads advance the tracker for `key`.
pub fn track_progress<R: Read>(
    tracker: &dyn ProgressTracker,
    key: &str,
    source: &str,
    current: u64,
    total: u64,
    reader: R,
) -> TrackedReader<R> {
    TrackedReader {
        inner: reader,
        handle: tracker.begin(key, source, current, total),
        current,
    }
}
