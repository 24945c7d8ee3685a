//! Rate-limited JSON progress events.

use super::events::EventEmitter;
use super::{ProgressHandle, ProgressTracker};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Time source, replaceable in tests.
pub type Clock = Arc<dyn Fn() -> Instant + Send + Sync>;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Emits `download` on start, `download.progress` at most once per
/// interval, and exactly one final `download.progress` at 1.0.
#[derive(Clone)]
pub struct JsonTracker {
    emitter: EventEmitter,
    step: String,
    interval: Duration,
    clock: Clock,
}

impl JsonTracker {
    pub fn new(emitter: EventEmitter, step: impl Into<String>) -> Self {
        Self {
            emitter,
            step: step.into(),
            interval: DEFAULT_INTERVAL,
            clock: Arc::new(Instant::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl ProgressTracker for JsonTracker {
    fn begin(&self, key: &str, source: &str, current: u64, total: u64) -> Box<dyn ProgressHandle> {
        self.emitter.download_started(key, source, &self.step);
        Box::new(JsonHandle {
            tracker: self.clone(),
            key: key.to_string(),
            total,
            last_emit: None,
            finished: false,
            current,
        })
    }
}

struct JsonHandle {
    tracker: JsonTracker,
    key: String,
    total: u64,
    current: u64,
    last_emit: Option<Instant>,
    finished: bool,
}

impl ProgressHandle for JsonHandle {
    fn update(&mut self, current: u64) {
        self.current = current;
        if self.finished || (self.total > 0 && current >= self.total) {
            return;
        }
        let now = (self.tracker.clock)();
        let due = self
            .last_emit
            .is_none_or(|last| now.duration_since(last) >= self.tracker.interval);
        if !due {
            return;
        }
        self.last_emit = Some(now);
        let fraction = if self.total == 0 {
            0.0
        } else {
            current as f64 / self.total as f64
        };
        self.tracker
            .emitter
            .download_progress(&self.key, &self.tracker.step, fraction.clamp(0.0, 1.0));
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.tracker
            .emitter
            .download_progress(&self.key, &self.tracker.step, 1.0);
    }
}
