//! Terminal progress bar.

use super::{ProgressHandle, ProgressTracker};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Mutex;

/// Serializes redraws across concurrent bars.
static RENDER: Mutex<()> = Mutex::new(());

/// Widest label shown before the bar.
const PREFIX_WIDTH: usize = 24;
// 24 + 1 + 20 + 1 + 9 + 1 + 9 + 1 + 11 = 77 columns
const TEMPLATE: &str =
    "{prefix:24} {bar:20.cyan/blue} {bytes:>9}/{total_bytes:<9} {binary_bytes_per_sec:>11}";

#[derive(Debug, Clone, Copy, Default)]
pub struct BarTracker {
    hidden: bool,
}

impl BarTracker {
    pub fn new() -> Self {
        Self { hidden: false }
    }

    /// A tracker that keeps state but never draws.
    pub fn hidden() -> Self {
        Self { hidden: true }
    }
}

impl ProgressTracker for BarTracker {
    fn begin(&self, key: &str, _source: &str, current: u64, total: u64) -> Box<dyn ProgressHandle> {
        let bar = ProgressBar::with_draw_target(
            Some(total),
            if self.hidden {
                ProgressDrawTarget::hidden()
            } else {
                ProgressDrawTarget::stderr()
            },
        );
        if let Ok(style) = ProgressStyle::default_bar().template(TEMPLATE) {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_prefix(abbreviate(key, PREFIX_WIDTH));
        bar.set_position(current);
        Box::new(BarHandle { bar })
    }
}

struct BarHandle {
    bar: ProgressBar,
}

impl ProgressHandle for BarHandle {
    fn update(&mut self, current: u64) {
        let _render = RENDER.lock().unwrap_or_else(|e| e.into_inner());
        self.bar.set_position(current);
    }

    fn finish(&mut self) {
        let _render = RENDER.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(total) = self.bar.length() {
            self.bar.set_position(total);
        }
        self.bar.finish();
    }
}

/// Shorten `s` to at most `width` characters, keeping the tail.
fn abbreviate(s: &str, width: usize) -> String {
    let count = s.chars().count();
    if count <= width {
        return s.to_string();
    }
    let tail: String = s.chars().skip(count - (width - 3)).collect();
    format!("...{tail}")
}
