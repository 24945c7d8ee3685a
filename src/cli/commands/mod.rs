//! CLI command implementations

pub mod clean;
pub mod config;
pub mod fetch;
pub mod path;
pub mod verify;

pub use clean::execute as clean;
pub use config::execute as config;
pub use fetch::execute as fetch;
pub use path::execute as path;
pub use verify::execute as verify;

use crate::progress::{self, EventEmitter, OutputMode};
use crate::ui::{self, UiContext};

/// Report one line of command output in the active output mode.
pub(crate) fn report(ctx: &UiContext, message: &str, detail: &str) {
    match progress::output_mode() {
        OutputMode::Json => EventEmitter::stdout().info(&format!("{message}: {detail}")),
        OutputMode::Text => ui::step_ok_detail(ctx, message, detail),
    }
}
