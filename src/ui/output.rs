//! Step and error lines for command results

use super::context::UiContext;
use console::style;

#[derive(Debug, Clone, Copy)]
enum Status {
    Ok,
    Warn,
}

impl Status {
    fn tag(self) -> String {
        match self {
            Self::Ok => style("[OK]").green().to_string(),
            Self::Warn => style("[WARN]").yellow().to_string(),
        }
    }
}

fn step(ctx: &UiContext, status: Status, message: &str, extra: &str) {
    if ctx.use_fancy_output() {
        let line = format!("{message}{}", style(extra).dim());
        match status {
            Status::Ok => cliclack::log::success(line).ok(),
            Status::Warn => cliclack::log::warning(line).ok(),
        };
    } else {
        println!("  {} {message}{extra}", status.tag());
    }
}

/// `message (detail)`, e.g. an artifact and where it was cached.
pub fn step_ok_detail(ctx: &UiContext, message: &str, detail: &str) {
    step(ctx, Status::Ok, message, &format!(" ({detail})"));
}

pub fn step_warn_hint(ctx: &UiContext, message: &str, hint: &str) {
    step(ctx, Status::Warn, message, &format!(" - {hint}"));
}

/// Terminal failure: one line on stderr, plus an optional hint.
pub fn error_line(ctx: &UiContext, message: &str, hint: Option<&str>) {
    if ctx.use_fancy_output() {
        eprintln!("{} {}", style("Error:").red().bold(), message);
        if let Some(hint) = hint {
            eprintln!("{} {}", style("Hint:").yellow(), hint);
        }
    } else {
        eprintln!("Error: {message}");
        if let Some(hint) = hint {
            eprintln!("Hint: {hint}");
        }
    }
}
