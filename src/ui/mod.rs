//! Terminal output for the command-line front end
//!
//! Uses `cliclack` for styled step output when attached to a terminal,
//! falling back to plain bracketed lines in CI and pipes.
//!
//! # Example
//!
//! ```rust,ignore
//! use minicache::ui::{self, UiContext};
//!
//! let ctx = UiContext::detect();
//! ui::step_ok_detail(&ctx, "kubectl v1.30.0", "/home/me/.minikube/cache/...");
//! ui::step_warn_hint(&ctx, "No preload available", "Images will be pulled individually");
//! ```

mod context;
mod output;
mod theme;

pub use context::UiContext;
pub use output::{error_line, step_ok_detail, step_warn_hint};
pub use theme::{init_theme, MinicacheTheme};
