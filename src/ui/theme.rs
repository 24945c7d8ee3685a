//! Custom theme for cliclack output

use cliclack::ThemeState;
use console::Style;

/// Cyan-accented theme for step output.
#[derive(Debug, Clone, Default)]
pub struct MinicacheTheme;

impl cliclack::Theme for MinicacheTheme {
    fn bar_color(&self, state: &ThemeState) -> Style {
        match state {
            ThemeState::Active => Style::new().cyan(),
            ThemeState::Error(_) => Style::new().red(),
            ThemeState::Cancel => Style::new().dim(),
            ThemeState::Submit => Style::new().cyan().dim(),
        }
    }

    fn state_symbol_color(&self, state: &ThemeState) -> Style {
        match state {
            ThemeState::Active => Style::new().cyan(),
            ThemeState::Error(_) => Style::new().red(),
            ThemeState::Cancel => Style::new().dim(),
            ThemeState::Submit => Style::new().green(),
        }
    }
}

/// Install the theme globally.
pub fn init_theme() {
    cliclack::set_theme(MinicacheTheme);
}
