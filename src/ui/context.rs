//! UI context for choosing styled or plain output

use crate::env;
use std::io::IsTerminal;

/// UI context that determines output behavior
#[derive(Debug, Clone)]
pub struct UiContext {
    /// Whether styled output is used
    styled: bool,
}

impl UiContext {
    /// Detect the current environment, honoring `MINIKUBE_IN_STYLE`
    pub fn detect() -> Self {
        let styled = env::in_style().unwrap_or_else(Self::detect_interactive);
        Self { styled }
    }

    /// Create a plain context (for testing or explicit CI mode)
    pub fn plain() -> Self {
        Self { styled: false }
    }

    /// Check if we should use fancy output (colors, cliclack glyphs)
    pub fn use_fancy_output(&self) -> bool {
        self.styled
    }

    fn detect_interactive() -> bool {
        if !std::io::stdout().is_terminal() {
            return false;
        }

        let ci_vars = [
            "CI",
            "GITHUB_ACTIONS",
            "GITLAB_CI",
            "CIRCLECI",
            "TRAVIS",
            "JENKINS_URL",
            "BUILDKITE",
            "TEAMCITY_VERSION",
            "TF_BUILD",
        ];
        !ci_vars.iter().any(|var| std::env::var_os(var).is_some())
    }
}
