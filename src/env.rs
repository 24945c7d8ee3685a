//! Environment variables read by the cache core.

/// Cache-root override. Used verbatim when it already ends in `.minikube`.
pub const MINIKUBE_HOME: &str = "MINIKUBE_HOME";

/// Truthy forces stylized output, falsy forces plain, unset auto-detects.
pub const MINIKUBE_IN_STYLE: &str = "MINIKUBE_IN_STYLE";

/// `"1"` enables span timing for the life of the process.
pub const MINIKUBE_ENABLE_PROFILING: &str = "MINIKUBE_ENABLE_PROFILING";

/// Non-empty in processes spawned by another instance.
pub const MINIKUBE_CHILD_PROCESS: &str = "MINIKUBE_CHILD_PROCESS";

/// Bearer token for release-host API calls.
pub const GITHUB_TOKEN: &str = "GITHUB_TOKEN";

/// Bearer token for object-store requests.
pub const GOOGLE_OAUTH_ACCESS_TOKEN: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Config file override for the binary.
pub const MINICACHE_CONFIG: &str = "MINICACHE_CONFIG";

/// Read a variable, treating empty values as unset.
pub fn non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Parse a boolean-ish value (`1`, `true`, `yes`, `on` and their negatives).
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "y" | "yes" | "on" => Some(true),
        "0" | "f" | "false" | "n" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Output-style override, if set to a recognizable value.
pub fn in_style() -> Option<bool> {
    non_empty(MINIKUBE_IN_STYLE).and_then(|v| parse_bool(&v))
}

pub fn profiling_enabled() -> bool {
    std::env::var(MINIKUBE_ENABLE_PROFILING).as_deref() == Ok("1")
}

pub fn is_child_process() -> bool {
    non_empty(MINIKUBE_CHILD_PROCESS).is_some()
}
