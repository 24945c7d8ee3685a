//! Error types for minicache
//!
//! All modules use `CacheResult<T>` as their return type. Every error
//! classifies into an [`ErrorKind`], which carries the stable process
//! exit code.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// One failed attempt against a candidate source.
#[derive(Debug)]
pub struct SourceFailure {
    pub url: String,
    pub error: CacheError,
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.url, self.error)
    }
}

/// All errors that can occur while materializing artifacts
#[derive(Error, Debug)]
pub enum CacheError {
    // Descriptor and configuration errors
    #[error("Invalid artifact descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid checksum directive {0:?}")]
    InvalidChecksum(String),

    // Lock errors
    #[error("Timed out after {}s waiting for lock {}", timeout.as_secs(), path.display())]
    LockTimeout { path: PathBuf, timeout: Duration },

    // Transport errors
    #[error("Refusing real download of {url} from a test binary (no download mock installed)")]
    UnmockedDownload { url: String },

    #[error("Bad response status {code} from {url}")]
    BadStatus { url: String, code: u16 },

    #[error("Transfer from {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("Checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Authentication required for {target}: {reason}")]
    AuthRequired { target: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Download failed for {artifact}, no source available ({} attempts)", failures.len())]
    NoSourceAvailable {
        artifact: String,
        failures: Vec<SourceFailure>,
    },

    #[error("Checksum unavailable for {url}: {reason}")]
    ChecksumUnavailable { url: String, reason: String },

    // Container image errors
    #[error("Failed to save image {image}: {reason}")]
    ImageSave { image: String, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an error, stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    Io,
    NoSource,
    NotFound,
    ChecksumMismatch,
    AuthRequired,
    TransientIo,
    LockTimeout,
    UnmockedDownload,
    Cancelled,
}

impl ErrorKind {
    /// Process exit code for this kind.
    ///
    /// | kind | code |
    /// |------|------|
    /// | `Config` | 2 |
    /// | `Io` | 3 |
    /// | `NoSource` | 60 |
    /// | `NotFound` | 61 |
    /// | `ChecksumMismatch` | 62 |
    /// | `AuthRequired` | 63 |
    /// | `TransientIo` | 64 |
    /// | `LockTimeout` | 65 |
    /// | `UnmockedDownload` | 66 |
    /// | `Cancelled` | 130 |
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Config => 2,
            Self::Io => 3,
            Self::NoSource => 60,
            Self::NotFound => 61,
            Self::ChecksumMismatch => 62,
            Self::AuthRequired => 63,
            Self::TransientIo => 64,
            Self::LockTimeout => 65,
            Self::UnmockedDownload => 66,
            Self::Cancelled => 130,
        }
    }

    /// Upper-snake name used in structured error events.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "CONFIG",
            Self::Io => "IO",
            Self::NoSource => "NO_SOURCE",
            Self::NotFound => "NOT_FOUND",
            Self::ChecksumMismatch => "CHECKSUM_MISMATCH",
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::TransientIo => "TRANSIENT_IO",
            Self::LockTimeout => "LOCK_TIMEOUT",
            Self::UnmockedDownload => "UNMOCKED_DOWNLOAD",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind for an unexpected HTTP status.
pub fn status_kind(code: u16) -> ErrorKind {
    match code {
        401 | 403 => ErrorKind::AuthRequired,
        404 | 410 => ErrorKind::NotFound,
        _ => ErrorKind::TransientIo,
    }
}

impl CacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a transport error for a URL
    pub fn transport(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Transport {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidDescriptor(_)
            | Self::ConfigInvalid { .. }
            | Self::InvalidUrl { .. }
            | Self::UnsupportedScheme(_)
            | Self::InvalidChecksum(_)
            | Self::TomlParse(_)
            | Self::TomlSerialize(_) => ErrorKind::Config,
            Self::LockTimeout { .. } => ErrorKind::LockTimeout,
            Self::UnmockedDownload { .. } => ErrorKind::UnmockedDownload,
            Self::BadStatus { code, .. } => status_kind(*code),
            Self::Transport { .. } | Self::ChecksumUnavailable { .. } => ErrorKind::TransientIo,
            Self::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            Self::AuthRequired { .. } => ErrorKind::AuthRequired,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::NoSourceAvailable { failures, .. } => {
                if !failures.is_empty()
                    && failures.iter().all(|f| f.error.kind() == ErrorKind::NotFound)
                {
                    ErrorKind::NotFound
                } else {
                    ErrorKind::NoSource
                }
            }
            Self::ImageSave { .. } => ErrorKind::TransientIo,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io { .. }
            | Self::CommandFailed { .. }
            | Self::Json(_)
            | Self::Internal(_) => ErrorKind::Io,
        }
    }

    /// Exit code for this error
    pub fn exit_code(&self) -> u8 {
        self.kind().exit_code()
    }

    /// Whether the next candidate source should be tried after this error
    pub fn is_failover(&self) -> bool {
        matches!(self.kind(), ErrorKind::TransientIo | ErrorKind::NotFound)
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self.kind() {
            ErrorKind::AuthRequired => {
                Some("Log in to the registry (docker login) or set GOOGLE_OAUTH_ACCESS_TOKEN / GITHUB_TOKEN")
            }
            ErrorKind::LockTimeout => {
                Some("Another process is downloading the same artifact; retry once it finishes")
            }
            ErrorKind::ChecksumMismatch => {
                Some("The upstream artifact may be corrupt; retry later or choose another source")
            }
            ErrorKind::NoSource => Some("Check network connectivity or proxy settings"),
            ErrorKind::UnmockedDownload => Some("Install a download mock in the test"),
            _ => None,
        }
    }
}
