//! Crate-wide error types, the stable error-kind taxonomy, and `Result` alias.

// std
use std::time::Duration;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error classification surfaced to the tool layer.
///
/// The string form of each kind is part of the crate's public contract and
/// never changes between releases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ErrorKind {
    ConfigInvalid,
    UnknownSite,
    UnknownOperation,
    ParamInvalid,
    AuthRequired,
    AuthExpired,
    AuthRefreshFailed,
    AuthMethodUnsupported,
    RateLimited,
    UpstreamRateLimited,
    UpstreamUnavailable,
    UpstreamClient,
    TransportError,
    Timeout,
    Cancelled,
    CacheCorruption,
    InvalidationFailed,
}
impl ErrorKind {
    /// Stable string form of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigInvalid => "ConfigInvalid",
            Self::UnknownSite => "UnknownSite",
            Self::UnknownOperation => "UnknownOperation",
            Self::ParamInvalid => "ParamInvalid",
            Self::AuthRequired => "AuthRequired",
            Self::AuthExpired => "AuthExpired",
            Self::AuthRefreshFailed => "AuthRefreshFailed",
            Self::AuthMethodUnsupported => "AuthMethodUnsupported",
            Self::RateLimited => "RateLimited",
            Self::UpstreamRateLimited => "UpstreamRateLimited",
            Self::UpstreamUnavailable => "UpstreamUnavailable",
            Self::UpstreamClient => "UpstreamClient",
            Self::TransportError => "TransportError",
            Self::Timeout => "Timeout",
            Self::Cancelled => "Cancelled",
            Self::CacheCorruption => "CacheCorruption",
            Self::InvalidationFailed => "InvalidationFailed",
        }
    }
}
impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the WordPress client core.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] http::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error("Invalid configuration for {field}: {reason}")]
    Config { field: &'static str, reason: String },
    #[error("Unknown site '{site}'.")]
    UnknownSite { site: String },
    #[error("Unknown operation '{name}'.")]
    UnknownOperation { name: String },
    #[error("Invalid parameter '{param}' for {operation}: {reason}")]
    Param {
        operation: &'static str,
        param: String,
        reason: String,
    },

    #[error("Authentication required: {0}")]
    AuthRequired(String),
    #[error("Authentication expired; refresh and retry did not recover.")]
    AuthExpired,
    #[error("Credential refresh failed: {0}")]
    AuthRefreshFailed(String),
    #[error("The configured auth method does not support {0}.")]
    AuthMethodUnsupported(&'static str),

    #[error("Local rate budget exhausted for site '{site}'.")]
    RateLimited { site: String },
    #[error("Upstream rate limited (429).")]
    UpstreamRateLimited { retry_after: Option<Duration> },
    #[error("Upstream unavailable: HTTP {status} after {attempts} attempt(s).")]
    UpstreamUnavailable {
        status: u16,
        attempts: u32,
        excerpt: Option<String>,
    },
    #[error("Upstream rejected the request with HTTP {status}.")]
    UpstreamClient {
        status: u16,
        excerpt: Option<String>,
    },

    #[error("Transport failure: {0}")]
    Transport(String),
    #[error("Deadline exceeded.")]
    Timeout,
    #[error("Operation cancelled.")]
    Cancelled,

    #[error("Cached entry for '{key}' could not be decoded.")]
    CacheCorruption { key: String },
    #[error("Cache invalidation failed: {0}")]
    InvalidationFailed(String),
}
impl Error {
    /// Classify the error into its stable [`ErrorKind`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::Transport(_) => ErrorKind::TransportError,
            Self::Http(_) | Self::Url(_) => ErrorKind::ConfigInvalid,
            Self::Reqwest(err) => {
                if err.is_timeout() {
                    ErrorKind::Timeout
                } else {
                    ErrorKind::TransportError
                }
            }
            Self::Serde(_) => ErrorKind::UpstreamClient,
            Self::Config { .. } => ErrorKind::ConfigInvalid,
            Self::UnknownSite { .. } => ErrorKind::UnknownSite,
            Self::UnknownOperation { .. } => ErrorKind::UnknownOperation,
            Self::Param { .. } => ErrorKind::ParamInvalid,
            Self::AuthRequired(_) => ErrorKind::AuthRequired,
            Self::AuthExpired => ErrorKind::AuthExpired,
            Self::AuthRefreshFailed(_) => ErrorKind::AuthRefreshFailed,
            Self::AuthMethodUnsupported(_) => ErrorKind::AuthMethodUnsupported,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::UpstreamRateLimited { .. } => ErrorKind::UpstreamRateLimited,
            Self::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            Self::UpstreamClient { .. } => ErrorKind::UpstreamClient,
            Self::Timeout => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::CacheCorruption { .. } => ErrorKind::CacheCorruption,
            Self::InvalidationFailed(_) => ErrorKind::InvalidationFailed,
        }
    }

    /// Whether another attempt of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransportError
                | ErrorKind::Timeout
                | ErrorKind::UpstreamRateLimited
                | ErrorKind::UpstreamUnavailable
        )
    }
}
