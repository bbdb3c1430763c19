//! Top-level error types for Babelhook.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Translation engine errors. All of these degrade to "keep the original
/// text" at the adapter boundary; they never abort a relay.
#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("translation request failed: {0}")]
    Request(String),

    #[error("translation engine returned HTTP {status}")]
    BadStatus { status: u16 },

    #[error("translation engine response missing content")]
    EmptyResponse,

    #[error("translation timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

/// Errors from the Discord platform boundary, classified so callers can
/// pick a recovery path per error kind.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("platform transport error: {0}")]
    Transport(String),
}

/// Relay pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to extract message content: {0}")]
    Extraction(String),

    #[error("impersonation webhook unavailable for channel {channel_id}: {source}")]
    ImpersonationUnavailable {
        channel_id: u64,
        source: PlatformError,
    },

    #[error("failed to delete original message {message_id}: {source}")]
    DeleteFailed {
        message_id: u64,
        source: PlatformError,
    },

    #[error("failed to send relayed message to channel {channel_id}: {source}")]
    SendFailed {
        channel_id: u64,
        source: PlatformError,
    },
}
