//! Error types for realty-watch.

use std::time::Duration;

use crate::session::SessionState;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),
}

/// Configuration-related errors. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Category of a failure reported by the messaging platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformErrorKind {
    /// The transport was reset underneath an established session.
    ConnectionReset,
    /// A previously authenticated session lost its authentication.
    AuthLost,
    /// The platform session timed out.
    SessionTimeout,
    /// Credentials or pairing were rejected outright.
    AuthRejected,
    /// The platform (or its bridge) could not be reached.
    Unavailable,
    /// The platform refused or failed a single request.
    RequestFailed,
    /// The platform answered with something we could not parse.
    InvalidResponse,
}

impl PlatformErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionReset => "ECONNRESET",
            Self::AuthLost => "UNAUTHENTICATED",
            Self::SessionTimeout => "SESSION_TIMEOUT",
            Self::AuthRejected => "AUTH_REJECTED",
            Self::Unavailable => "UNAVAILABLE",
            Self::RequestFailed => "REQUEST_FAILED",
            Self::InvalidResponse => "INVALID_RESPONSE",
        }
    }
}

impl std::fmt::Display for PlatformErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported by a `PlatformClient`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct PlatformError {
    pub kind: PlatformErrorKind,
    pub message: String,
}

impl PlatformError {
    pub fn new(kind: PlatformErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Critical errors warrant one autonomous reconnect attempt.
    pub fn is_critical(&self) -> bool {
        matches!(
            self.kind,
            PlatformErrorKind::ConnectionReset
                | PlatformErrorKind::AuthLost
                | PlatformErrorKind::SessionTimeout
        )
    }

    /// Authentication rejections are never retried.
    pub fn is_auth_rejection(&self) -> bool {
        self.kind == PlatformErrorKind::AuthRejected
    }
}

/// Session lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Connection failed after {attempts} attempt(s): {source}")]
    Connection {
        attempts: u32,
        #[source]
        source: PlatformError,
    },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Client not ready (session is {state})")]
    NotReady { state: SessionState },

    #[error("Session is in a fatal state and requires a restart: {reason}")]
    Fatal { reason: String },

    #[error("Platform request failed: {0}")]
    Platform(#[from] PlatformError),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Signal classification errors.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Invalid keyword pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Classification engine failed: {0}")]
    Engine(#[from] LlmError),

    #[error("Unparseable classification: {0}")]
    InvalidResponse(String),
}

/// Per-message processing errors. Isolated to the message that raised them.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Classification failed: {0}")]
    Classification(#[from] ClassifierError),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] DatabaseError),
}

/// Scan errors. Abort the current scan only.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Scan unavailable: {0}")]
    Session(#[from] SessionError),

    #[error("Platform failure during scan: {0}")]
    Platform(#[from] PlatformError),

    #[error("Persistence failure during scan: {0}")]
    Persistence(#[from] DatabaseError),
}

impl ScanError {
    /// The platform error behind this scan failure, if any.
    pub fn platform_error(&self) -> Option<&PlatformError> {
        match self {
            Self::Platform(e) => Some(e),
            Self::Session(SessionError::Platform(e)) => Some(e),
            _ => None,
        }
    }
}
