//! Unified error types for prerender.
//!
//! Display strings carry a stable `CODE: detail` prefix so log lines and
//! API surfaces can match on the code without parsing the detail text.

use chrono::{DateTime, Utc};
use tokio_rusqlite::rusqlite;

/// Classification of a render-worker failure, reported back by the worker.
///
/// The kind decides whether the retry policy applies: `Timeout` and
/// `Crash` are transient, `BadContent` is permanent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderFailureKind {
    /// The render did not finish within the mandatory timeout.
    Timeout,
    /// The browser/worker process died mid-render.
    Crash,
    /// The target produced content that cannot be rendered (permanent).
    BadContent,
    /// Anything else the worker could not classify.
    Other,
}

impl RenderFailureKind {
    /// Whether a failure of this kind is eligible for automatic retry.
    pub fn is_transient(self) -> bool {
        !matches!(self, RenderFailureKind::BadContent)
    }
}

impl std::fmt::Display for RenderFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RenderFailureKind::Timeout => "timeout",
            RenderFailureKind::Crash => "crash",
            RenderFailureKind::BadContent => "bad_content",
            RenderFailureKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Unified error types for the prerender core and engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input cannot be parsed as an absolute URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// SSRF guard rejection - private/internal target not allowed.
    #[error("BLOCKED_TARGET: {0}")]
    BlockedTarget(String),

    /// Sliding-window rate limit exceeded. The attempt was still charged.
    #[error("RATE_LIMITED: {used}/{limit} in window, resets at {reset_at}")]
    RateLimited { limit: u32, used: u32, remaining: u32, reset_at: DateTime<Utc> },

    /// Worker-reported render failure.
    #[error("RENDER_FAILED: {kind}: {message}")]
    RenderFailed { kind: RenderFailureKind, message: String },

    /// Fast tier or object store unreachable.
    #[error("STORAGE_UNAVAILABLE: {0}")]
    StorageUnavailable(String),

    /// Database operation failed.
    #[error("DB_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("DB_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Configuration missing or invalid at construction time.
    #[error("CONFIG_ERROR: {0}")]
    Config(String),
}

impl Error {
    pub fn render_failed(kind: RenderFailureKind, message: impl Into<String>) -> Self {
        Error::RenderFailed { kind, message: message.into() }
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}
