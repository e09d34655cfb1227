//! Error types for binlog pipeline operations
//!
//! Classified so the scheduler can decide what is fatal (source open,
//! invalid patterns, bad configuration) versus recoverable (decode
//! failures, handler errors, transient reads).

use thiserror::Error;

/// Errors surfaced by the pipeline and its components.
#[derive(Error, Debug)]
pub enum Error {
    /// Cannot start reading the source (path, credentials, position).
    #[error("failed to open source: {0}")]
    SourceOpen(String),

    /// Transient mid-stream read failure.
    #[error("source read error: {0}")]
    SourceRead(String),

    /// A single malformed event. Dropped and counted, never fatal.
    #[error("decode error: {0}")]
    Decode(String),

    /// Range-pattern compilation failure. Configuration-time only.
    #[error("invalid pattern {pattern:?}: {reason}")]
    Pattern { pattern: String, reason: String },

    /// Catalog query failed. Callers fall back to placeholder names.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Handler reported a failure. Logged, never fatal.
    #[error("handler {name}: {reason}")]
    Handler { name: String, reason: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Checkpoint load/save failure.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn source_open(msg: impl Into<String>) -> Self {
        Self::SourceOpen(msg.into())
    }

    pub fn source_read(msg: impl Into<String>) -> Self {
        Self::SourceRead(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    pub fn handler(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Handler {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    /// Fatal errors abort the pipeline before or during startup; everything
    /// else is logged and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SourceOpen(_) | Self::Pattern { .. } | Self::Config(_)
        )
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::source_open("no such file");
        assert!(err.to_string().contains("failed to open source"));
        assert!(err.to_string().contains("no such file"));

        let err = Error::Pattern {
            pattern: "[1-".to_string(),
            reason: "missing closing ']'".to_string(),
        };
        assert!(err.to_string().contains("[1-"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::source_open("x").is_fatal());
        assert!(Error::config("x").is_fatal());
        assert!(Error::Pattern {
            pattern: "x".into(),
            reason: "y".into()
        }
        .is_fatal());

        assert!(!Error::decode("bad event").is_fatal());
        assert!(!Error::handler("stats", "boom").is_fatal());
        assert!(!Error::source_read("reset").is_fatal());
        assert!(!Error::catalog("timeout").is_fatal());
    }
}
