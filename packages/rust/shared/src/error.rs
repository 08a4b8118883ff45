//! Error types for csrledger.
//!
//! Library crates use [`LedgerError`] via `thiserror`.
//! Retrieval strategies report transient failures as [`RetrievalFault`],
//! which never aborts an entity's run. The CLI wraps everything with
//! `color-eyre`.

use std::path::PathBuf;

/// Top-level error type for all csrledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A persistence backend could not be reached. Fatal at startup.
    #[error("cannot reach {backend}: {message}")]
    Connection { backend: String, message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Network/HTTP error outside of a retrieval strategy (e.g. archive download).
    #[error("network error: {0}")]
    Network(String),

    /// JSON or record decoding error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad year key, malformed record, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LedgerError>;

impl LedgerError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a connection error for the named backend.
    pub fn connection(backend: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Connection {
            backend: backend.into(),
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A retrieval strategy call that failed without answering.
///
/// Faults mean "try again on the next scheduled run"; they are never
/// written into a year-map as a confirmed absence.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetrievalFault {
    /// Transport-level failure (DNS, timeout, connection reset).
    #[error("network fault: {0}")]
    Network(String),

    /// The remote answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// The strategy's quota is spent for today.
    #[error("quota exhausted for {strategy}")]
    QuotaExhausted { strategy: String },

    /// The remote answered but the body could not be understood.
    #[error("unreadable response: {0}")]
    Parse(String),

    /// The strategy is missing credentials or settings.
    #[error("strategy misconfigured: {0}")]
    Misconfigured(String),
}

impl RetrievalFault {
    /// Faults that are part of normal operation and should not be logged
    /// as failures (quota exhaustion).
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::QuotaExhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = LedgerError::config("missing database path");
        assert_eq!(err.to_string(), "config error: missing database path");

        let err = LedgerError::connection("ledger", "no such file");
        assert_eq!(err.to_string(), "cannot reach ledger: no such file");
    }

    #[test]
    fn quota_fault_is_expected() {
        let quota = RetrievalFault::QuotaExhausted {
            strategy: "search-api".into(),
        };
        assert!(quota.is_expected());
        assert!(!RetrievalFault::Network("reset".into()).is_expected());
        assert_eq!(
            RetrievalFault::Http {
                status: 500,
                url: "https://example.com".into()
            }
            .to_string(),
            "HTTP 500 from https://example.com"
        );
    }
}
