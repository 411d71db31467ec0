//! Error types for usage-governor.
//!
//! Quota denials and disabled features are *not* errors: they are reported as
//! a [`Decision`](crate::quota::Decision). Errors here cover misconfiguration
//! (fatal at startup) and storage failures, which the governor and cache log
//! and swallow rather than propagate.

use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum GovernorError {
    /// Invalid configuration, e.g. a zero limit. Surfaced at construction.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem failure while reading or writing a persisted document.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted document could not be encoded or decoded.
    #[error("storage encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// The config file is not valid TOML.
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Atomic replace (temp file rename) failed.
    #[error("failed to persist {path}: {source}")]
    Persist {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GovernorError>;
