//! WolfSync Error Types

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for WolfSync operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfSync error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Unable to determine hostname: {0}")]
    Hostname(String),

    // Local tree errors
    #[error("Failed to crawl {root:?}: {source}")]
    Crawl {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Invalid relative path: {0}")]
    InvalidPath(String),

    // Shared storage errors
    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Staging area changed while scanning {path:?}: {source}")]
    StagingChanged {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Staging lock mismatch: {0}")]
    LockMismatch(String),

    // Pass errors
    #[error("Instances failed: {}", .0.join(", "))]
    InstancesFailed(Vec<String>),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is expected to clear on a later pass, once the
    /// sync service has finished propagating the shared folder
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::StagingChanged { .. } | Error::LockMismatch(_))
    }
}
