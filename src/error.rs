//! Error types for the Tankobon reader core.
//!
//! Uses `thiserror` for structured error definitions that provide
//! clear context about what went wrong.

use thiserror::Error;

/// Fatal errors raised while resolving a chapter catalogue.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The local authoritative source could not be queried.
    #[error("Content unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),
}

/// Failure reported by the local authoritative chapter source.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Failed to read the backing library
    #[error("Failed to read library: {0}")]
    Io(#[from] std::io::Error),

    /// Library contents could not be parsed
    #[error("Failed to parse library: {0}")]
    Parse(#[from] serde_json::Error),

    /// The requested content item does not exist
    #[error("Content not found: {0}")]
    NotFound(String),
}

/// A remote batch failed; resolution continues with what was already collected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Remote fetch failed at offset {offset} after {batches} batches")]
pub struct RemoteFetchFailed {
    /// Offset of the batch that failed.
    pub offset: usize,
    /// Number of batches that completed before the failure.
    pub batches: usize,
}

/// Error type for persistent key-value storage.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Reading or writing the backing medium failed
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be serialized or deserialized
    #[error("Failed to encode record: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The key cannot be mapped onto the backing medium
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
}

/// Error type for configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Invalid configuration value
    #[error("Invalid config value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Config directory not found
    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// A single page asset failed to preload. Never fatal to the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreloadError {
    /// The image loader reported a failure
    #[error("Failed to load {reference}: {message}")]
    LoadFailed { reference: String, message: String },
}

/// Result type alias using anyhow for application-level error handling.
pub type Result<T> = anyhow::Result<T>;
