//! Error types for the index-mirror library.

use thiserror::Error;

/// Errors that can occur while crawling or downloading.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A URL could not be parsed.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// The root URL cannot be mirrored.
    #[error("invalid root URL {0}: expected an absolute http(s) URL with a host")]
    InvalidRootUrl(String),

    /// The manifest writer stopped or lost entries.
    #[error("manifest error: {0}")]
    Manifest(String),

    /// Download operation failed.
    #[error("Download failed: {0}")]
    Download(String),

    /// A worker task panicked or was aborted.
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A specialized `Result` type for index-mirror operations.
pub type Result<T> = std::result::Result<T, Error>;
