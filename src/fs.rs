//! File system abstraction for testability.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use url::Url;

/// Abstraction over file system operations for testability.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Returns the size of a file if it exists.
    async fn file_size(&self, path: &Path) -> Option<u64>;

    /// Creates all directories in the given path.
    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()>;

    /// Creates (or truncates) a file at the given path for writing.
    async fn create_file(&self, path: &Path) -> std::io::Result<tokio::fs::File>;
}

/// Default file system implementation using `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileSystem;

impl TokioFileSystem {
    /// Creates a new `TokioFileSystem` instance.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for TokioFileSystem {
    async fn file_size(&self, path: &Path) -> Option<u64> {
        tokio::fs::metadata(path)
            .await
            .ok()
            .filter(std::fs::Metadata::is_file)
            .map(|m| m.len())
    }

    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn create_file(&self, path: &Path) -> std::io::Result<tokio::fs::File> {
        tokio::fs::File::create(path).await
    }
}

/// Maps a remote URL onto a path below `root`.
///
/// Each path segment is percent-decoded. Empty, `.` and `..` segments are
/// dropped so the result can never escape `root`. The mapping only depends on
/// the URL path, so the same URL always lands on the same file.
#[must_use]
pub fn mirrored_path(root: &Path, url: &Url) -> PathBuf {
    let mut path = root.to_path_buf();
    for segment in url.path().split('/') {
        let decoded = urlencoding::decode(segment)
            .map_or_else(|_| segment.to_string(), |s| s.into_owned());
        match decoded.as_str() {
            "" | "." | ".." => {}
            // A decoded slash would smuggle in an extra component
            s if s.contains('/') || s.contains('\\') => path.push(s.replace(['/', '\\'], "_")),
            s => path.push(s),
        }
    }
    path
}
