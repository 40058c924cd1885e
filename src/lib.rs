//! index-mirror - mirror an HTTP "Index of" directory tree.
//!
//! A run has two stages. The crawl walks the listing tree from a root URL
//! and records every file URL in a manifest (`.crawlstate` in the target
//! directory). The download then fetches each manifest entry to the matching
//! local path, optionally leaving existing files alone.
//!
//! # Example
//!
//! ```no_run
//! use index_mirror::{AppConfig, Mirror, SkipPolicy};
//!
//! # async fn example() -> index_mirror::Result<()> {
//! let mut config = AppConfig::default().with_target_dir("mirror");
//! config.download = config.download.with_skip_policy(SkipPolicy::SkipIfSameSize);
//!
//! let root = url::Url::parse("https://example.com/pub/")?;
//! let report = Mirror::new(root, config)?.run().await?;
//! println!("{} files, {}", report.crawl.files, report.download);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod counter;
pub mod crawl;
pub mod download;
pub mod error;
pub mod extract;
pub mod format;
pub mod fs;
pub mod manifest;
pub mod mirror;
pub mod progress;
pub mod stats;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(test)]
mod testutil;

// Re-export main types for convenience
pub use config::{AppConfig, CrawlConfig, CrawlErrorPolicy, DownloadConfig, SkipPolicy};
pub use counter::WorkCounter;
pub use crawl::{CrawlSummary, Crawler};
pub use download::{DownloadOutcome, DownloadTask, Downloader};
pub use error::{Error, Result};
pub use extract::{DiscoveredFile, Listing, extract, is_index_listing};
pub use format::{format_bytes, format_duration, format_rate};
pub use fs::{FileSystem, TokioFileSystem, mirrored_path};
pub use manifest::{ManifestReader, ManifestWriter, manifest_path};
pub use mirror::{Mirror, MirrorReport, build_http_client};
pub use progress::{
    DownloadProgress, LogReporter, NoProgress, ProgressAggregator, ProgressLine, ProgressReporter,
};
pub use stats::{FileStats, SessionStats, SessionStatsBuilder};
