//! Configuration types for crawl and download operations.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Rule deciding whether an existing local file stands in for the remote one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipPolicy {
    /// Always fetch and overwrite.
    #[default]
    None,
    /// Skip without any request when a non-empty local file exists.
    SkipIfNonzero,
    /// Fetch, then skip writing when the local size equals the remote
    /// content length.
    SkipIfSameSize,
}

impl fmt::Display for SkipPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::SkipIfNonzero => "skip-if-nonzero",
            Self::SkipIfSameSize => "skip-if-same-size",
        })
    }
}

impl FromStr for SkipPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "skip-if-nonzero" => Ok(Self::SkipIfNonzero),
            "skip-if-same-size" => Ok(Self::SkipIfSameSize),
            other => Err(format!(
                "unknown skip policy '{other}' (expected none, skip-if-nonzero or skip-if-same-size)"
            )),
        }
    }
}

/// What the crawler does when fetching a directory fails at the transport level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CrawlErrorPolicy {
    /// Fail the whole crawl on the first transport error.
    #[default]
    Abort,
    /// Log the error and treat the directory as empty.
    Skip,
}

impl fmt::Display for CrawlErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Abort => "abort",
            Self::Skip => "skip",
        })
    }
}

impl FromStr for CrawlErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "abort" => Ok(Self::Abort),
            "skip" => Ok(Self::Skip),
            other => Err(format!(
                "unknown crawl error policy '{other}' (expected abort or skip)"
            )),
        }
    }
}

/// Configuration for the index crawl.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Number of concurrent index fetch workers.
    pub workers: usize,
    /// Capacity of the pending directory queue.
    pub queue_capacity: usize,
    /// Capacity of the channel feeding the manifest writer.
    pub manifest_capacity: usize,
    /// Behaviour on a transport error while fetching a directory.
    pub on_error: CrawlErrorPolicy,
    /// Drop file URLs already written to the manifest in this run.
    pub dedup: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            workers: 32,
            queue_capacity: 102_400,
            manifest_capacity: 10_240,
            on_error: CrawlErrorPolicy::Abort,
            dedup: false,
        }
    }
}

impl CrawlConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of crawl workers.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the transport error policy.
    #[must_use]
    pub const fn with_on_error(mut self, policy: CrawlErrorPolicy) -> Self {
        self.on_error = policy;
        self
    }

    /// Sets whether duplicate file URLs are dropped from the manifest.
    #[must_use]
    pub const fn with_dedup(mut self, dedup: bool) -> Self {
        self.dedup = dedup;
        self
    }
}

/// Configuration for download operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Number of concurrent file downloads.
    pub workers: usize,
    /// How existing local files are treated.
    pub skip_policy: SkipPolicy,
    /// Capacity of the queue feeding the download workers.
    pub queue_capacity: usize,
    /// Interval between progress lines, in milliseconds.
    pub progress_interval_ms: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            skip_policy: SkipPolicy::None,
            queue_capacity: 10_240,
            progress_interval_ms: 1000,
        }
    }
}

impl DownloadConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of concurrent file downloads.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the skip-existing policy.
    #[must_use]
    pub const fn with_skip_policy(mut self, policy: SkipPolicy) -> Self {
        self.skip_policy = policy;
        self
    }

    /// Sets the progress reporting interval.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Returns the progress reporting interval, never shorter than 1ms.
    #[must_use]
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory the remote tree is mirrored into.
    pub target_dir: PathBuf,
    /// Crawl configuration.
    pub crawl: CrawlConfig,
    /// Download configuration.
    pub download: DownloadConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            target_dir: PathBuf::from("out"),
            crawl: CrawlConfig::default(),
            download: DownloadConfig::default(),
        }
    }
}

impl AppConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the target directory.
    #[must_use]
    pub fn with_target_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.target_dir = dir.into();
        self
    }

    /// Returns the default config file location, if the platform has one.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("index-mirror").join("config.toml"))
    }

    /// Loads configuration from a TOML file.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// used when present and the built-in defaults otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };
        let contents = std::fs::read_to_string(&path)?;
        let config = toml::from_str(&contents)?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }
}
