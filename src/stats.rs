//! Download statistics types.

use std::fmt;
use std::time::{Duration, Instant};

use crate::format::{format_bytes, format_duration, format_rate};

/// Statistics for a single file download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStats {
    /// Bytes written to disk.
    pub size: u64,
    /// Time taken from first byte request to last byte written.
    pub elapsed: Duration,
    /// Average download speed in bytes per second.
    pub average_speed: u64,
}

impl FileStats {
    /// Creates file statistics, deriving the average speed.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn new(size: u64, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let average_speed = if secs > 0.0 {
            (size as f64 / secs) as u64
        } else {
            0
        };
        Self {
            size,
            elapsed,
            average_speed,
        }
    }
}

/// Statistics for an entire download session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// Number of files successfully downloaded.
    pub files_downloaded: usize,
    /// Number of files skipped because a local copy already exists.
    pub files_skipped: usize,
    /// Number of files that failed to download.
    pub files_failed: usize,
    /// Total bytes downloaded.
    pub total_bytes: u64,
    /// Total elapsed time for the session.
    pub elapsed: Duration,
    /// Peak aggregate download speed in bytes per second.
    pub peak_speed: u64,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStats {
    /// Creates a new empty session stats.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            files_downloaded: 0,
            files_skipped: 0,
            files_failed: 0,
            total_bytes: 0,
            elapsed: Duration::ZERO,
            peak_speed: 0,
        }
    }

    /// Number of manifest entries processed, whatever their outcome.
    #[must_use]
    pub const fn files_processed(&self) -> usize {
        self.files_downloaded + self.files_skipped + self.files_failed
    }

    /// Returns true if no task failed.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.files_failed == 0
    }

    /// Returns the average download speed in bytes per second.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn average_speed(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.total_bytes as f64 / secs) as u64
        } else {
            0
        }
    }
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} downloaded, {} skipped, {} failed; {} in {} ({} avg, {} peak)",
            self.files_downloaded,
            self.files_skipped,
            self.files_failed,
            format_bytes(self.total_bytes),
            format_duration(self.elapsed),
            format_rate(self.average_speed()),
            format_rate(self.peak_speed),
        )
    }
}

/// Builder for accumulating session statistics during downloads.
///
/// Each download worker keeps its own builder; the coordinator merges them
/// once the workers have exited.
#[derive(Debug)]
pub struct SessionStatsBuilder {
    files_downloaded: usize,
    files_skipped: usize,
    files_failed: usize,
    total_bytes: u64,
    start_time: Instant,
    peak_speed: u64,
}

impl Default for SessionStatsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStatsBuilder {
    /// Creates a new session stats builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            files_downloaded: 0,
            files_skipped: 0,
            files_failed: 0,
            total_bytes: 0,
            start_time: Instant::now(),
            peak_speed: 0,
        }
    }

    /// Sets the peak speed observed.
    pub const fn set_peak_speed(&mut self, speed: u64) {
        self.peak_speed = speed;
    }

    /// Records a completed file download.
    pub const fn add_download(&mut self, file_stats: &FileStats) {
        self.files_downloaded += 1;
        self.total_bytes += file_stats.size;
    }

    /// Records a skipped file.
    pub const fn add_skipped(&mut self) {
        self.files_skipped += 1;
    }

    /// Records a failed file.
    pub const fn add_failed(&mut self) {
        self.files_failed += 1;
    }

    /// Folds another builder's counts into this one.
    pub fn merge(&mut self, other: &Self) {
        self.files_downloaded += other.files_downloaded;
        self.files_skipped += other.files_skipped;
        self.files_failed += other.files_failed;
        self.total_bytes += other.total_bytes;
        self.peak_speed = self.peak_speed.max(other.peak_speed);
    }

    /// Builds the final session statistics.
    #[must_use]
    pub fn build(self) -> SessionStats {
        SessionStats {
            files_downloaded: self.files_downloaded,
            files_skipped: self.files_skipped,
            files_failed: self.files_failed,
            total_bytes: self.total_bytes,
            elapsed: self.start_time.elapsed(),
            peak_speed: self.peak_speed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_stats_default() {
        let stats = SessionStats::default();
        assert_eq!(stats.files_processed(), 0);
        assert_eq!(stats.total_bytes, 0);
        assert!(stats.is_complete());
    }

    #[test]
    fn file_stats_average_speed() {
        assert_eq!(FileStats::new(1000, Duration::from_secs(2)).average_speed, 500);
        assert_eq!(FileStats::new(1000, Duration::ZERO).average_speed, 0);
    }

    #[test]
    fn session_stats_average_speed() {
        let stats = SessionStats {
            total_bytes: 1000,
            elapsed: Duration::from_secs(2),
            ..SessionStats::new()
        };
        assert_eq!(stats.average_speed(), 500);
        assert_eq!(SessionStats::new().average_speed(), 0);
    }

    #[test]
    fn builder_merges_worker_tallies() {
        let mut first = SessionStatsBuilder::new();
        first.add_download(&FileStats::new(500, Duration::from_secs(1)));
        first.add_skipped();

        let mut second = SessionStatsBuilder::new();
        second.add_download(&FileStats::new(250, Duration::from_secs(1)));
        second.add_failed();
        second.set_peak_speed(800);

        let mut total = SessionStatsBuilder::new();
        total.merge(&first);
        total.merge(&second);
        let stats = total.build();

        assert_eq!(stats.files_downloaded, 2);
        assert_eq!(stats.files_skipped, 1);
        assert_eq!(stats.files_failed, 1);
        assert_eq!(stats.files_processed(), 4);
        assert_eq!(stats.total_bytes, 750);
        assert_eq!(stats.peak_speed, 800);
        assert!(!stats.is_complete());
    }

    #[test]
    fn display_summarises_counts() {
        let stats = SessionStats {
            files_downloaded: 3,
            files_skipped: 1,
            files_failed: 0,
            total_bytes: 2048,
            elapsed: Duration::from_secs(2),
            peak_speed: 4096,
        };
        assert_eq!(
            stats.to_string(),
            "3 downloaded, 1 skipped, 0 failed; 2.00 KB in 2.0s (1.00 KB/s avg, 4.00 KB/s peak)"
        );
    }
}
