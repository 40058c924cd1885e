//! Download stage: streams every manifest entry to its mirrored local path.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::time::Instant;

use futures::TryStreamExt;
use tokio::io::{AsyncRead, AsyncWriteExt, BufWriter, ReadBuf};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::io::StreamReader;
use url::Url;

use crate::config::{DownloadConfig, SkipPolicy};
use crate::counter::WorkCounter;
use crate::error::{Error, Result};
use crate::format::{format_bytes, format_duration};
use crate::fs::{FileSystem, TokioFileSystem, mirrored_path};
use crate::manifest::ManifestReader;
use crate::progress::{DownloadProgress, LogReporter, ProgressAggregator, ProgressReporter};
use crate::stats::{FileStats, SessionStats, SessionStatsBuilder};

/// A file to be downloaded with its destination path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    /// Remote file URL.
    pub url: Url,
    /// Local file path where the file will be saved.
    pub local_path: PathBuf,
}

impl DownloadTask {
    /// Creates a task whose local path mirrors the URL path below `target_dir`.
    #[must_use]
    pub fn new(url: Url, target_dir: &Path) -> Self {
        let local_path = mirrored_path(target_dir, &url);
        Self { url, local_path }
    }
}

/// Result of a task that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// An existing local file was kept.
    Skipped,
    /// The remote body was written to disk.
    Downloaded(FileStats),
}

/// Pass-through reader that reports how many bytes flow through it.
struct CountingReader<R, F> {
    inner: R,
    on_read: F,
}

impl<R, F> CountingReader<R, F> {
    const fn new(inner: R, on_read: F) -> Self {
        Self { inner, on_read }
    }
}

impl<R, F> AsyncRead for CountingReader<R, F>
where
    R: AsyncRead + Unpin,
    F: FnMut(u64) + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let read = (buf.filled().len() - before) as u64;
        if read > 0 {
            (this.on_read)(read);
        }
        Poll::Ready(Ok(()))
    }
}

/// Downloads manifest entries into a target directory.
pub struct Downloader<F: FileSystem = TokioFileSystem> {
    client: reqwest::Client,
    config: DownloadConfig,
    target_dir: PathBuf,
    fs: F,
}

impl Downloader<TokioFileSystem> {
    /// Creates a new downloader with the default file system.
    #[must_use]
    pub fn new(client: reqwest::Client, config: DownloadConfig, target_dir: impl Into<PathBuf>) -> Self {
        Self::with_fs(client, config, target_dir, TokioFileSystem)
    }
}

impl<F: FileSystem + 'static> Downloader<F> {
    /// Creates a new downloader with a custom file system implementation.
    #[must_use]
    pub fn with_fs(
        client: reqwest::Client,
        config: DownloadConfig,
        target_dir: impl Into<PathBuf>,
        fs: F,
    ) -> Self {
        Self {
            client,
            config,
            target_dir: target_dir.into(),
            fs,
        }
    }

    /// Returns a reference to the download configuration.
    #[must_use]
    pub const fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Returns the directory files are mirrored into.
    #[must_use]
    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Ensures the parent directory exists for a file path.
    async fn ensure_parent_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.fs.create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Downloads a single file, honouring the skip policy.
    ///
    /// Reports the file's size once it is known and every chunk of body
    /// received. Does not report `on_item_finished`; that is the caller's job.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the server answers with a
    /// non-success status, or the local file cannot be written.
    pub async fn download(
        &self,
        task: &DownloadTask,
        progress: &dyn DownloadProgress,
    ) -> Result<DownloadOutcome> {
        let path = &task.local_path;

        if self.config.skip_policy == SkipPolicy::SkipIfNonzero
            && self.fs.file_size(path).await.is_some_and(|size| size > 0)
        {
            log::debug!("File exists: {}", task.url.path());
            return Ok(DownloadOutcome::Skipped);
        }

        let started = Instant::now();
        let response = self
            .client
            .get(task.url.clone())
            .send()
            .await?
            .error_for_status()?;
        let remote_size = response.content_length();

        if self.config.skip_policy == SkipPolicy::SkipIfSameSize {
            if let Some(remote_size) = remote_size {
                if self.fs.file_size(path).await == Some(remote_size) {
                    log::debug!(
                        "File exists with same size ({}): {}",
                        format_bytes(remote_size),
                        task.url.path()
                    );
                    return Ok(DownloadOutcome::Skipped);
                }
            }
        }

        if let Some(size) = remote_size {
            progress.on_size_known(size);
        }

        self.ensure_parent_dir(path).await?;
        let file = self.fs.create_file(path).await?;
        let mut writer = BufWriter::new(file);

        let body = StreamReader::new(Box::pin(response.bytes_stream().map_err(io::Error::other)));
        let mut reader = CountingReader::new(body, |n| progress.on_bytes(n));
        let written = tokio::io::copy(&mut reader, &mut writer).await?;
        writer.flush().await?;

        if remote_size.is_none() {
            progress.on_size_known(written);
        }

        let stats = FileStats::new(written, started.elapsed());
        log::debug!(
            "Downloaded: {} ({} in {})",
            task.url.path(),
            format_bytes(stats.size),
            format_duration(stats.elapsed)
        );
        Ok(DownloadOutcome::Downloaded(stats))
    }

    /// Downloads every URL in the manifest at `manifest`.
    ///
    /// Progress lines go to the `log` facade.
    ///
    /// # Errors
    ///
    /// Individual file failures are logged and counted, never returned.
    /// Returns an error only if the manifest cannot be read or a worker panics.
    pub async fn download_manifest(self: Arc<Self>, manifest: &Path) -> Result<SessionStats> {
        self.download_manifest_with(manifest, Arc::new(LogReporter))
            .await
    }

    /// Like [`download_manifest`](Self::download_manifest), reporting
    /// progress lines to `reporter`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the manifest cannot be read or a worker panics.
    pub async fn download_manifest_with(
        self: Arc<Self>,
        manifest: &Path,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<SessionStats> {
        let mut reader = ManifestReader::open(manifest).await?;
        let aggregator = ProgressAggregator::spawn(self.config.progress_interval(), reporter);
        let progress = aggregator.handle();

        let (tx, rx) = mpsc::channel::<DownloadTask>(self.config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let outstanding = WorkCounter::new();

        let mut workers = JoinSet::new();
        for id in 0..self.config.workers.max(1) {
            let downloader = Arc::clone(&self);
            let rx = Arc::clone(&rx);
            let outstanding = outstanding.clone();
            let progress = progress.clone();
            workers.spawn(async move {
                let mut tally = SessionStatsBuilder::new();
                loop {
                    // Release the queue lock before doing the work
                    let next = rx.lock().await.recv().await;
                    let Some(task) = next else { break };

                    match downloader.download(&task, &progress).await {
                        Ok(DownloadOutcome::Skipped) => tally.add_skipped(),
                        Ok(DownloadOutcome::Downloaded(stats)) => tally.add_download(&stats),
                        Err(e) => {
                            log::error!("[worker {id}] {}: {e}", task.url);
                            tally.add_failed();
                        }
                    }
                    progress.on_item_finished();
                    outstanding.done();
                }
                tally
            });
        }

        let mut queued = 0usize;
        let mut stalled = false;
        while let Some(url) = reader.next_url().await? {
            let task = DownloadTask::new(url, &self.target_dir);
            outstanding.add(1);
            progress.on_item_queued();
            if tx.send(task).await.is_err() {
                outstanding.done();
                stalled = true;
                break;
            }
            queued += 1;
        }
        log::info!("Queued {queued} file(s) for download");
        if reader.malformed() > 0 {
            log::warn!("Skipped {} malformed manifest line(s)", reader.malformed());
        }

        outstanding.wait_zero().await;
        drop(tx);

        let mut builder = SessionStatsBuilder::new();
        while let Some(joined) = workers.join_next().await {
            builder.merge(&joined?);
        }
        if stalled {
            return Err(Error::Download(
                "download workers exited before the manifest was queued".to_string(),
            ));
        }

        let summary = aggregator.shutdown().await?;
        builder.set_peak_speed(summary.peak_rate);
        Ok(builder.build())
    }
}
