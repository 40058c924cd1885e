//! The manifest: one discovered file URL per line, bridging crawl and download.
//!
//! The writer is an actor that owns the file exclusively; producers only hold
//! cloneable [`ManifestSender`]s. Every line is flushed as soon as it is
//! written so an interrupted crawl still leaves a readable manifest.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::error::{Error, Result};

/// File name of the manifest inside the target directory.
pub const MANIFEST_FILE_NAME: &str = ".crawlstate";

/// Returns the manifest location for a target directory.
#[must_use]
pub fn manifest_path(target_dir: &Path) -> PathBuf {
    target_dir.join(MANIFEST_FILE_NAME)
}

/// What the writer actor persisted before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManifestReport {
    /// Lines written to the manifest.
    pub written: usize,
    /// URLs dropped because they were already written (dedup mode only).
    pub duplicates: usize,
}

/// Owner of the manifest writer actor.
pub struct ManifestWriter {
    sender: ManifestSender,
    task: JoinHandle<Result<ManifestReport>>,
}

/// Cloneable handle used by producers to append URLs.
#[derive(Debug, Clone)]
pub struct ManifestSender {
    tx: mpsc::Sender<Url>,
    enqueued: Arc<AtomicUsize>,
}

impl ManifestWriter {
    /// Truncates (or creates) the manifest at `path` and starts the writer.
    ///
    /// With `dedup` set, a URL that was already written is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub async fn create(path: &Path, capacity: usize, dedup: bool) -> Result<Self> {
        let file = File::create(path).await?;
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(write_lines(BufWriter::new(file), rx, dedup));
        log::debug!("Manifest opened at {}", path.display());

        Ok(Self {
            sender: ManifestSender {
                tx,
                enqueued: Arc::new(AtomicUsize::new(0)),
            },
            task,
        })
    }

    /// Returns a new producer handle.
    #[must_use]
    pub fn sender(&self) -> ManifestSender {
        self.sender.clone()
    }

    /// Closes the manifest once every producer handle has been dropped.
    ///
    /// Waits for the writer to persist everything that was sent, then checks
    /// the writer's count against the number of URLs producers enqueued.
    ///
    /// # Errors
    ///
    /// Returns an error if a write failed or an entry went missing.
    pub async fn finish(self) -> Result<ManifestReport> {
        let Self { sender, task } = self;
        let enqueued = Arc::clone(&sender.enqueued);
        drop(sender);

        let report = task.await??;
        let enqueued = enqueued.load(Ordering::Acquire);
        if report.written + report.duplicates != enqueued {
            return Err(Error::Manifest(format!(
                "{enqueued} URLs enqueued but {} written and {} dropped as duplicates",
                report.written, report.duplicates
            )));
        }
        Ok(report)
    }
}

impl ManifestSender {
    /// Queues a file URL for the manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer has stopped (usually after a write error).
    pub async fn append(&self, url: Url) -> Result<()> {
        self.tx
            .send(url)
            .await
            .map_err(|_| Error::Manifest("manifest writer stopped".to_string()))?;
        self.enqueued.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

async fn write_lines(
    mut writer: BufWriter<File>,
    mut rx: mpsc::Receiver<Url>,
    dedup: bool,
) -> Result<ManifestReport> {
    let mut report = ManifestReport::default();
    let mut seen = HashSet::new();

    while let Some(url) = rx.recv().await {
        if dedup && !seen.insert(url.as_str().to_owned()) {
            log::debug!("Duplicate manifest entry: {url}");
            report.duplicates += 1;
            continue;
        }
        writer.write_all(url.as_str().as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        report.written += 1;
    }

    writer.shutdown().await?;
    Ok(report)
}

/// Sequential reader over a manifest file.
pub struct ManifestReader {
    reader: BufReader<File>,
    line: Vec<u8>,
    line_number: usize,
    malformed: usize,
}

impl ManifestReader {
    /// Opens the manifest at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub async fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).await?;
        Ok(Self {
            reader: BufReader::new(file),
            line: Vec::new(),
            line_number: 0,
            malformed: 0,
        })
    }

    /// Returns the next URL, skipping blank and malformed lines. A line that
    /// is not valid UTF-8 counts as malformed.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the file fails.
    pub async fn next_url(&mut self) -> Result<Option<Url>> {
        loop {
            self.line.clear();
            if self.reader.read_until(b'\n', &mut self.line).await? == 0 {
                return Ok(None);
            }
            self.line_number += 1;
            let Ok(line) = std::str::from_utf8(&self.line) else {
                log::warn!("Skipping manifest line {}: not valid UTF-8", self.line_number);
                self.malformed += 1;
                continue;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match Url::parse(line) {
                Ok(url) => return Ok(Some(url)),
                Err(e) => {
                    log::warn!("Skipping manifest line {}: {e}: {line}", self.line_number);
                    self.malformed += 1;
                }
            }
        }
    }

    /// Number of malformed lines skipped so far.
    #[must_use]
    pub const fn malformed(&self) -> usize {
        self.malformed
    }

    /// Reads every remaining URL.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the file fails.
    pub async fn read_all(mut self) -> Result<Vec<Url>> {
        let mut urls = Vec::new();
        while let Some(url) = self.next_url().await? {
            urls.push(url);
        }
        Ok(urls)
    }
}
