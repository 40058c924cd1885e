//! Crawl stage: walks the listing tree and records every file in the manifest.
//!
//! A fixed pool of workers shares one pending-target queue. A
//! [`WorkCounter`] tracks targets that are queued or being fetched, and the
//! crawl is over once it drains to zero.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{CrawlConfig, CrawlErrorPolicy};
use crate::counter::WorkCounter;
use crate::error::Result;
use crate::extract::{self, DiscoveredFile};
use crate::fs::{FileSystem, TokioFileSystem, mirrored_path};
use crate::manifest::{ManifestSender, ManifestWriter};

/// What a crawl found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    /// Targets that were index listings.
    pub listings: usize,
    /// Targets that were not listings, answered with an error status, or
    /// failed under [`CrawlErrorPolicy::Skip`].
    pub leaves: usize,
    /// File URLs written to the manifest.
    pub files: usize,
    /// File URLs dropped as duplicates.
    pub duplicates: usize,
}

impl CrawlSummary {
    fn merge(&mut self, other: &Self) {
        self.listings += other.listings;
        self.leaves += other.leaves;
        self.files += other.files;
        self.duplicates += other.duplicates;
    }
}

/// Result of fetching one target.
enum Visit {
    Listing {
        directories: Vec<Url>,
        files: Vec<DiscoveredFile>,
    },
    Leaf,
}

/// Pending crawl targets, shared by every worker.
struct CrawlQueue {
    tx: mpsc::Sender<Url>,
    rx: Mutex<mpsc::Receiver<Url>>,
    outstanding: WorkCounter,
    closed: CancellationToken,
}

impl CrawlQueue {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
            outstanding: WorkCounter::new(),
            closed: CancellationToken::new(),
        }
    }

    /// Counts `target` as outstanding, then queues it without blocking.
    fn push(&self, target: Url) {
        self.outstanding.add(1);
        match self.tx.try_send(target) {
            Ok(()) => {}
            Err(TrySendError::Full(target)) => {
                // Every worker could be blocked here at once; hand the send off
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(target).await;
                });
            }
            Err(TrySendError::Closed(_)) => self.outstanding.done(),
        }
    }

    /// Next target, or `None` once the queue is closed.
    async fn pop(&self) -> Option<Url> {
        let mut rx = tokio::select! {
            biased;
            () = self.closed.cancelled() => return None,
            rx = self.rx.lock() => rx,
        };
        tokio::select! {
            biased;
            () = self.closed.cancelled() => None,
            target = rx.recv() => target,
        }
    }

    fn done(&self) {
        self.outstanding.done();
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

/// Recursive crawler over "Index of" listings.
pub struct Crawler<F: FileSystem = TokioFileSystem> {
    client: reqwest::Client,
    config: CrawlConfig,
    target_dir: PathBuf,
    fs: F,
}

impl Crawler<TokioFileSystem> {
    /// Creates a crawler that mirrors directories below `target_dir`.
    #[must_use]
    pub fn new(client: reqwest::Client, config: CrawlConfig, target_dir: impl Into<PathBuf>) -> Self {
        Self::with_fs(client, config, target_dir, TokioFileSystem)
    }
}

impl<F: FileSystem + 'static> Crawler<F> {
    /// Creates a crawler with a custom file system implementation.
    #[must_use]
    pub fn with_fs(
        client: reqwest::Client,
        config: CrawlConfig,
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

    /// Returns a reference to the crawl configuration.
    #[must_use]
    pub const fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Returns the directory the crawl mirrors into.
    #[must_use]
    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Crawls everything reachable from `root` into `manifest`, then closes
    /// the manifest.
    ///
    /// # Errors
    ///
    /// Under [`CrawlErrorPolicy::Abort`], returns the first fetch error and
    /// stops the remaining workers. Under either policy, returns an error if
    /// the manifest cannot be written or a worker panics.
    pub async fn crawl(self: Arc<Self>, root: Url, manifest: ManifestWriter) -> Result<CrawlSummary> {
        let queue = Arc::new(CrawlQueue::new(self.config.queue_capacity));
        let root = Arc::new(root);
        queue.push(Url::clone(&root));

        let mut workers = JoinSet::new();
        for id in 0..self.config.workers.max(1) {
            workers.spawn(Arc::clone(&self).work(
                id,
                Arc::clone(&root),
                Arc::clone(&queue),
                manifest.sender(),
            ));
        }

        let mut summary = CrawlSummary::default();
        let drained = queue.outstanding.wait_zero();
        tokio::pin!(drained);
        loop {
            tokio::select! {
                () = &mut drained => break,
                Some(joined) = workers.join_next() => match joined? {
                    Ok(tally) => summary.merge(&tally),
                    Err(e) => {
                        queue.close();
                        workers.abort_all();
                        return Err(e);
                    }
                },
            }
        }

        log::debug!("Crawl queue drained, stopping workers");
        queue.close();
        while let Some(joined) = workers.join_next().await {
            summary.merge(&joined??);
        }

        let report = manifest.finish().await?;
        summary.duplicates = report.duplicates;
        summary.files = report.written;
        Ok(summary)
    }

    async fn work(
        self: Arc<Self>,
        id: usize,
        root: Arc<Url>,
        queue: Arc<CrawlQueue>,
        manifest: ManifestSender,
    ) -> Result<CrawlSummary> {
        let mut tally = CrawlSummary::default();

        while let Some(target) = queue.pop().await {
            let visit = match self.visit(&root, &target).await {
                Ok(visit) => visit,
                Err(e) => match self.config.on_error {
                    CrawlErrorPolicy::Abort => {
                        log::error!("[crawler {id}] {target}: {e}");
                        return Err(e);
                    }
                    CrawlErrorPolicy::Skip => {
                        log::warn!("[crawler {id}] Skipping {target}: {e}");
                        Visit::Leaf
                    }
                },
            };

            match visit {
                Visit::Listing { directories, files } => {
                    tally.listings += 1;
                    log::debug!(
                        "[crawler {id}] {target}: {} dir(s), {} file(s)",
                        directories.len(),
                        files.len()
                    );
                    // Children are counted before this target is marked done
                    for directory in directories {
                        queue.push(directory);
                    }
                    for file in files {
                        manifest.append(file.url).await?;
                        tally.files += 1;
                    }
                }
                Visit::Leaf => tally.leaves += 1,
            }
            queue.done();
        }

        Ok(tally)
    }

    async fn visit(&self, root: &Url, target: &Url) -> Result<Visit> {
        let dir = mirrored_path(&self.target_dir, target);
        if let Err(e) = self.fs.create_dir_all(&dir).await {
            log::warn!("Failed to create {}: {e}", dir.display());
        }

        let response = self.client.get(target.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            log::warn!("{target}: {status}, treating as leaf");
            return Ok(Visit::Leaf);
        }

        if !within_root(root, response.url()) {
            log::warn!("{target}: redirected outside the root to {}, treating as leaf", response.url());
            return Ok(Visit::Leaf);
        }

        let body = response.text().await?;
        if !extract::is_index_listing(&body) {
            log::debug!("{target}: not an index listing");
            return Ok(Visit::Leaf);
        }

        let listing = extract::extract(target, &body);
        Ok(Visit::Listing {
            directories: listing.directory_urls(target).collect(),
            files: listing.files,
        })
    }
}

/// True if `url` is on the root's origin and at or below the root's path.
fn within_root(root: &Url, url: &Url) -> bool {
    if url.origin() != root.origin() {
        return false;
    }
    let prefix = root.path().trim_end_matches('/');
    url.path()
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}
