//! Runs the whole mirror: crawl into the manifest, then download from it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::config::AppConfig;
use crate::crawl::{CrawlSummary, Crawler};
use crate::download::Downloader;
use crate::error::{Error, Result};
use crate::manifest::{ManifestWriter, manifest_path};
use crate::progress::{LogReporter, ProgressReporter};
use crate::stats::SessionStats;

/// Outcome of a complete run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorReport {
    /// What the crawl found.
    pub crawl: CrawlSummary,
    /// What the download did with it.
    pub download: SessionStats,
}

/// Builds the HTTP client shared by both stages.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub fn build_http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(8)
        .tcp_keepalive(Duration::from_secs(30))
        .build()
}

/// A configured mirror of one root URL.
pub struct Mirror {
    root: Url,
    config: AppConfig,
    client: reqwest::Client,
    reporter: Arc<dyn ProgressReporter>,
}

impl std::fmt::Debug for Mirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mirror")
            .field("root", &self.root.as_str())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Mirror {
    /// Validates `root` and prepares a mirror into `config.target_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRootUrl`] unless `root` is an http(s) URL with
    /// a host, and an I/O error if the working directory is unavailable.
    pub fn new(root: Url, config: AppConfig) -> Result<Self> {
        let client = build_http_client()?;
        Self::with_client(root, config, client)
    }

    /// Like [`new`](Self::new), with a caller-supplied HTTP client.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn with_client(mut root: Url, mut config: AppConfig, client: reqwest::Client) -> Result<Self> {
        if !matches!(root.scheme(), "http" | "https") || root.host_str().is_none() {
            return Err(Error::InvalidRootUrl(root.to_string()));
        }
        root.set_fragment(None);
        if !root.path().ends_with('/') {
            let path = format!("{}/", root.path());
            root.set_path(&path);
        }

        config.target_dir = absolute(&config.target_dir)?;

        Ok(Self {
            root,
            config,
            client,
            reporter: Arc::new(LogReporter),
        })
    }

    /// Sends download progress lines to `reporter` instead of the log.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// The normalised root URL.
    #[must_use]
    pub const fn root(&self) -> &Url {
        &self.root
    }

    /// The configuration, with the target directory made absolute.
    #[must_use]
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Crawls the root into the manifest, then downloads every entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the target directory cannot be created or the
    /// crawl fails. Individual download failures are only counted.
    pub async fn run(&self) -> Result<MirrorReport> {
        let target_dir = &self.config.target_dir;
        tokio::fs::create_dir_all(target_dir).await?;
        let manifest = manifest_path(target_dir);

        log::info!("Crawling {} into {}", self.root, target_dir.display());
        let crawl = self.crawl(&manifest).await?;
        log::info!(
            "Crawl finished: {} listing(s), {} leaf page(s), {} file(s)",
            crawl.listings,
            crawl.leaves,
            crawl.files
        );
        if crawl.duplicates > 0 {
            log::info!("Dropped {} duplicate file URL(s)", crawl.duplicates);
        }

        let downloader = Arc::new(Downloader::new(
            self.client.clone(),
            self.config.download.clone(),
            target_dir.clone(),
        ));
        let download = downloader
            .download_manifest_with(&manifest, Arc::clone(&self.reporter))
            .await?;
        if download.is_complete() {
            log::info!("Download finished: {download}");
        } else {
            log::warn!("Download finished with failures: {download}");
        }

        Ok(MirrorReport { crawl, download })
    }

    async fn crawl(&self, manifest: &Path) -> Result<CrawlSummary> {
        let crawl = &self.config.crawl;
        let writer = ManifestWriter::create(manifest, crawl.manifest_capacity, crawl.dedup).await?;
        let crawler = Arc::new(Crawler::new(
            self.client.clone(),
            crawl.clone(),
            self.config.target_dir.clone(),
        ));
        crawler.crawl(self.root.clone(), writer).await
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CrawlErrorPolicy, SkipPolicy};
    use crate::manifest::ManifestReader;
    use crate::progress::ProgressLine;
    use crate::testutil::TestSite;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CapturingReporter {
        lines: Mutex<Vec<ProgressLine>>,
    }

    impl ProgressReporter for CapturingReporter {
        fn report(&self, line: &ProgressLine) {
            self.lines.lock().unwrap().push(*line);
        }
    }

    fn example_site() -> TestSite {
        TestSite::new()
            .listing("/", &["a/", "f.bin"])
            .listing("/a/", &["g.bin"])
            .file("/f.bin", b"top level".to_vec())
            .file("/a/g.bin", b"nested file".to_vec())
    }

    #[test]
    fn rejects_non_http_roots() {
        for root in ["ftp://example.test/", "file:///srv/data/", "mailto:someone@example.test"] {
            let result = Mirror::new(Url::parse(root).unwrap(), AppConfig::default());
            assert!(matches!(result, Err(Error::InvalidRootUrl(_))), "{root}");
        }
    }

    #[test]
    fn normalises_root_and_target() {
        let mirror = Mirror::new(
            Url::parse("https://example.test/pub/data#top").unwrap(),
            AppConfig::default().with_target_dir("out"),
        )
        .unwrap();

        assert_eq!(mirror.root().as_str(), "https://example.test/pub/data/");
        assert!(mirror.config().target_dir.is_absolute());
        assert!(mirror.config().target_dir.ends_with("out"));
    }

    #[tokio::test]
    async fn end_to_end_example() {
        let server = example_site().serve().await;
        let dir = TempDir::new().unwrap();
        let reporter = Arc::new(CapturingReporter::default());

        let mirror = Mirror::new(server.url("/"), AppConfig::default().with_target_dir(dir.path()))
            .unwrap()
            .with_reporter(reporter.clone());
        let report = mirror.run().await.unwrap();

        let manifest: BTreeSet<_> = ManifestReader::open(&manifest_path(dir.path()))
            .await
            .unwrap()
            .read_all()
            .await
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(
            manifest,
            BTreeSet::from([server.url("/f.bin"), server.url("/a/g.bin")])
        );
        assert_eq!(std::fs::read(dir.path().join("f.bin")).unwrap(), b"top level");
        assert_eq!(std::fs::read(dir.path().join("a/g.bin")).unwrap(), b"nested file");

        assert_eq!(report.crawl.files, 2);
        assert_eq!(report.download.files_downloaded, 2);
        assert_eq!(report.download.total_bytes, 20);

        let last = *reporter.lines.lock().unwrap().last().unwrap();
        assert_eq!(last.state.items_finished, 2);
        assert_eq!(last.state.items_expected, 2);
    }

    #[tokio::test]
    async fn second_run_with_skip_policy_fetches_nothing() {
        let server = example_site().serve().await;
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default().with_target_dir(dir.path());

        Mirror::new(server.url("/"), config.clone()).unwrap().run().await.unwrap();
        assert_eq!(server.hits("/f.bin"), 1);

        config.download = config.download.with_skip_policy(SkipPolicy::SkipIfNonzero);
        let report = Mirror::new(server.url("/"), config).unwrap().run().await.unwrap();

        assert_eq!(report.download.files_skipped, 2);
        assert_eq!(server.hits("/f.bin"), 1);
        assert_eq!(server.hits("/a/g.bin"), 1);
    }

    #[tokio::test]
    async fn download_failures_do_not_fail_the_run() {
        let server = TestSite::new()
            .listing("/", &["present.bin", "missing.bin"])
            .file("/present.bin", b"here".to_vec())
            .serve()
            .await;
        let dir = TempDir::new().unwrap();

        let report = Mirror::new(server.url("/"), AppConfig::default().with_target_dir(dir.path()))
            .unwrap()
            .run()
            .await
            .unwrap();

        assert_eq!(report.download.files_downloaded, 1);
        assert_eq!(report.download.files_failed, 1);
        assert!(!report.download.is_complete());
    }

    #[tokio::test]
    async fn crawl_failure_is_fatal_by_default() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let root = Url::parse(&format!("http://{addr}/")).unwrap();
        let dir = TempDir::new().unwrap();

        let mut config = AppConfig::default().with_target_dir(dir.path());
        assert!(Mirror::new(root.clone(), config.clone()).unwrap().run().await.is_err());

        config.crawl = config.crawl.with_on_error(CrawlErrorPolicy::Skip);
        let report = Mirror::new(root, config).unwrap().run().await.unwrap();
        assert_eq!(report.crawl.leaves, 1);
        assert_eq!(report.download.files_processed(), 0);
    }
}
