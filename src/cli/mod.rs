//! Command-line front end for index-mirror.

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use crate::{AppConfig, CrawlErrorPolicy, Mirror, SkipPolicy};

/// Mirror an "Index of" directory tree over HTTP.
#[derive(Parser, Debug)]
#[command(name = "index-mirror", version, about)]
pub struct Cli {
    /// Root URL of the listing to mirror
    pub url: Url,

    /// Number of concurrent crawl workers
    #[arg(short = 'i', long)]
    pub index_workers: Option<usize>,

    /// Number of concurrent download workers
    #[arg(short = 'd', long)]
    pub download_workers: Option<usize>,

    /// Directory to mirror into
    #[arg(short = 'o', long)]
    pub target_directory: Option<PathBuf>,

    /// When to leave an existing local file alone
    #[arg(short = 's', long, value_name = "POLICY")]
    pub skip_existing: Option<SkipPolicy>,

    /// What a failed listing fetch does to the crawl
    #[arg(long, value_name = "POLICY")]
    pub on_crawl_error: Option<CrawlErrorPolicy>,

    /// Drop file URLs that were already recorded
    #[arg(long)]
    pub dedup: bool,

    /// Config file (defaults to the per-user config if it exists)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Applies command-line overrides on top of `config`.
    #[must_use]
    pub fn apply(&self, mut config: AppConfig) -> AppConfig {
        if let Some(workers) = self.index_workers {
            config.crawl = config.crawl.with_workers(workers);
        }
        if let Some(workers) = self.download_workers {
            config.download = config.download.with_workers(workers);
        }
        if let Some(dir) = &self.target_directory {
            config = config.with_target_dir(dir);
        }
        if let Some(policy) = self.skip_existing {
            config.download = config.download.with_skip_policy(policy);
        }
        if let Some(policy) = self.on_crawl_error {
            config.crawl = config.crawl.with_on_error(policy);
        }
        if self.dedup {
            config.crawl = config.crawl.with_dedup(true);
        }
        config
    }
}

/// Installs the process logger. `RUST_LOG` wins over `verbose`.
pub fn init_logger(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_target(false)
        .try_init();
}

/// Parses the command line and runs a mirror.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded, the root URL is
/// invalid, or the crawl fails.
pub async fn run() -> crate::Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let config = cli.apply(AppConfig::load(cli.config.as_deref())?);
    log::debug!("{config:?}");

    let mirror = Mirror::new(cli.url.clone(), config)?;
    let report = mirror.run().await?;
    log::info!(
        "Mirrored {} into {}: {}",
        mirror.root(),
        mirror.config().target_dir.display(),
        report.download
    );
    Ok(())
}
