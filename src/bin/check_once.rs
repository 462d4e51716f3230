use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Url;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use flat_watch::config;
use flat_watch::cycle::{run_cycle, Pipeline};
use flat_watch::db::SqliteSeenStore;
use flat_watch::fetch::HttpFetcher;
use flat_watch::notify::Transport;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run exactly one fetch/notify cycle and exit (no sleep, no quiet hours)"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    let store = SqliteSeenStore::open(&cfg.database_url()).await?;
    let fetcher = HttpFetcher::new(cfg.source.fetch_timeout(), cfg.source.user_agent.as_deref())?;
    let transport = Transport::from_config(&cfg.notify)?;
    let debug_dir = cfg.debug_dir();

    let pipeline = Pipeline {
        fetcher: &fetcher,
        store: &store,
        notifier: &transport,
        criteria: cfg.criteria,
        source_url: Url::parse(&cfg.source.url)?,
        fetch_timeout: cfg.source.fetch_timeout(),
        mark_seen_on_failure: cfg.notify.mark_seen_on_failure,
        debug_dir: debug_dir.as_deref(),
    };

    let report = run_cycle(&pipeline)
        .await
        .context("cycle failed to persist seen state")?;
    info!(?report, "single cycle complete");
    store.close().await;
    Ok(())
}
