use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Url;
use std::future::Future;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use flat_watch::config;
use flat_watch::cycle::Pipeline;
use flat_watch::db::{count_seen, SqliteSeenStore};
use flat_watch::fetch::HttpFetcher;
use flat_watch::notify::Transport;
use flat_watch::scheduler::{LocalClock, ScheduleSettings, Scheduler};

#[derive(Debug, Parser)]
#[command(author, version, about = "Watch a listings page and notify once per new matching apartment")]
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
    let shutdown = shutdown_signal()?;

    let store = SqliteSeenStore::open(&cfg.database_url())
        .await
        .context("failed to open seen-state database")?;
    let fetcher = HttpFetcher::new(cfg.source.fetch_timeout(), cfg.source.user_agent.as_deref())?;
    let transport = Transport::from_config(&cfg.notify).context("failed to set up notifier")?;
    let settings = ScheduleSettings::from_config(&cfg.schedule);
    let debug_dir = cfg.debug_dir();

    info!(
        url = %cfg.source.url,
        normal_secs = cfg.schedule.normal_interval_secs,
        normal_jitter_secs = cfg.schedule.normal_jitter_secs,
        short_secs = cfg.schedule.short_interval_secs,
        short_jitter_secs = cfg.schedule.short_jitter_secs,
        notifier = transport.method().as_str(),
        already_seen = count_seen(store.pool()).await?,
        "starting listing watcher"
    );
    match settings.quiet_hours {
        Some(q) => info!("quiet hours {:02}:00-{:02}:00", q.start_hour(), q.end_hour()),
        None => info!("quiet hours disabled"),
    }

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
    let mut scheduler = Scheduler::new(pipeline, settings);
    scheduler.run(&LocalClock, shutdown).await;

    store.close().await;
    info!("stopped");
    Ok(())
}

/// Register the signal handlers now and return a future that resolves on the
/// first SIGINT or SIGTERM. Until the handlers exist a signal would kill the
/// process with its default action, possibly mid-cycle.
#[cfg(unix)]
fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt()).context("failed to listen for SIGINT")?;
    let mut terminate = signal(SignalKind::terminate()).context("failed to listen for SIGTERM")?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("received SIGINT"),
            _ = terminate.recv() => info!("received SIGTERM"),
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    let ctrl_c = tokio::spawn(tokio::signal::ctrl_c());
    Ok(async move {
        match ctrl_c.await {
            Ok(Ok(())) => info!("received ctrl-c"),
            Ok(Err(err)) => {
                tracing::warn!(?err, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            Err(err) => tracing::warn!(?err, "ctrl-c listener stopped"),
        }
    })
}
