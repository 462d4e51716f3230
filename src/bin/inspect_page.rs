use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Url;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use flat_watch::config;
use flat_watch::extract;
use flat_watch::fetch::{HttpFetcher, PageFetcher};
use flat_watch::filter;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Print the listings found on the page and whether they match the criteria. Sends nothing, stores nothing."
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Parse a saved HTML file instead of fetching the live page
    #[arg(long)]
    html: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    // Nothing is sent or stored, so the notifier and schedule sections may
    // be incomplete.
    let cfg = config::read(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    config::validate_source(&cfg)?;
    let base = Url::parse(&cfg.source.url)?;

    let markup = match &args.html {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let fetcher = HttpFetcher::new(cfg.source.fetch_timeout(), cfg.source.user_agent.as_deref())?;
            fetcher.fetch(base.as_str()).await?
        }
    };

    let out = extract::extract(&markup, &base);
    if out.consent_wall && out.listings.is_empty() {
        println!("Page shows a consent banner and no listings.");
    }
    println!(
        "{} listing(s) extracted, {} rejected\n",
        out.listings.len(),
        out.rejected.len()
    );

    let fmt = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_else(|| "?".into());
    for (i, listing) in out.listings.iter().enumerate() {
        let verdict = if filter::matches(listing, &cfg.criteria) { "MATCH" } else { "skip" };
        println!("{:>3}. [{}] {} ({})", i + 1, verdict, listing.title, listing.id);
        println!(
            "     {} Zimmer, {} m², {} €",
            fmt(listing.rooms),
            fmt(listing.area),
            fmt(listing.cold_rent)
        );
        if let Some(url) = &listing.url {
            println!("     {}", url);
        }
    }
    for err in &out.rejected {
        println!("  rejected: {}", err);
    }
    Ok(())
}
