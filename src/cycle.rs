//! One polling pass: fetch → extract → filter → diff → notify → mark seen.
use chrono::Utc;
use reqwest::Url;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::db::{SeenStore, StoreError};
use crate::extract;
use crate::fetch::{FetchError, PageFetcher};
use crate::filter;
use crate::model::SearchCriteria;
use crate::notify::Notifier;

/// Everything a cycle needs. Borrowed so the scheduler and the one-shot path
/// can share the same collaborators.
pub struct Pipeline<'a> {
    pub fetcher: &'a dyn PageFetcher,
    pub store: &'a dyn SeenStore,
    pub notifier: &'a dyn Notifier,
    pub criteria: SearchCriteria,
    pub source_url: Url,
    pub fetch_timeout: Duration,
    /// Mark a listing seen even when its notification failed (no retry).
    pub mark_seen_on_failure: bool,
    /// Where to dump markup that produced no listings.
    pub debug_dir: Option<&'a Path>,
}

/// Counts describing what a cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetch_failed: bool,
    pub extracted: usize,
    pub rejected: usize,
    pub matched: usize,
    pub new: usize,
    pub notified: usize,
    pub notify_failed: usize,
    pub marked: usize,
    /// IDs that were unseen this cycle, in page order.
    pub new_ids: Vec<String>,
    /// IDs whose send failed and that stay unseen for a retry.
    pub unsent_ids: Vec<String>,
}

impl CycleReport {
    pub fn found_new(&self) -> bool {
        self.new > 0
    }
}

/// Run one cycle. Fetch, extraction and notification problems are logged and
/// absorbed; a store failure ends the cycle and is returned.
#[instrument(skip_all, fields(url = %pipeline.source_url))]
pub async fn run_cycle(pipeline: &Pipeline<'_>) -> Result<CycleReport, StoreError> {
    let mut report = CycleReport::default();

    let markup = match fetch_bounded(pipeline).await {
        Ok(markup) => markup,
        Err(err) => {
            warn!(%err, stage = "fetch", "fetch failed; treating cycle as empty");
            report.fetch_failed = true;
            return Ok(report);
        }
    };

    let extraction = extract::extract(&markup, &pipeline.source_url);
    report.extracted = extraction.listings.len();
    report.rejected = extraction.rejected.len();
    if extraction.consent_wall && extraction.listings.is_empty() {
        warn!(stage = "extract", "page shows a consent banner and no listings");
    }
    if extraction.listings.is_empty() && extraction.rejected.is_empty() {
        warn!(stage = "extract", bytes = markup.len(), "no listings found on page");
        if let Some(dir) = pipeline.debug_dir {
            dump_page(dir, &markup).await;
        }
    }

    let candidates: Vec<_> = extraction
        .listings
        .into_iter()
        .filter(|l| filter::matches(l, &pipeline.criteria))
        .collect();
    report.matched = candidates.len();

    for listing in &candidates {
        if pipeline.store.has_seen(&listing.id).await.map_err(|err| {
            error!(%err, stage = "store", listing_id = %listing.id, "seen lookup failed");
            err
        })? {
            continue;
        }
        report.new += 1;
        report.new_ids.push(listing.id.clone());

        // Notify before marking: a crash in between repeats a notification
        // instead of losing one.
        let delivered = match pipeline.notifier.send(listing).await {
            Ok(()) => {
                report.notified += 1;
                true
            }
            Err(err) => {
                report.notify_failed += 1;
                warn!(%err, stage = "notify", listing_id = %listing.id, "notification failed");
                false
            }
        };

        if delivered || pipeline.mark_seen_on_failure {
            pipeline
                .store
                .mark_seen(&listing.id, Utc::now())
                .await
                .map_err(|err| {
                    error!(%err, stage = "store", listing_id = %listing.id, "failed to persist seen state");
                    err
                })?;
            report.marked += 1;
        } else {
            info!(listing_id = %listing.id, "left unseen; will retry next cycle");
            report.unsent_ids.push(listing.id.clone());
        }
    }

    info!(
        extracted = report.extracted,
        rejected = report.rejected,
        matched = report.matched,
        new = report.new,
        notified = report.notified,
        notify_failed = report.notify_failed,
        "cycle finished"
    );
    Ok(report)
}

async fn fetch_bounded(pipeline: &Pipeline<'_>) -> Result<String, FetchError> {
    match tokio::time::timeout(
        pipeline.fetch_timeout,
        pipeline.fetcher.fetch(pipeline.source_url.as_str()),
    )
    .await
    {
        Ok(res) => res,
        Err(_) => Err(FetchError::Timeout(pipeline.fetch_timeout)),
    }
}

async fn dump_page(dir: &Path, markup: &str) {
    let file = dir.join(format!("empty-{}.html", Utc::now().format("%Y%m%dT%H%M%S")));
    let res = async {
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&file, markup).await
    }
    .await;
    match res {
        Ok(()) => info!(path = %file.display(), "saved page markup for inspection"),
        Err(err) => warn!(%err, path = %file.display(), "could not save page markup"),
    }
}
