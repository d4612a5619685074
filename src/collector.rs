//! Incremental review collection.
//!
//! Targets are visited one at a time in input order. For each target the
//! collector reads the watermark (latest stored review time), opens the
//! review page, and walks the visible items newest-first, revealing more
//! with "load more" until the source runs dry, the step cap is hit, or a
//! review at or before the watermark shows up. Everything newer is upserted
//! by `review_id`, so reruns never duplicate and a caught-up target costs a
//! single page load.
//!
//! Failures are isolated: a target that cannot be opened is counted and
//! skipped, and a review the store rejects twice is counted and dropped.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use review_harvest_core::convergence::{ConvergenceTracker, Decision};
use review_harvest_core::error::HarvestError;
use review_harvest_core::models::{CollectionSummary, Review, Target, UpsertOutcome};
use review_harvest_core::page::{extract_review, ExtractOptions, PageSource};
use review_harvest_core::store::RecordStore;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::{Config, CollectorConfig};
use crate::db;
use crate::page_source::{page_url, HttpPageSource};
use crate::progress::{HarvestProgressEvent, HarvestProgressReporter};
use crate::sqlite_store::SqliteStore;

/// Hard caps and pacing for one run.
#[derive(Debug, Clone)]
pub struct CollectLimits {
    pub max_pagination_steps: usize,
    pub max_growth_wait: Duration,
    pub poll_interval: Duration,
    pub batch_delay: Duration,
    pub max_targets: Option<usize>,
}

impl CollectLimits {
    pub fn from_config(config: &CollectorConfig) -> Self {
        Self {
            max_pagination_steps: config.max_pagination_steps,
            max_growth_wait: config.max_growth_wait(),
            poll_interval: config.poll_interval(),
            batch_delay: config.batch_delay(),
            max_targets: config.max_targets,
        }
    }

    /// No waiting at all; for tests and in-memory sources.
    pub fn immediate(max_pagination_steps: usize) -> Self {
        Self {
            max_pagination_steps,
            max_growth_wait: Duration::ZERO,
            poll_interval: Duration::ZERO,
            batch_delay: Duration::ZERO,
            max_targets: None,
        }
    }
}

/// Everything [`collect`] needs besides the targets and its dependencies.
#[derive(Debug, Clone)]
pub struct CollectSettings {
    pub limits: CollectLimits,
    pub extract: ExtractOptions,
    /// Appended to each target URL to reach its review list.
    pub url_suffix: Option<String>,
}

/// Trigger "load more" and wait for the visible item count to exceed `seen`.
///
/// Returns the grown item list, or `None` when the source has no more
/// action or nothing new appeared within `max_growth_wait`.
pub async fn load_more<P: PageSource>(
    source: &mut P,
    seen: usize,
    limits: &CollectLimits,
) -> Result<Option<Vec<P::Item>>, HarvestError> {
    if !source.trigger_more().await? {
        return Ok(None);
    }
    if !limits.batch_delay.is_zero() {
        sleep(limits.batch_delay).await;
    }

    let started = Instant::now();
    loop {
        let items = source.find_items().await?;
        if items.len() > seen {
            return Ok(Some(items));
        }
        if started.elapsed() >= limits.max_growth_wait {
            debug!(seen, "item list stopped growing");
            return Ok(None);
        }
        sleep(limits.poll_interval).await;
    }
}

/// Upsert with one immediate retry.
pub async fn persist<S: RecordStore + ?Sized>(
    store: &S,
    review: &Review,
) -> Result<UpsertOutcome, HarvestError> {
    match store.upsert_review(review).await {
        Ok(outcome) => Ok(outcome),
        Err(first) => {
            debug!(review_id = %review.review_id, error = %first, "upsert failed, retrying once");
            store
                .upsert_review(review)
                .await
                .map_err(|e| HarvestError::Persistence {
                    key: review.review_id.clone(),
                    reason: format!("{:#}", e),
                })
        }
    }
}

/// How one target's pass ended.
#[derive(Debug, Default)]
struct TargetPass {
    written: u64,
    converged: bool,
}

/// Collect reviews for every target in order.
pub async fn collect<P, S>(
    targets: &[Target],
    source: &mut P,
    store: &S,
    settings: &CollectSettings,
    progress: &dyn HarvestProgressReporter,
) -> CollectionSummary
where
    P: PageSource,
    S: RecordStore + ?Sized,
{
    let limit = settings.limits.max_targets.unwrap_or(targets.len());
    let targets = &targets[..limit.min(targets.len())];
    let mut summary = CollectionSummary::default();

    for (i, target) in targets.iter().enumerate() {
        progress.report(HarvestProgressEvent::Target {
            command: "collect",
            name: target.name.clone(),
            n: (i + 1) as u64,
            total: targets.len() as u64,
        });
        summary.targets += 1;

        let pass = collect_target(target, source, store, settings, progress, &mut summary).await;
        progress.report(HarvestProgressEvent::Finished {
            command: "collect",
            name: target.name.clone(),
            written: pass.written,
            converged: pass.converged,
        });
    }

    info!(
        targets = summary.targets,
        new = summary.new_count,
        updated = summary.updated_count,
        unchanged = summary.unchanged_count,
        errors = summary.error_count,
        converged = summary.converged_targets,
        "collection finished"
    );
    summary
}

async fn collect_target<P, S>(
    target: &Target,
    source: &mut P,
    store: &S,
    settings: &CollectSettings,
    progress: &dyn HarvestProgressReporter,
    summary: &mut CollectionSummary,
) -> TargetPass
where
    P: PageSource,
    S: RecordStore + ?Sized,
{
    let mut pass = TargetPass::default();

    let watermark = match store.find_latest_timestamp(&target.url).await {
        Ok(w) => w,
        Err(e) => {
            warn!(url = %target.url, error = %e, "watermark lookup failed, skipping target");
            summary.error_count += 1;
            return pass;
        }
    };

    let url = page_url(&target.url, settings.url_suffix.as_deref());
    let opened = match source.navigate(&url).await {
        Ok(()) => source.find_items().await,
        Err(e) => Err(e),
    };
    let mut items = match opened {
        Ok(items) => items,
        Err(e) => {
            warn!(url = %target.url, error = %e, "target skipped");
            summary.error_count += 1;
            return pass;
        }
    };

    debug!(url = %target.url, watermark = ?watermark, visible = items.len(), "target opened");
    let mut tracker = ConvergenceTracker::new(watermark);
    let mut processed = 0;
    let mut steps = 0;

    'pages: loop {
        for (offset, item) in items[processed..].iter().enumerate() {
            let extracted =
                extract_review(&*source, item, target, &settings.extract, Utc::now());
            let review = match extracted {
                Ok(review) => review,
                Err(failure) => {
                    warn!(url = %target.url, %failure, "review skipped");
                    summary.error_count += 1;
                    continue;
                }
            };

            match tracker.observe(review.review_time) {
                Decision::Converged => {
                    let rest = items.len() - processed - offset;
                    debug!(
                        url = %target.url,
                        review_id = %review.review_id,
                        skipped = rest,
                        "reached watermark"
                    );
                    summary.skipped_count += rest;
                    summary.converged_targets += 1;
                    pass.converged = true;
                    break 'pages;
                }
                Decision::CollectOutOfOrder => {
                    warn!(
                        url = %target.url,
                        review_id = %review.review_id,
                        "review is newer than the one before it; source order is not newest-first"
                    );
                }
                Decision::Collect => {}
            }

            match persist(store, &review).await {
                Ok(outcome) => {
                    if outcome != UpsertOutcome::Unchanged {
                        pass.written += 1;
                    }
                    summary.record(outcome);
                }
                Err(e) => {
                    warn!(error = %e, "review dropped");
                    summary.error_count += 1;
                }
            }
        }
        processed = items.len();

        if steps >= settings.limits.max_pagination_steps {
            debug!(url = %target.url, steps, "pagination cap reached");
            break;
        }
        steps += 1;

        match load_more(source, processed, &settings.limits).await {
            Ok(Some(grown)) => {
                progress.report(HarvestProgressEvent::Items {
                    command: "collect",
                    name: target.name.clone(),
                    visible: grown.len() as u64,
                    step: steps as u64,
                });
                items = grown;
            }
            Ok(None) => break,
            Err(e) => {
                warn!(
                    url = %target.url,
                    error = %e,
                    "load more failed, keeping what was collected"
                );
                summary.error_count += 1;
                break;
            }
        }
    }

    summary.out_of_order += tracker.out_of_order();
    pass
}

/// `harvest collect`: collect reviews for every stored target.
pub async fn run_collect(
    config: &Config,
    limit: Option<usize>,
    progress: &dyn HarvestProgressReporter,
) -> Result<CollectionSummary> {
    let source_config = config.sources.require("reviews")?;
    let mut source = HttpPageSource::from_config("reviews", source_config, &config.collector)?;

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    let targets = store.list_targets().await?;
    if targets.is_empty() {
        warn!("no targets stored; run `harvest import` or `harvest discover` first");
    }

    let mut limits = CollectLimits::from_config(&config.collector);
    if limit.is_some() {
        limits.max_targets = limit;
    }
    let settings = CollectSettings {
        limits,
        extract: config.collector.extract_options(),
        url_suffix: source.url_suffix().map(str::to_string),
    };

    let summary = collect(&targets, &mut source, &store, &settings, progress).await;
    store.close().await;

    println!("collect reviews");
    println!("  targets: {}", summary.targets);
    println!("  new: {}", summary.new_count);
    println!("  updated: {}", summary.updated_count);
    println!("  unchanged: {}", summary.unchanged_count);
    println!("  skipped at watermark: {}", summary.skipped_count);
    println!("  converged targets: {}", summary.converged_targets);
    println!("  out of order: {}", summary.out_of_order);
    println!("  errors: {}", summary.error_count);
    println!("ok");

    Ok(summary)
}
