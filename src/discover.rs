//! Target discovery from a district listing page.
//!
//! The listing is expanded with the same load-more and growth-wait loop the
//! collector uses, then every restaurant card becomes a target tagged with
//! the given district.

use std::collections::HashSet;

use anyhow::Result;
use review_harvest_core::error::HarvestError;
use review_harvest_core::models::UpsertOutcome;
use review_harvest_core::page::{extract_target, PageSource};
use review_harvest_core::store::RecordStore;
use serde::Serialize;
use tracing::{info, warn};

use crate::collector::{load_more, CollectLimits};
use crate::config::Config;
use crate::db;
use crate::page_source::HttpPageSource;
use crate::progress::{HarvestProgressEvent, HarvestProgressReporter};
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoverySummary {
    pub cards: usize,
    pub new_count: usize,
    pub updated_count: usize,
    pub unchanged_count: usize,
    pub error_count: usize,
    pub load_more_steps: usize,
}

/// Expand a listing and upsert one target per restaurant card.
///
/// Failing to open the listing is an error for the whole call. Cards that
/// cannot be read and targets the store rejects are counted and skipped.
pub async fn discover<P, S>(
    listing_url: &str,
    district: &str,
    source: &mut P,
    store: &S,
    limits: &CollectLimits,
    progress: &dyn HarvestProgressReporter,
) -> Result<DiscoverySummary, HarvestError>
where
    P: PageSource,
    S: RecordStore + ?Sized,
{
    let mut summary = DiscoverySummary::default();
    source.navigate(listing_url).await?;
    let mut items = source.find_items().await?;

    while summary.load_more_steps < limits.max_pagination_steps {
        match load_more(source, items.len(), limits).await {
            Ok(Some(grown)) => {
                summary.load_more_steps += 1;
                progress.report(HarvestProgressEvent::Items {
                    command: "discover",
                    name: district.to_string(),
                    visible: grown.len() as u64,
                    step: summary.load_more_steps as u64,
                });
                items = grown;
            }
            Ok(None) => break,
            Err(e) => {
                warn!(url = listing_url, error = %e, "load more failed, keeping visible cards");
                summary.error_count += 1;
                break;
            }
        }
    }

    let mut seen: HashSet<String> = HashSet::new();
    for item in &items {
        summary.cards += 1;
        let target = match extract_target(&*source, item, district) {
            Ok(target) => target,
            Err(failure) => {
                warn!(%failure, "listing card skipped");
                summary.error_count += 1;
                continue;
            }
        };
        if !seen.insert(target.url.clone()) {
            continue;
        }
        match store.upsert_target(&target).await {
            Ok(UpsertOutcome::Inserted) => summary.new_count += 1,
            Ok(UpsertOutcome::Updated) => summary.updated_count += 1,
            Ok(UpsertOutcome::Unchanged) => summary.unchanged_count += 1,
            Err(e) => {
                warn!(url = %target.url, error = %e, "target dropped");
                summary.error_count += 1;
            }
        }
    }

    info!(
        district,
        cards = summary.cards,
        new = summary.new_count,
        steps = summary.load_more_steps,
        "discovery finished"
    );
    Ok(summary)
}

/// `harvest discover`: expand a listing page into stored targets.
pub async fn run_discover(
    config: &Config,
    listing_url: &str,
    district: &str,
    progress: &dyn HarvestProgressReporter,
) -> Result<DiscoverySummary> {
    let source_config = config.sources.require("listing")?;
    let mut source = HttpPageSource::from_config("listing", source_config, &config.collector)?;

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    let limits = CollectLimits::from_config(&config.collector);

    let result = discover(listing_url, district, &mut source, &store, &limits, progress).await;
    store.close().await;
    let summary = result?;

    println!("discover {}", district);
    println!("  cards: {}", summary.cards);
    println!("  load-more steps: {}", summary.load_more_steps);
    println!("  new targets: {}", summary.new_count);
    println!("  updated targets: {}", summary.updated_count);
    println!("  unchanged targets: {}", summary.unchanged_count);
    println!("  errors: {}", summary.error_count);
    println!("ok");

    Ok(summary)
}
