//! Restaurant profile collection: category and the five criteria scores
//! from each target's main page.
//!
//! Targets whose stored profile is already complete are skipped, so a rerun
//! only visits restaurants that were missing data last time.

use anyhow::Result;
use chrono::Utc;
use review_harvest_core::error::HarvestError;
use review_harvest_core::models::{RestaurantProfile, Target, UpsertOutcome};
use review_harvest_core::page::{extract_profile, PageSource};
use review_harvest_core::store::RecordStore;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db;
use crate::page_source::{page_url, HttpPageSource};
use crate::progress::{HarvestProgressEvent, HarvestProgressReporter};
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileSummary {
    pub targets: usize,
    pub already_complete: usize,
    pub new_count: usize,
    pub updated_count: usize,
    pub unchanged_count: usize,
    /// Profiles stored without a category or with some criteria missing.
    pub incomplete: usize,
    pub error_count: usize,
}

async fn persist_profile<S: RecordStore + ?Sized>(
    store: &S,
    profile: &RestaurantProfile,
) -> Result<UpsertOutcome, HarvestError> {
    match store.upsert_profile(profile).await {
        Ok(outcome) => Ok(outcome),
        Err(first) => {
            debug!(url = %profile.restaurant_url, error = %first, "upsert failed, retrying once");
            store
                .upsert_profile(profile)
                .await
                .map_err(|e| HarvestError::Persistence {
                    key: profile.restaurant_url.clone(),
                    reason: format!("{:#}", e),
                })
        }
    }
}

async fn open_profile<P: PageSource>(
    source: &mut P,
    url: &str,
) -> Result<Option<P::Item>, HarvestError> {
    source.navigate(url).await?;
    Ok(source.find_items().await?.into_iter().next())
}

/// Collect a profile for every target that lacks a complete one.
pub async fn collect_profiles<P, S>(
    targets: &[Target],
    source: &mut P,
    store: &S,
    url_suffix: Option<&str>,
    progress: &dyn HarvestProgressReporter,
) -> ProfileSummary
where
    P: PageSource,
    S: RecordStore + ?Sized,
{
    let mut summary = ProfileSummary::default();

    for (i, target) in targets.iter().enumerate() {
        summary.targets += 1;
        progress.report(HarvestProgressEvent::Target {
            command: "profiles",
            name: target.name.clone(),
            n: (i + 1) as u64,
            total: targets.len() as u64,
        });

        match store.get_profile(&target.url).await {
            Ok(Some(existing)) if existing.is_complete() => {
                debug!(url = %target.url, "profile already complete");
                summary.already_complete += 1;
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(url = %target.url, error = %e, "profile lookup failed, skipping target");
                summary.error_count += 1;
                continue;
            }
        }

        let url = page_url(&target.url, url_suffix);
        let item = match open_profile(source, &url).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                warn!(url = %url, "profile container not found on page");
                summary.error_count += 1;
                continue;
            }
            Err(e) => {
                warn!(url = %url, error = %e, "target skipped");
                summary.error_count += 1;
                continue;
            }
        };

        let profile = extract_profile(&*source, &item, target, Utc::now());
        if !profile.is_complete() {
            summary.incomplete += 1;
        }

        let mut written = 0;
        match persist_profile(store, &profile).await {
            Ok(outcome) => {
                match outcome {
                    UpsertOutcome::Inserted => summary.new_count += 1,
                    UpsertOutcome::Updated => summary.updated_count += 1,
                    UpsertOutcome::Unchanged => summary.unchanged_count += 1,
                }
                if outcome != UpsertOutcome::Unchanged {
                    written = 1;
                }
            }
            Err(e) => {
                warn!(error = %e, "profile dropped");
                summary.error_count += 1;
            }
        }
        progress.report(HarvestProgressEvent::Finished {
            command: "profiles",
            name: target.name.clone(),
            written,
            converged: false,
        });
    }

    info!(
        targets = summary.targets,
        complete = summary.already_complete,
        new = summary.new_count,
        updated = summary.updated_count,
        errors = summary.error_count,
        "profile collection finished"
    );
    summary
}

/// `harvest profiles`: collect profiles for stored targets.
pub async fn run_profiles(
    config: &Config,
    limit: Option<usize>,
    progress: &dyn HarvestProgressReporter,
) -> Result<ProfileSummary> {
    let source_config = config.sources.require("profiles")?;
    let mut source = HttpPageSource::from_config("profiles", source_config, &config.collector)?;
    let url_suffix = source.url_suffix().map(str::to_string);

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    let mut targets = store.list_targets().await?;
    if let Some(max) = limit.or(config.collector.max_targets) {
        targets.truncate(max);
    }

    let summary =
        collect_profiles(&targets, &mut source, &store, url_suffix.as_deref(), progress).await;
    store.close().await;

    println!("collect profiles");
    println!("  targets: {}", summary.targets);
    println!("  already complete: {}", summary.already_complete);
    println!("  new: {}", summary.new_count);
    println!("  updated: {}", summary.updated_count);
    println!("  unchanged: {}", summary.unchanged_count);
    println!("  incomplete: {}", summary.incomplete);
    println!("  errors: {}", summary.error_count);
    println!("ok");

    Ok(summary)
}
