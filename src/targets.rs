//! Source-list import.
//!
//! The source list is a CSV file with a header row. `restaurant_url`,
//! `restaurant_name` and `district` are required columns; `address` is
//! optional. Rows without an absolute `http` URL are skipped.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use review_harvest_core::error::HarvestError;
use review_harvest_core::models::{normalize_text, Target, UpsertOutcome};
use review_harvest_core::store::RecordStore;
use tracing::{debug, info};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

pub const REQUIRED_COLUMNS: [&str; 3] = ["restaurant_url", "restaurant_name", "district"];

/// Targets read from a source list, plus how many rows were skipped.
#[derive(Debug, Default)]
pub struct SourceList {
    pub targets: Vec<Target>,
    pub skipped_rows: usize,
}

/// Parse a source list. A missing required column is a configuration error.
pub fn read_source_list<R: Read>(reader: R) -> Result<SourceList> {
    let mut csv = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv.headers().context("Failed to read source list header")?.clone();
    let column = |name: &str| headers.iter().position(|h| h.trim_start_matches('\u{feff}') == name);

    let mut required = [0usize; 3];
    for (slot, name) in required.iter_mut().zip(REQUIRED_COLUMNS) {
        *slot = column(name).ok_or_else(|| {
            HarvestError::configuration(format!(
                "source list is missing required column '{}'",
                name
            ))
        })?;
    }
    let [url_idx, name_idx, district_idx] = required;
    let address_idx = column("address");

    let mut list = SourceList::default();
    let mut seen: HashSet<String> = HashSet::new();
    for (line, record) in csv.records().enumerate() {
        let record =
            record.with_context(|| format!("Failed to read source list row {}", line + 2))?;
        let field = |idx: usize| normalize_text(record.get(idx).unwrap_or(""));

        let url = field(url_idx);
        if !url.starts_with("http") {
            debug!(row = line + 2, url = %url, "row skipped: not an http URL");
            list.skipped_rows += 1;
            continue;
        }
        if !seen.insert(url.clone()) {
            list.skipped_rows += 1;
            continue;
        }

        let address = address_idx.map(field).filter(|a| !a.is_empty());
        list.targets.push(Target {
            url,
            name: field(name_idx),
            district: field(district_idx),
            address,
        });
    }
    Ok(list)
}

pub fn load_source_list(path: &Path) -> Result<SourceList> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open source list: {}", path.display()))?;
    read_source_list(file)
}

/// `harvest import`: load a source list into the `targets` table.
pub async fn run_import(config: &Config, path: &Path) -> Result<()> {
    let list = load_source_list(path)?;

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);

    let (mut inserted, mut updated, mut unchanged) = (0, 0, 0);
    for target in &list.targets {
        match store.upsert_target(target).await? {
            UpsertOutcome::Inserted => inserted += 1,
            UpsertOutcome::Updated => updated += 1,
            UpsertOutcome::Unchanged => unchanged += 1,
        }
    }
    store.close().await;

    info!(path = %path.display(), targets = list.targets.len(), "source list imported");
    println!("import {}", path.display());
    println!("  rows read: {}", list.targets.len() + list.skipped_rows);
    println!("  rows skipped: {}", list.skipped_rows);
    println!("  new targets: {}", inserted);
    println!("  updated targets: {}", updated);
    println!("  unchanged targets: {}", unchanged);
    println!("ok");
    Ok(())
}
