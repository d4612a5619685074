//! Export stored records as CSV tables.
//!
//! Produces one table per collection with a fixed column order, sorted by
//! district, restaurant name, then collection time. Writes to a file or to
//! stdout for piping.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::Row;
use std::io::Write;
use std::path::Path;

use crate::config::Config;
use crate::db;

#[derive(Serialize)]
struct ExportReview {
    review_id: String,
    restaurant_url: String,
    restaurant_name: String,
    district: String,
    user_name: Option<String>,
    rating: Option<f64>,
    review_text: Option<String>,
    media_urls: Option<String>,
    review_time: Option<String>,
    collected_at: String,
}

#[derive(Serialize)]
struct ExportProfile {
    restaurant_url: String,
    restaurant_name: String,
    address: Option<String>,
    district: String,
    category: Option<String>,
    criteria_location: Option<f64>,
    criteria_price: Option<f64>,
    criteria_quality: Option<f64>,
    criteria_service: Option<f64>,
    criteria_space: Option<f64>,
    criteria_average: Option<f64>,
    collected_at: String,
}

#[derive(Serialize)]
struct ExportTarget {
    restaurant_url: String,
    restaurant_name: String,
    district: String,
    address: Option<String>,
}

/// Which collection to export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Reviews,
    Profiles,
    Targets,
}

impl ExportKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "reviews" => Ok(ExportKind::Reviews),
            "profiles" => Ok(ExportKind::Profiles),
            "targets" => Ok(ExportKind::Targets),
            other => bail!(
                "Unknown collection: '{}'. Must be reviews, profiles, or targets.",
                other
            ),
        }
    }
}

fn write_rows<W: Write, T: Serialize>(out: W, rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

async fn export_to<W: Write>(pool: &sqlx::SqlitePool, kind: ExportKind, out: W) -> Result<usize> {
    match kind {
        ExportKind::Reviews => {
            let rows = sqlx::query(
                "SELECT review_id, restaurant_url, restaurant_name, district, user_name, rating, \
                 review_text, media_urls, review_time, collected_at \
                 FROM reviews ORDER BY district, restaurant_name, collected_at, review_id",
            )
            .fetch_all(pool)
            .await?;
            let reviews: Vec<ExportReview> = rows
                .iter()
                .map(|row| ExportReview {
                    review_id: row.get("review_id"),
                    restaurant_url: row.get("restaurant_url"),
                    restaurant_name: row.get("restaurant_name"),
                    district: row.get("district"),
                    user_name: row.get("user_name"),
                    rating: row.get("rating"),
                    review_text: row.get("review_text"),
                    media_urls: row.get("media_urls"),
                    review_time: row.get("review_time"),
                    collected_at: row.get("collected_at"),
                })
                .collect();
            write_rows(out, &reviews)?;
            Ok(reviews.len())
        }
        ExportKind::Profiles => {
            let rows = sqlx::query(
                "SELECT restaurant_url, restaurant_name, address, district, category, \
                 criteria_location, criteria_price, criteria_quality, criteria_service, \
                 criteria_space, criteria_average, collected_at \
                 FROM profiles ORDER BY district, restaurant_name, collected_at",
            )
            .fetch_all(pool)
            .await?;
            let profiles: Vec<ExportProfile> = rows
                .iter()
                .map(|row| ExportProfile {
                    restaurant_url: row.get("restaurant_url"),
                    restaurant_name: row.get("restaurant_name"),
                    address: row.get("address"),
                    district: row.get("district"),
                    category: row.get("category"),
                    criteria_location: row.get("criteria_location"),
                    criteria_price: row.get("criteria_price"),
                    criteria_quality: row.get("criteria_quality"),
                    criteria_service: row.get("criteria_service"),
                    criteria_space: row.get("criteria_space"),
                    criteria_average: row.get("criteria_average"),
                    collected_at: row.get("collected_at"),
                })
                .collect();
            write_rows(out, &profiles)?;
            Ok(profiles.len())
        }
        ExportKind::Targets => {
            let rows = sqlx::query(
                "SELECT restaurant_url, restaurant_name, district, address \
                 FROM targets ORDER BY district, restaurant_name, rowid",
            )
            .fetch_all(pool)
            .await?;
            let targets: Vec<ExportTarget> = rows
                .iter()
                .map(|row| ExportTarget {
                    restaurant_url: row.get("restaurant_url"),
                    restaurant_name: row.get("restaurant_name"),
                    district: row.get("district"),
                    address: row.get("address"),
                })
                .collect();
            write_rows(out, &targets)?;
            Ok(targets.len())
        }
    }
}

/// Export one collection as CSV.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn run_export(config: &Config, kind: ExportKind, output: Option<&Path>) -> Result<()> {
    let pool = db::connect(config).await?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::File::create(path)?;
            let count = export_to(&pool, kind, file).await?;
            eprintln!("Exported {} {:?} rows to {}", count, kind, path.display());
        }
        None => {
            let mut buf = Vec::new();
            export_to(&pool, kind, &mut buf).await?;
            std::io::stdout().lock().write_all(&buf)?;
        }
    }

    pool.close().await;
    Ok(())
}
