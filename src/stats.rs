//! Database statistics and health overview.
//!
//! Provides a quick summary of what has been collected: target, review and
//! profile counts, a per-district breakdown, and when each district was last
//! collected. Used by `harvest stats` to confirm that runs are progressing.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::config::Config;
use crate::db;

/// Per-district breakdown.
struct DistrictStats {
    district: String,
    targets: i64,
    reviews: i64,
    profiles: i64,
    last_collected: Option<String>,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total_targets: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM targets")
        .fetch_one(&pool)
        .await?;
    let total_reviews: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews")
        .fetch_one(&pool)
        .await?;
    let total_profiles: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM profiles")
        .fetch_one(&pool)
        .await?;
    let rated: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews WHERE rating IS NOT NULL")
        .fetch_one(&pool)
        .await?;
    let last_collected: Option<String> = sqlx::query_scalar("SELECT MAX(collected_at) FROM reviews")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Review Harvest Database Stats");
    println!("=============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Targets:     {}", total_targets);
    println!("  Reviews:     {}", total_reviews);
    println!(
        "  Rated:       {} / {} ({}%)",
        rated,
        total_reviews,
        if total_reviews > 0 {
            (rated * 100) / total_reviews
        } else {
            0
        }
    );
    println!("  Profiles:    {}", total_profiles);
    println!(
        "  Last run:    {}",
        last_collected
            .as_deref()
            .map(format_collected_relative)
            .unwrap_or_else(|| "never".to_string())
    );

    let district_rows = sqlx::query(
        r#"
        SELECT district, SUM(t) AS targets, SUM(r) AS reviews, SUM(p) AS profiles, MAX(last) AS last
        FROM (
            SELECT district, 1 AS t, 0 AS r, 0 AS p, NULL AS last FROM targets
            UNION ALL
            SELECT district, 0, 1, 0, collected_at FROM reviews
            UNION ALL
            SELECT district, 0, 0, 1, NULL FROM profiles
        )
        GROUP BY district
        ORDER BY reviews DESC, district
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let districts: Vec<DistrictStats> = district_rows
        .iter()
        .map(|row| DistrictStats {
            district: row.get("district"),
            targets: row.get("targets"),
            reviews: row.get("reviews"),
            profiles: row.get("profiles"),
            last_collected: row.get("last"),
        })
        .collect();

    if !districts.is_empty() {
        println!();
        println!("  By district:");
        println!(
            "  {:<24} {:>8} {:>8} {:>9}   {}",
            "DISTRICT", "TARGETS", "REVIEWS", "PROFILES", "LAST COLLECTED"
        );
        println!("  {}", "-".repeat(76));

        for d in &districts {
            let last = match &d.last_collected {
                Some(ts) => format_collected_relative(ts),
                None => "never".to_string(),
            };
            println!(
                "  {:<24} {:>8} {:>8} {:>9}   {}",
                d.district, d.targets, d.reviews, d.profiles, last
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_collected_relative(raw: &str) -> String {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => format_ts_relative(ts.with_timezone(&Utc), Utc::now()),
        Err(_) => raw.to_string(),
    }
}

/// Format a timestamp relative to `now` (e.g. "3 hours ago").
fn format_ts_relative(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - ts).num_seconds();

    if delta < 0 {
        return ts.format("%Y-%m-%d %H:%M").to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        ts.format("%Y-%m-%d %H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn relative_times() {
        let now = Utc::now();
        assert_eq!(format_ts_relative(now - Duration::seconds(5), now), "just now");
        assert_eq!(format_ts_relative(now - Duration::minutes(1), now), "1 min ago");
        assert_eq!(format_ts_relative(now - Duration::hours(3), now), "3 hours ago");
        assert_eq!(format_ts_relative(now - Duration::days(2), now), "2 days ago");
    }

    #[test]
    fn byte_sizes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
    }
}
