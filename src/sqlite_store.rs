//! SQLite-backed [`RecordStore`].
//!
//! Every write is a single `INSERT ... ON CONFLICT DO UPDATE` keyed by the
//! record's natural key. The stored content hash is read first so the
//! caller can tell new, updated and unchanged records apart; unchanged rows
//! are never rewritten.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use review_harvest_core::models::{
    format_review_time, parse_review_time, CriteriaScores, RestaurantProfile, Review, Target,
    UpsertOutcome,
};
use review_harvest_core::store::RecordStore;
use sqlx::{Row, SqlitePool};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

fn outcome_for(existing: Option<String>, hash: &str) -> Option<UpsertOutcome> {
    match existing {
        None => Some(UpsertOutcome::Inserted),
        Some(stored) if stored == hash => None,
        Some(_) => Some(UpsertOutcome::Updated),
    }
}

fn parse_collected_at(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid collected_at '{}'", raw))?
        .with_timezone(&Utc))
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn find_latest_timestamp(&self, restaurant_url: &str) -> Result<Option<NaiveDateTime>> {
        let latest: Option<String> = sqlx::query_scalar(
            "SELECT review_time FROM reviews \
             WHERE restaurant_url = ? AND review_time IS NOT NULL \
             ORDER BY review_time DESC LIMIT 1",
        )
        .bind(restaurant_url)
        .fetch_optional(&self.pool)
        .await?;

        latest
            .map(|raw| {
                parse_review_time(&raw)
                    .ok_or_else(|| anyhow!("stored review_time '{}' is not ISO-8601", raw))
            })
            .transpose()
    }

    async fn upsert_review(&self, review: &Review) -> Result<UpsertOutcome> {
        let hash = review.content_hash();
        let existing: Option<String> =
            sqlx::query_scalar("SELECT content_hash FROM reviews WHERE review_id = ?")
                .bind(&review.review_id)
                .fetch_optional(&self.pool)
                .await?;

        let Some(outcome) = outcome_for(existing, &hash) else {
            return Ok(UpsertOutcome::Unchanged);
        };

        let media_urls = if review.media_urls.is_empty() {
            None
        } else {
            Some(review.media_urls_joined())
        };

        sqlx::query(
            r#"
            INSERT INTO reviews (review_id, restaurant_url, restaurant_name, district, user_name, rating, review_text, media_urls, review_time, collected_at, content_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(review_id) DO UPDATE SET
                restaurant_url = excluded.restaurant_url,
                restaurant_name = excluded.restaurant_name,
                district = excluded.district,
                user_name = excluded.user_name,
                rating = excluded.rating,
                review_text = excluded.review_text,
                media_urls = excluded.media_urls,
                review_time = excluded.review_time,
                collected_at = excluded.collected_at,
                content_hash = excluded.content_hash
            WHERE reviews.content_hash <> excluded.content_hash
            "#,
        )
        .bind(&review.review_id)
        .bind(&review.restaurant_url)
        .bind(&review.restaurant_name)
        .bind(&review.district)
        .bind(&review.user_name)
        .bind(review.rating)
        .bind(&review.review_text)
        .bind(media_urls)
        .bind(review.review_time.map(format_review_time))
        .bind(review.collected_at.to_rfc3339())
        .bind(&hash)
        .execute(&self.pool)
        .await?;

        Ok(outcome)
    }

    async fn upsert_profile(&self, profile: &RestaurantProfile) -> Result<UpsertOutcome> {
        let hash = profile.content_hash();
        let existing: Option<String> =
            sqlx::query_scalar("SELECT content_hash FROM profiles WHERE restaurant_url = ?")
                .bind(&profile.restaurant_url)
                .fetch_optional(&self.pool)
                .await?;

        let Some(outcome) = outcome_for(existing, &hash) else {
            return Ok(UpsertOutcome::Unchanged);
        };

        let c = &profile.criteria;
        sqlx::query(
            r#"
            INSERT INTO profiles (restaurant_url, restaurant_name, address, district, category, criteria_location, criteria_price, criteria_quality, criteria_service, criteria_space, criteria_average, collected_at, content_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(restaurant_url) DO UPDATE SET
                restaurant_name = excluded.restaurant_name,
                address = excluded.address,
                district = excluded.district,
                category = excluded.category,
                criteria_location = excluded.criteria_location,
                criteria_price = excluded.criteria_price,
                criteria_quality = excluded.criteria_quality,
                criteria_service = excluded.criteria_service,
                criteria_space = excluded.criteria_space,
                criteria_average = excluded.criteria_average,
                collected_at = excluded.collected_at,
                content_hash = excluded.content_hash
            WHERE profiles.content_hash <> excluded.content_hash
            "#,
        )
        .bind(&profile.restaurant_url)
        .bind(&profile.restaurant_name)
        .bind(&profile.address)
        .bind(&profile.district)
        .bind(&profile.category)
        .bind(c.location)
        .bind(c.price)
        .bind(c.quality)
        .bind(c.service)
        .bind(c.space)
        .bind(profile.criteria_average())
        .bind(profile.collected_at.to_rfc3339())
        .bind(&hash)
        .execute(&self.pool)
        .await?;

        Ok(outcome)
    }

    async fn get_profile(&self, restaurant_url: &str) -> Result<Option<RestaurantProfile>> {
        let row = sqlx::query(
            "SELECT restaurant_url, restaurant_name, address, district, category, \
             criteria_location, criteria_price, criteria_quality, criteria_service, criteria_space, \
             collected_at FROM profiles WHERE restaurant_url = ?",
        )
        .bind(restaurant_url)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let collected_at: String = row.get("collected_at");
        Ok(Some(RestaurantProfile {
            restaurant_url: row.get("restaurant_url"),
            restaurant_name: row.get("restaurant_name"),
            address: row.get("address"),
            district: row.get("district"),
            category: row.get("category"),
            criteria: CriteriaScores {
                location: row.get("criteria_location"),
                price: row.get("criteria_price"),
                quality: row.get("criteria_quality"),
                service: row.get("criteria_service"),
                space: row.get("criteria_space"),
            },
            collected_at: parse_collected_at(&collected_at)?,
        }))
    }

    async fn upsert_target(&self, target: &Target) -> Result<UpsertOutcome> {
        let existing = sqlx::query(
            "SELECT restaurant_name, district, address FROM targets WHERE restaurant_url = ?",
        )
        .bind(&target.url)
        .fetch_optional(&self.pool)
        .await?;

        let outcome = match existing {
            None => UpsertOutcome::Inserted,
            Some(row) => {
                let name: String = row.get("restaurant_name");
                let district: String = row.get("district");
                let address: Option<String> = row.get("address");
                if name == target.name && district == target.district && address == target.address {
                    return Ok(UpsertOutcome::Unchanged);
                }
                UpsertOutcome::Updated
            }
        };

        sqlx::query(
            r#"
            INSERT INTO targets (restaurant_url, restaurant_name, district, address, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(restaurant_url) DO UPDATE SET
                restaurant_name = excluded.restaurant_name,
                district = excluded.district,
                address = excluded.address,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&target.url)
        .bind(&target.name)
        .bind(&target.district)
        .bind(&target.address)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(outcome)
    }

    async fn list_targets(&self) -> Result<Vec<Target>> {
        let rows = sqlx::query(
            "SELECT restaurant_url, restaurant_name, district, address FROM targets ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Target {
                url: row.get("restaurant_url"),
                name: row.get("restaurant_name"),
                district: row.get("district"),
                address: row.get("address"),
            })
            .collect())
    }

    async fn count_reviews(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM reviews")
            .fetch_one(&self.pool)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::apply(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn review(id: &str, day: Option<u32>) -> Review {
        Review {
            review_id: id.to_string(),
            restaurant_url: "https://x.vn/a".to_string(),
            restaurant_name: "A".to_string(),
            district: "Quận 1".to_string(),
            user_name: Some("lan".to_string()),
            rating: Some(7.5),
            review_text: Some("ngon".to_string()),
            media_urls: vec![],
            review_time: day.map(|d| {
                NaiveDate::from_ymd_opt(2024, 2, d)
                    .unwrap()
                    .and_hms_opt(20, 15, 0)
                    .unwrap()
            }),
            collected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn review_upsert_reports_outcomes() {
        let store = store().await;
        let r = review("r1", Some(2));
        assert_eq!(store.upsert_review(&r).await.unwrap(), UpsertOutcome::Inserted);

        let mut again = r.clone();
        again.collected_at = Utc::now();
        assert_eq!(store.upsert_review(&again).await.unwrap(), UpsertOutcome::Unchanged);

        again.rating = Some(9.0);
        assert_eq!(store.upsert_review(&again).await.unwrap(), UpsertOutcome::Updated);
        assert_eq!(store.count_reviews().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn latest_timestamp_skips_nulls() {
        let store = store().await;
        store.upsert_review(&review("r1", Some(2))).await.unwrap();
        store.upsert_review(&review("r2", Some(11))).await.unwrap();
        store.upsert_review(&review("r3", None)).await.unwrap();

        let latest = store.find_latest_timestamp("https://x.vn/a").await.unwrap().unwrap();
        assert_eq!(format_review_time(latest), "2024-02-11T20:15:00");
        assert!(store.find_latest_timestamp("https://x.vn/b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn profile_round_trips_through_the_table() {
        let store = store().await;
        let profile = RestaurantProfile {
            restaurant_url: "https://x.vn/a".to_string(),
            restaurant_name: "A".to_string(),
            address: None,
            district: "Quận 1".to_string(),
            category: Some("Quán ăn - Món Việt".to_string()),
            criteria: CriteriaScores {
                location: Some(8.0),
                price: Some(7.0),
                quality: Some(9.0),
                service: Some(8.0),
                space: Some(7.5),
            },
            collected_at: Utc::now(),
        };
        assert_eq!(store.upsert_profile(&profile).await.unwrap(), UpsertOutcome::Inserted);
        let stored = store.get_profile("https://x.vn/a").await.unwrap().unwrap();
        assert!(stored.is_complete());
        assert_eq!(stored.criteria, profile.criteria);

        let average: Option<f64> =
            sqlx::query_scalar("SELECT criteria_average FROM profiles WHERE restaurant_url = ?")
                .bind("https://x.vn/a")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(average, Some(7.9));
    }

    #[tokio::test]
    async fn targets_list_in_insertion_order() {
        let store = store().await;
        store.upsert_target(&Target::new("https://x.vn/b", "B", "Quận 3")).await.unwrap();
        store.upsert_target(&Target::new("https://x.vn/a", "A", "Quận 1")).await.unwrap();
        let renamed = Target::new("https://x.vn/b", "B2", "Quận 3");
        assert_eq!(store.upsert_target(&renamed).await.unwrap(), UpsertOutcome::Updated);

        let targets = store.list_targets().await.unwrap();
        assert_eq!(targets[0].name, "B2");
        assert_eq!(targets[1].url, "https://x.vn/a");
    }
}
