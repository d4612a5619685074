use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Targets keep their rowid, which preserves import order
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS targets (
            restaurant_url TEXT PRIMARY KEY,
            restaurant_name TEXT NOT NULL,
            district TEXT NOT NULL,
            address TEXT,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // review_time is ISO-8601 text so MAX() and ORDER BY sort chronologically
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reviews (
            review_id TEXT PRIMARY KEY,
            restaurant_url TEXT NOT NULL,
            restaurant_name TEXT NOT NULL,
            district TEXT NOT NULL,
            user_name TEXT,
            rating REAL,
            review_text TEXT,
            media_urls TEXT,
            review_time TEXT,
            collected_at TEXT NOT NULL,
            content_hash TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS profiles (
            restaurant_url TEXT PRIMARY KEY,
            restaurant_name TEXT NOT NULL,
            address TEXT,
            district TEXT NOT NULL,
            category TEXT,
            criteria_location REAL,
            criteria_price REAL,
            criteria_quality REAL,
            criteria_service REAL,
            criteria_space REAL,
            criteria_average REAL,
            collected_at TEXT NOT NULL,
            content_hash TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_reviews_restaurant_time ON reviews(restaurant_url, review_time DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_reviews_district ON reviews(district)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_profiles_category ON profiles(category)")
        .execute(pool)
        .await?;

    Ok(())
}
