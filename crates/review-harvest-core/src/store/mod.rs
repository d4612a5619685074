//! Storage abstraction for review-harvest.
//!
//! The [`RecordStore`] trait is everything the collectors need from the
//! persistent store: watermark lookup, idempotent upserts keyed by natural
//! keys, and target bookkeeping. SQLite backs it in production; the
//! in-memory implementation backs tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::models::{RestaurantProfile, Review, Target, UpsertOutcome};

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`find_latest_timestamp`](RecordStore::find_latest_timestamp) | Watermark for one target |
/// | [`upsert_review`](RecordStore::upsert_review) | Insert or update a review by `review_id` |
/// | [`upsert_profile`](RecordStore::upsert_profile) | Insert or update a profile by URL |
/// | [`get_profile`](RecordStore::get_profile) | Fetch a stored profile |
/// | [`upsert_target`](RecordStore::upsert_target) | Insert or update a target by URL |
/// | [`list_targets`](RecordStore::list_targets) | All targets in insertion order |
/// | [`count_reviews`](RecordStore::count_reviews) | Total stored reviews |
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Latest non-null `review_time` among the target's stored reviews.
    async fn find_latest_timestamp(&self, restaurant_url: &str) -> Result<Option<NaiveDateTime>>;

    /// Insert or update a review keyed by `review_id`. Identical content is
    /// reported as [`UpsertOutcome::Unchanged`] and not rewritten.
    async fn upsert_review(&self, review: &Review) -> Result<UpsertOutcome>;

    async fn upsert_profile(&self, profile: &RestaurantProfile) -> Result<UpsertOutcome>;

    async fn get_profile(&self, restaurant_url: &str) -> Result<Option<RestaurantProfile>>;

    async fn upsert_target(&self, target: &Target) -> Result<UpsertOutcome>;

    async fn list_targets(&self) -> Result<Vec<Target>>;

    async fn count_reviews(&self) -> Result<i64>;
}
