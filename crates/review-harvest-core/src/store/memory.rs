//! In-memory [`RecordStore`] implementation for tests.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Write semantics match the SQLite store: upserts keyed by natural key,
//! content-hash comparison for the unchanged case.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::models::{RestaurantProfile, Review, Target, UpsertOutcome};

use super::RecordStore;

/// In-memory store for tests.
pub struct InMemoryStore {
    reviews: RwLock<HashMap<String, Review>>,
    profiles: RwLock<HashMap<String, RestaurantProfile>>,
    targets: RwLock<Vec<Target>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            reviews: RwLock::new(HashMap::new()),
            profiles: RwLock::new(HashMap::new()),
            targets: RwLock::new(Vec::new()),
        }
    }

    /// Snapshot of all reviews, sorted by key for stable comparisons.
    pub fn reviews(&self) -> Vec<Review> {
        let mut all: Vec<Review> = self.reviews.read().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.review_id.cmp(&b.review_id));
        all
    }

    pub fn review(&self, review_id: &str) -> Option<Review> {
        self.reviews.read().unwrap().get(review_id).cloned()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn find_latest_timestamp(&self, restaurant_url: &str) -> Result<Option<NaiveDateTime>> {
        let reviews = self.reviews.read().unwrap();
        Ok(reviews
            .values()
            .filter(|r| r.restaurant_url == restaurant_url)
            .filter_map(|r| r.review_time)
            .max())
    }

    async fn upsert_review(&self, review: &Review) -> Result<UpsertOutcome> {
        let mut reviews = self.reviews.write().unwrap();
        let outcome = match reviews.get(&review.review_id) {
            None => UpsertOutcome::Inserted,
            Some(existing) if existing.content_hash() == review.content_hash() => {
                return Ok(UpsertOutcome::Unchanged)
            }
            Some(_) => UpsertOutcome::Updated,
        };
        reviews.insert(review.review_id.clone(), review.clone());
        Ok(outcome)
    }

    async fn upsert_profile(&self, profile: &RestaurantProfile) -> Result<UpsertOutcome> {
        let mut profiles = self.profiles.write().unwrap();
        let outcome = match profiles.get(&profile.restaurant_url) {
            None => UpsertOutcome::Inserted,
            Some(existing) if existing.content_hash() == profile.content_hash() => {
                return Ok(UpsertOutcome::Unchanged)
            }
            Some(_) => UpsertOutcome::Updated,
        };
        profiles.insert(profile.restaurant_url.clone(), profile.clone());
        Ok(outcome)
    }

    async fn get_profile(&self, restaurant_url: &str) -> Result<Option<RestaurantProfile>> {
        Ok(self.profiles.read().unwrap().get(restaurant_url).cloned())
    }

    async fn upsert_target(&self, target: &Target) -> Result<UpsertOutcome> {
        let mut targets = self.targets.write().unwrap();
        match targets.iter_mut().find(|t| t.url == target.url) {
            None => {
                targets.push(target.clone());
                Ok(UpsertOutcome::Inserted)
            }
            Some(existing) if existing == target => Ok(UpsertOutcome::Unchanged),
            Some(existing) => {
                *existing = target.clone();
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    async fn list_targets(&self) -> Result<Vec<Target>> {
        Ok(self.targets.read().unwrap().clone())
    }

    async fn count_reviews(&self) -> Result<i64> {
        Ok(self.reviews.read().unwrap().len() as i64)
    }
}
