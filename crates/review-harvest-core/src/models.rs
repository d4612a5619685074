//! Core data models used throughout review-harvest.
//!
//! These types represent the targets, reviews, and restaurant profiles that
//! flow from a page source through the collector into the store.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// A restaurant page to collect from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    /// Stable identifier: the restaurant URL.
    pub url: String,
    pub name: String,
    /// Grouping tag (district).
    pub district: String,
    pub address: Option<String>,
}

impl Target {
    pub fn new(
        url: impl Into<String>,
        name: impl Into<String>,
        district: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            district: district.into(),
            address: None,
        }
    }
}

/// One user review of a restaurant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Review {
    /// Natural key: the external id when the page exposes one, otherwise
    /// `hash_` followed by a digest of the identifying content.
    pub review_id: String,
    pub restaurant_url: String,
    pub restaurant_name: String,
    pub district: String,
    pub user_name: Option<String>,
    pub rating: Option<f64>,
    pub review_text: Option<String>,
    pub media_urls: Vec<String>,
    /// When the review was posted. `None` never satisfies the watermark.
    pub review_time: Option<NaiveDateTime>,
    pub collected_at: DateTime<Utc>,
}

impl Review {
    /// Digest over the content fields only. `collected_at` is excluded so
    /// re-collecting unchanged content yields the same hash.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        let mut push = |s: &str| {
            hasher.update(s.as_bytes());
            hasher.update([0x1f]);
        };
        push(&self.restaurant_url);
        push(&self.restaurant_name);
        push(&self.district);
        push(self.user_name.as_deref().unwrap_or(""));
        push(&self.rating.map(|r| r.to_string()).unwrap_or_default());
        push(self.review_text.as_deref().unwrap_or(""));
        push(&self.media_urls.join("|"));
        push(&self.review_time.map(format_review_time).unwrap_or_default());
        format!("{:x}", hasher.finalize())
    }

    pub fn media_urls_joined(&self) -> String {
        self.media_urls.join("|")
    }
}

/// Fallback review key built from the identifying content of a review.
pub fn hashed_review_id(
    restaurant_url: &str,
    user_name: Option<&str>,
    rating: Option<f64>,
    review_time: Option<NaiveDateTime>,
    review_text: Option<&str>,
) -> String {
    let parts = [
        normalize_text(restaurant_url),
        normalize_text(user_name.unwrap_or("")),
        rating.map(|r| r.to_string()).unwrap_or_else(|| "None".to_string()),
        review_time.map(format_review_time).unwrap_or_default(),
        normalize_text(review_text.unwrap_or("")),
    ];
    let mut hasher = Sha256::new();
    hasher.update(parts.join("||").as_bytes());
    format!("hash_{:x}", hasher.finalize())
}

/// Storage format for review timestamps. Lexicographic order matches
/// chronological order, so `MAX()` in SQL yields the watermark.
pub const REVIEW_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn format_review_time(ts: NaiveDateTime) -> String {
    ts.format(REVIEW_TIME_FORMAT).to_string()
}

pub fn parse_review_time(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, REVIEW_TIME_FORMAT).ok()
}

/// Trim and collapse internal whitespace runs to a single space.
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The five per-criterion scores shown on a restaurant page.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CriteriaScores {
    pub location: Option<f64>,
    pub price: Option<f64>,
    pub quality: Option<f64>,
    pub service: Option<f64>,
    pub space: Option<f64>,
}

impl CriteriaScores {
    /// Criterion names in display order, paired with their column names.
    pub const COLUMNS: [(&'static str, &'static str); 5] = [
        ("location", "criteria_location"),
        ("price", "criteria_price"),
        ("quality", "criteria_quality"),
        ("service", "criteria_service"),
        ("space", "criteria_space"),
    ];

    pub fn values(&self) -> [Option<f64>; 5] {
        [
            self.location,
            self.price,
            self.quality,
            self.service,
            self.space,
        ]
    }

    /// Mean of the five scores rounded to 2 decimals, only when all exist.
    pub fn average(&self) -> Option<f64> {
        let values = self.values();
        if values.iter().any(|v| v.is_none()) {
            return None;
        }
        let sum: f64 = values.iter().flatten().sum();
        Some(round_to(sum / 5.0, 2))
    }
}

/// Category and criteria scores collected from a restaurant's main page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestaurantProfile {
    pub restaurant_url: String,
    pub restaurant_name: String,
    pub address: Option<String>,
    pub district: String,
    pub category: Option<String>,
    pub criteria: CriteriaScores,
    pub collected_at: DateTime<Utc>,
}

impl RestaurantProfile {
    pub fn criteria_average(&self) -> Option<f64> {
        self.criteria.average()
    }

    /// A profile is complete once its category and all criteria are known.
    /// Complete profiles are not re-collected.
    pub fn is_complete(&self) -> bool {
        self.category.is_some() && self.criteria.average().is_some()
    }

    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        let mut push = |s: &str| {
            hasher.update(s.as_bytes());
            hasher.update([0x1f]);
        };
        push(&self.restaurant_url);
        push(&self.restaurant_name);
        push(self.address.as_deref().unwrap_or(""));
        push(&self.district);
        push(self.category.as_deref().unwrap_or(""));
        for v in self.criteria.values() {
            push(&v.map(|x| x.to_string()).unwrap_or_default());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Result of a single idempotent upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The key existed with identical content; nothing was written.
    Unchanged,
}

/// Counters reported at the end of a collection run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionSummary {
    pub targets: usize,
    pub new_count: usize,
    pub updated_count: usize,
    pub unchanged_count: usize,
    pub skipped_count: usize,
    pub error_count: usize,
    /// Targets whose pass stopped at the watermark.
    pub converged_targets: usize,
    /// Records newer than their predecessor in the same pass.
    pub out_of_order: usize,
}

impl CollectionSummary {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.new_count += 1,
            UpsertOutcome::Updated => self.updated_count += 1,
            UpsertOutcome::Unchanged => self.unchanged_count += 1,
        }
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
