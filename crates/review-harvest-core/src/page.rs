//! Page source abstraction and record extraction.
//!
//! The [`PageSource`] trait is the narrow capability the collector drives:
//! navigate to a page, list the items currently visible, read a named field
//! from an item, and ask for more items. The shipped implementation fetches
//! HTML and evaluates CSS selectors; tests use an in-memory fake.
//!
//! Extraction turns an opaque item into a typed record. A missing field
//! becomes `None` and extraction continues with the other fields; only an
//! item with nothing identifying at all fails as a whole.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use tracing::debug;

use crate::error::{ExtractionFailure, HarvestError};
use crate::models::{
    hashed_review_id, normalize_text, CriteriaScores, RestaurantProfile, Review, Target,
};

/// Field names understood by the extractors.
pub mod fields {
    pub const REVIEW_ID: &str = "review_id";
    pub const USER_NAME: &str = "user_name";
    pub const RATING: &str = "rating";
    pub const REVIEW_TIME: &str = "review_time";
    pub const REVIEW_TEXT: &str = "review_text";
    pub const MEDIA_URLS: &str = "media_urls";

    pub const CATEGORY: &str = "category";
    pub const CRITERIA_LOCATION: &str = "criteria_location";
    pub const CRITERIA_PRICE: &str = "criteria_price";
    pub const CRITERIA_QUALITY: &str = "criteria_quality";
    pub const CRITERIA_SERVICE: &str = "criteria_service";
    pub const CRITERIA_SPACE: &str = "criteria_space";

    pub const RESTAURANT_URL: &str = "restaurant_url";
    pub const RESTAURANT_NAME: &str = "restaurant_name";
    pub const ADDRESS: &str = "address";
}

/// Separator used by page sources for multi-valued fields.
pub const MULTI_VALUE_SEPARATOR: char = '|';

/// A source of pages whose items can be revealed incrementally.
///
/// `find_items` returns every item currently visible, oldest reveal first,
/// so a "load more" action makes the list grow at the end. Sources driven
/// by true pagination accumulate pages to keep that contract.
#[async_trait]
pub trait PageSource: Send {
    /// Opaque handle to one item on the page.
    type Item: Send + Sync;

    async fn navigate(&mut self, url: &str) -> Result<(), HarvestError>;

    async fn find_items(&mut self) -> Result<Vec<Self::Item>, HarvestError>;

    fn extract_field(&self, item: &Self::Item, field: &str) -> Result<String, ExtractionFailure>;

    /// Trigger a "load more" action. Returns `false` when no such action
    /// is available on the current page.
    async fn trigger_more(&mut self) -> Result<bool, HarvestError>;
}

/// Options that shape how raw text becomes typed values.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// `chrono` formats tried in order when parsing review timestamps.
    pub time_formats: Vec<String>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            time_formats: vec![
                "%d/%m/%Y %H:%M".to_string(),
                "%d/%m/%Y %H:%M:%S".to_string(),
                "%Y-%m-%d %H:%M:%S".to_string(),
                "%Y-%m-%dT%H:%M:%S".to_string(),
            ],
        }
    }
}

/// Read one field as normalized text; `None` when missing or blank.
fn text_field<P: PageSource + ?Sized>(source: &P, item: &P::Item, field: &str) -> Option<String> {
    match source.extract_field(item, field) {
        Ok(raw) => {
            let text = normalize_text(&raw);
            if text.is_empty() {
                None
            } else {
                Some(text)
            }
        }
        Err(failure) => {
            debug!(%failure, "field recorded as null");
            None
        }
    }
}

fn multi_field<P: PageSource + ?Sized>(source: &P, item: &P::Item, field: &str) -> Vec<String> {
    let raw = match source.extract_field(item, field) {
        Ok(raw) => raw,
        Err(failure) => {
            debug!(%failure, "field recorded as empty");
            return Vec::new();
        }
    };
    let mut out: Vec<String> = Vec::new();
    for part in raw.split(MULTI_VALUE_SEPARATOR) {
        let part = part.trim();
        if !part.is_empty() && !out.iter().any(|p| p == part) {
            out.push(part.to_string());
        }
    }
    out
}

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("number pattern is valid"));

/// Parse the first decimal number in `text`, accepting `,` as the decimal
/// separator ("8,5" → 8.5, "Điểm: 7.2/10" → 7.2).
pub fn parse_score(text: &str) -> Option<f64> {
    let normalized = text.trim().replace(',', ".");
    NUMBER
        .find(&normalized)
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Parse a review timestamp with the first matching format. Date-only
/// formats resolve to midnight.
pub fn parse_timestamp(text: &str, formats: &[String]) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    for fmt in formats {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(ts);
        }
        if let Ok(date) = NaiveDate::parse_from_str(text, fmt) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Build a [`Review`] from one review item.
pub fn extract_review<P: PageSource + ?Sized>(
    source: &P,
    item: &P::Item,
    target: &Target,
    options: &ExtractOptions,
    collected_at: DateTime<Utc>,
) -> Result<Review, ExtractionFailure> {
    let external_id = text_field(source, item, fields::REVIEW_ID);
    let user_name = text_field(source, item, fields::USER_NAME);
    let review_text = text_field(source, item, fields::REVIEW_TEXT);

    let rating = text_field(source, item, fields::RATING).and_then(|raw| {
        let parsed = parse_score(&raw);
        if parsed.is_none() {
            debug!(raw = %raw, "rating is not a number, recorded as null");
        }
        parsed
    });

    let review_time = text_field(source, item, fields::REVIEW_TIME).and_then(|raw| {
        let parsed = parse_timestamp(&raw, &options.time_formats);
        if parsed.is_none() {
            debug!(raw = %raw, "review time matches no configured format, recorded as null");
        }
        parsed
    });

    let media_urls = multi_field(source, item, fields::MEDIA_URLS);

    let review_id = match external_id {
        Some(id) => id,
        None => {
            if user_name.is_none()
                && rating.is_none()
                && review_text.is_none()
                && review_time.is_none()
            {
                return Err(ExtractionFailure::new(
                    "review",
                    "item carries no id, author, rating, time or text",
                ));
            }
            hashed_review_id(
                &target.url,
                user_name.as_deref(),
                rating,
                review_time,
                review_text.as_deref(),
            )
        }
    };

    Ok(Review {
        review_id,
        restaurant_url: target.url.clone(),
        restaurant_name: target.name.clone(),
        district: target.district.clone(),
        user_name,
        rating,
        review_text,
        media_urls,
        review_time,
        collected_at,
    })
}

/// Build a [`RestaurantProfile`] from the item that represents a
/// restaurant's main page. Every field is optional.
pub fn extract_profile<P: PageSource + ?Sized>(
    source: &P,
    item: &P::Item,
    target: &Target,
    collected_at: DateTime<Utc>,
) -> RestaurantProfile {
    let category_parts = multi_field(source, item, fields::CATEGORY);
    let category = if category_parts.is_empty() {
        None
    } else {
        Some(category_parts.join(" - "))
    };

    let score = |field: &str| text_field(source, item, field).and_then(|raw| parse_score(&raw));

    RestaurantProfile {
        restaurant_url: target.url.clone(),
        restaurant_name: target.name.clone(),
        address: text_field(source, item, fields::ADDRESS).or_else(|| target.address.clone()),
        district: target.district.clone(),
        category,
        criteria: CriteriaScores {
            location: score(fields::CRITERIA_LOCATION),
            price: score(fields::CRITERIA_PRICE),
            quality: score(fields::CRITERIA_QUALITY),
            service: score(fields::CRITERIA_SERVICE),
            space: score(fields::CRITERIA_SPACE),
        },
        collected_at,
    }
}

/// Build a [`Target`] from one card on a listing page.
pub fn extract_target<P: PageSource + ?Sized>(
    source: &P,
    item: &P::Item,
    district: &str,
) -> Result<Target, ExtractionFailure> {
    let url = text_field(source, item, fields::RESTAURANT_URL)
        .ok_or_else(|| ExtractionFailure::missing(fields::RESTAURANT_URL))?;
    if !url.starts_with("http") {
        return Err(ExtractionFailure::new(
            fields::RESTAURANT_URL,
            format!("not an absolute URL: {}", url),
        ));
    }
    Ok(Target {
        url,
        name: text_field(source, item, fields::RESTAURANT_NAME).unwrap_or_default(),
        district: district.to_string(),
        address: text_field(source, item, fields::ADDRESS),
    })
}
