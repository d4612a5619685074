//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/harvest.sqlite"
//!
//! [collector]
//! max_pagination_steps = 400
//! max_growth_wait_secs = 25
//!
//! [report]
//! output_dir = "./reports"
//! top_k = 10
//!
//! [sources.reviews]
//! item_selector = "li.review-item"
//! more_selector = "a.load-more"
//! url_suffix = "/binh-luan"
//!
//! [sources.reviews.fields.review_id]
//! attr = "data-review"
//!
//! [sources.reviews.fields.media_urls]
//! selector = "img.review-photo"
//! attr = "src"
//! all = true
//! url = true
//! ```
//!
//! Every section except `[db]` has defaults. Source sections are only
//! required by the commands that navigate pages.

use anyhow::{Context, Result};
use review_harvest_core::error::HarvestError;
use review_harvest_core::page::ExtractOptions;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::page_source::CompiledSource;

/// Columns of the `reviews` table that the missing-value audit may inspect.
pub const AUDITABLE_REVIEW_FIELDS: [&str; 6] = [
    "user_name",
    "rating",
    "review_text",
    "media_urls",
    "review_time",
    "restaurant_name",
];

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    #[serde(default = "default_max_pagination_steps")]
    pub max_pagination_steps: usize,
    #[serde(default = "default_max_growth_wait_secs")]
    pub max_growth_wait_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    /// Stop after this many targets per run.
    #[serde(default)]
    pub max_targets: Option<usize>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// `chrono` formats tried in order for review timestamps.
    #[serde(default = "default_time_formats")]
    pub time_formats: Vec<String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_pagination_steps: default_max_pagination_steps(),
            max_growth_wait_secs: default_max_growth_wait_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            batch_delay_ms: default_batch_delay_ms(),
            max_targets: None,
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
            time_formats: default_time_formats(),
        }
    }
}

impl CollectorConfig {
    pub fn max_growth_wait(&self) -> Duration {
        Duration::from_secs(self.max_growth_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            time_formats: self.time_formats.clone(),
        }
    }
}

fn default_max_pagination_steps() -> usize {
    400
}
fn default_max_growth_wait_secs() -> u64 {
    25
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_batch_delay_ms() -> u64 {
    800
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    concat!("review-harvest/", env!("CARGO_PKG_VERSION")).to_string()
}
fn default_time_formats() -> Vec<String> {
    ExtractOptions::default().time_formats
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Rows kept in `recommended_restaurants`.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Review columns audited by `missing_report`.
    #[serde(default = "default_missing_fields")]
    pub missing_fields: Vec<String>,
    #[serde(default = "default_top_criteria_limit")]
    pub top_criteria_limit: usize,
    #[serde(default = "default_category_threshold")]
    pub category_threshold: f64,
    #[serde(default = "default_high_rating_min")]
    pub high_rating_min: f64,
    #[serde(default = "default_low_review_max")]
    pub low_review_max: i64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            top_k: default_top_k(),
            missing_fields: default_missing_fields(),
            top_criteria_limit: default_top_criteria_limit(),
            category_threshold: default_category_threshold(),
            high_rating_min: default_high_rating_min(),
            low_review_max: default_low_review_max(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./reports")
}
fn default_top_k() -> usize {
    10
}
fn default_missing_fields() -> Vec<String> {
    ["rating", "review_text", "media_urls", "review_time"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_top_criteria_limit() -> usize {
    100
}
fn default_category_threshold() -> f64 {
    8.0
}
fn default_high_rating_min() -> f64 {
    9.0
}
fn default_low_review_max() -> i64 {
    5
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    /// Review list of one restaurant.
    pub reviews: Option<SourceConfig>,
    /// Restaurant main page (category and criteria scores).
    pub profiles: Option<SourceConfig>,
    /// District listing of restaurant cards.
    pub listing: Option<SourceConfig>,
}

/// How to find items on one kind of page and read fields out of them.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub item_selector: String,
    /// Link to the next batch of items. Without it the page has no "load more".
    #[serde(default)]
    pub more_selector: Option<String>,
    /// Appended to a target URL to reach this page, unless already present.
    #[serde(default)]
    pub url_suffix: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldConfig>,
}

/// One field extractor, evaluated relative to an item.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FieldConfig {
    /// CSS selector inside the item; the item itself when absent.
    #[serde(default)]
    pub selector: Option<String>,
    /// Read this attribute instead of the element text.
    #[serde(default)]
    pub attr: Option<String>,
    /// Collect every match instead of the first.
    #[serde(default)]
    pub all: bool,
    /// Resolve the value as a URL against the page URL.
    #[serde(default)]
    pub url: bool,
}

impl SourcesConfig {
    pub fn require(&self, name: &str) -> Result<&SourceConfig, HarvestError> {
        let source = match name {
            "reviews" => self.reviews.as_ref(),
            "profiles" => self.profiles.as_ref(),
            "listing" => self.listing.as_ref(),
            _ => None,
        };
        source.ok_or_else(|| {
            HarvestError::configuration(format!("[sources.{}] is not configured", name))
        })
    }
}

fn invalid(message: impl Into<String>) -> anyhow::Error {
    HarvestError::configuration(message).into()
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

fn validate(config: &Config) -> Result<()> {
    let collector = &config.collector;
    if collector.poll_interval_ms == 0 && collector.max_growth_wait_secs > 0 {
        return Err(invalid(
            "collector.poll_interval_ms must be > 0 when max_growth_wait_secs is set",
        ));
    }
    if collector.request_timeout_secs == 0 {
        return Err(invalid("collector.request_timeout_secs must be > 0"));
    }
    if collector.max_targets == Some(0) {
        return Err(invalid("collector.max_targets must be > 0 when set"));
    }
    if collector.time_formats.is_empty() {
        return Err(invalid("collector.time_formats must not be empty"));
    }

    let report = &config.report;
    if report.top_k == 0 {
        return Err(invalid("report.top_k must be >= 1"));
    }
    if report.top_criteria_limit == 0 {
        return Err(invalid("report.top_criteria_limit must be >= 1"));
    }
    if report.low_review_max < 1 {
        return Err(invalid("report.low_review_max must be >= 1"));
    }
    for field in &report.missing_fields {
        if !AUDITABLE_REVIEW_FIELDS.contains(&field.as_str()) {
            return Err(invalid(format!(
                "report.missing_fields: unknown review field '{}'. Must be one of: {}",
                field,
                AUDITABLE_REVIEW_FIELDS.join(", ")
            )));
        }
    }

    for (name, source) in [
        ("reviews", &config.sources.reviews),
        ("profiles", &config.sources.profiles),
        ("listing", &config.sources.listing),
    ] {
        if let Some(source) = source {
            CompiledSource::compile(name, source)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_with_only_db() {
        let cfg = parse_config("[db]\npath = \"./data/h.sqlite\"\n").unwrap();
        assert_eq!(cfg.collector.max_pagination_steps, 400);
        assert_eq!(cfg.collector.max_growth_wait(), Duration::from_secs(25));
        assert_eq!(cfg.collector.poll_interval(), Duration::from_secs(1));
        assert_eq!(cfg.report.top_k, 10);
        assert_eq!(cfg.report.missing_fields.len(), 4);
        assert!(cfg.sources.reviews.is_none());
        assert!(cfg.sources.require("reviews").is_err());
    }

    #[test]
    fn source_fields_parse() {
        let cfg = parse_config(
            r#"
[db]
path = "h.sqlite"

[sources.reviews]
item_selector = "li.review-item"
url_suffix = "/binh-luan"

[sources.reviews.fields.review_id]
attr = "data-review"

[sources.reviews.fields.media_urls]
selector = "img"
attr = "src"
all = true
url = true
"#,
        )
        .unwrap();
        let reviews = cfg.sources.require("reviews").unwrap();
        assert_eq!(reviews.url_suffix.as_deref(), Some("/binh-luan"));
        let media = &reviews.fields["media_urls"];
        assert!(media.all && media.url);
        assert!(reviews.fields["review_id"].selector.is_none());
    }

    #[test]
    fn invalid_selector_is_rejected() {
        let err = parse_config(
            r#"
[db]
path = "h.sqlite"

[sources.listing]
item_selector = "div[["
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("sources.listing"), "{}", err);
    }

    #[test]
    fn unknown_audit_field_is_rejected() {
        let err = parse_config(
            "[db]\npath = \"h.sqlite\"\n[report]\nmissing_fields = [\"rating; DROP TABLE reviews\"]\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown review field"));
    }

    #[test]
    fn zero_top_k_is_rejected() {
        assert!(parse_config("[db]\npath = \"h.sqlite\"\n[report]\ntop_k = 0\n").is_err());
    }
}
