//! Failure taxonomy for collection runs.
//!
//! Navigation and persistence failures are isolated to one target or one
//! record; configuration errors abort a run before any work starts.
//! Extraction failures are per field and usually degrade to a null value.

use thiserror::Error;

/// A field could not be read from a page item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field `{field}` could not be extracted: {reason}")]
pub struct ExtractionFailure {
    pub field: String,
    pub reason: String,
}

impl ExtractionFailure {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, "no matching element")
    }
}

#[derive(Debug, Error)]
pub enum HarvestError {
    /// Target page unreachable, timed out, or answered with an error status.
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error(transparent)]
    Extraction(#[from] ExtractionFailure),

    /// The store rejected a write (after the single retry).
    #[error("store rejected record {key}: {reason}")]
    Persistence { key: String, reason: String },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl HarvestError {
    pub fn navigation(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        HarvestError::Navigation {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        HarvestError::Configuration(message.into())
    }
}
