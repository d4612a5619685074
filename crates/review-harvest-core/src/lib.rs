//! # Review Harvest Core
//!
//! Runtime-free logic shared by the `harvest` binary and its tests: data
//! models, the page source and store abstractions, watermark convergence
//! tracking, review extraction, and the report table with its scoring and
//! audit transforms.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Anything
//! that needs a runtime or a database lives in the `review-harvest` crate.

pub mod convergence;
pub mod error;
pub mod models;
pub mod page;
pub mod report;
pub mod store;
