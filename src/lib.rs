//! # Review Harvest
//!
//! Incremental collection of restaurant reviews from a food-review site into
//! SQLite, plus a fixed set of aggregation reports written as CSV.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────┐   ┌──────────┐
//! │ Page source │──▶│  Collector  │──▶│  SQLite  │──▶│ Reporter │──▶ *.csv
//! │ HTTP + CSS  │   │  watermark  │   │  upserts │   │ SQL+join │
//! └─────────────┘   └─────────────┘   └──────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! harvest init                              # create database
//! harvest import ./targets.csv              # load the source list
//! harvest collect                           # new reviews since last run
//! harvest profiles                          # category and criteria scores
//! harvest report                            # regenerate every report
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite record store |
//! | [`page_source`] | HTTP page source with CSS selectors |
//! | [`collector`] | Incremental review collection |
//! | [`profiles`] | Restaurant profile collection |
//! | [`discover`] | Target discovery from listing pages |
//! | [`targets`] | Source-list import |
//! | [`report`] | Aggregation reports |
//! | [`export`] | CSV export of stored records |
//! | [`stats`] | Database statistics |
//! | [`progress`] | Progress reporting on stderr |

pub mod collector;
pub mod config;
pub mod db;
pub mod discover;
pub mod export;
pub mod migrate;
pub mod page_source;
pub mod profiles;
pub mod progress;
pub mod report;
pub mod sqlite_store;
pub mod stats;
pub mod targets;
