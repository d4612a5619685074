//! Aggregation reports.
//!
//! A report is a named query against the store, an optional pure
//! postprocessing step, and a sink that receives the finished table.
//! Reports run in a fixed order and independently: a failing query is
//! logged and recorded, and the remaining reports still run. Every run
//! regenerates every report from scratch.
//!
//! Aggregations are plain SQL. Anything that combines two collections is an
//! explicit in-memory join ([`JoinReport`]) so each side stays a simple
//! query.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use review_harvest_core::error::HarvestError;
use review_harvest_core::models::CriteriaScores;
use review_harvest_core::report::{
    cell_to_string, inner_join, missing_ratio, rank_recommendations, sort_desc, Table,
};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool, TypeInfo, ValueRef};
use tracing::{error, info};

use crate::config::{Config, ReportConfig};
use crate::db;

/// Produces one table from the store.
#[async_trait]
pub trait ReportQuery: Send + Sync {
    async fn run(&self, pool: &SqlitePool) -> Result<Table>;
}

/// Pure transform applied to a query result before it is written.
pub type Postprocess = Box<dyn Fn(Table) -> Result<Table> + Send + Sync>;

pub struct ReportDefinition {
    pub name: String,
    pub query: Box<dyn ReportQuery>,
    pub postprocess: Option<Postprocess>,
}

impl ReportDefinition {
    fn new(name: impl Into<String>, query: impl ReportQuery + 'static) -> Self {
        Self {
            name: name.into(),
            query: Box::new(query),
            postprocess: None,
        }
    }

    fn then(mut self, f: impl Fn(Table) -> Result<Table> + Send + Sync + 'static) -> Self {
        self.postprocess = Some(Box::new(f));
        self
    }

    /// Run the query and the postprocessing step.
    pub async fn build(&self, pool: &SqlitePool) -> Result<Table> {
        let table = self.query.run(pool).await?;
        match &self.postprocess {
            Some(f) => f(table),
            None => Ok(table),
        }
    }
}

/// Decode one SQLite cell by its runtime storage class.
fn decode_cell(row: &SqliteRow, idx: usize) -> Result<Value> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage = raw.type_info().name().to_string();
    let value = match storage.as_str() {
        "INTEGER" | "BOOLEAN" => Value::from(row.try_get::<i64, _>(idx)?),
        "REAL" | "NUMERIC" => Value::from(row.try_get::<f64, _>(idx)?),
        _ => Value::from(row.try_get::<String, _>(idx)?),
    };
    Ok(value)
}

/// A single SQL statement with a fixed header. The header is declared
/// rather than read from the result so empty results still have one.
pub struct SqlReport {
    sql: String,
    columns: Vec<String>,
    binds: Vec<Value>,
}

impl SqlReport {
    pub fn new(sql: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            sql: sql.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            binds: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.binds.push(value.into());
        self
    }
}

#[async_trait]
impl ReportQuery for SqlReport {
    async fn run(&self, pool: &SqlitePool) -> Result<Table> {
        let mut query = sqlx::query(&self.sql);
        for value in &self.binds {
            query = match value {
                Value::Number(n) if n.is_i64() => query.bind(n.as_i64()),
                Value::Number(n) => query.bind(n.as_f64()),
                Value::String(s) => query.bind(s.clone()),
                Value::Bool(b) => query.bind(*b),
                _ => query.bind(Option::<String>::None),
            };
        }
        let rows = query.fetch_all(pool).await?;

        let mut table = Table::new(self.columns.clone());
        for row in &rows {
            if row.len() != self.columns.len() {
                anyhow::bail!(
                    "query returned {} columns, expected {}",
                    row.len(),
                    self.columns.len()
                );
            }
            let cells = (0..row.len())
                .map(|i| decode_cell(row, i))
                .collect::<Result<Vec<_>>>()?;
            table.push_row(cells)?;
        }
        Ok(table)
    }
}

/// Per-field count of reviews where the field is NULL or empty.
///
/// Field names are validated against the reviews schema at config load,
/// which is what makes interpolating them into SQL safe.
pub struct MissingValueAudit {
    fields: Vec<String>,
}

impl MissingValueAudit {
    pub fn new(fields: &[String]) -> Self {
        Self {
            fields: fields.to_vec(),
        }
    }
}

#[async_trait]
impl ReportQuery for MissingValueAudit {
    async fn run(&self, pool: &SqlitePool) -> Result<Table> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews")
            .fetch_one(pool)
            .await?;

        let mut table = Table::new(["field", "missing_count", "total_count", "missing_ratio"]);
        for field in &self.fields {
            let sql = format!(
                "SELECT COUNT(*) FROM reviews WHERE {f} IS NULL OR {f} = ''",
                f = field
            );
            let missing: i64 = sqlx::query_scalar(&sql).fetch_one(pool).await?;
            table.push_row(vec![
                Value::from(field.as_str()),
                Value::from(missing),
                Value::from(total),
                Value::from(missing_ratio(missing, total)),
            ])?;
        }
        Ok(table)
    }
}

/// Eager inner join of two queries on a shared key column.
pub struct JoinReport<L, R> {
    left: L,
    right: R,
    key: &'static str,
}

impl<L, R> JoinReport<L, R> {
    pub fn new(left: L, right: R, key: &'static str) -> Self {
        Self { left, right, key }
    }
}

#[async_trait]
impl<L: ReportQuery, R: ReportQuery> ReportQuery for JoinReport<L, R> {
    async fn run(&self, pool: &SqlitePool) -> Result<Table> {
        let left = self.left.run(pool).await?;
        let right = self.right.run(pool).await?;
        inner_join(&left, &right, self.key)
    }
}

/// Per-restaurant mean of non-null ratings.
fn rating_aggregates() -> SqlReport {
    SqlReport::new(
        "SELECT restaurant_url, MAX(restaurant_name), MAX(district), \
                AVG(rating) AS user_rating_mean, COUNT(rating) AS review_count \
         FROM reviews WHERE rating IS NOT NULL \
         GROUP BY restaurant_url",
        &[
            "restaurant_url",
            "restaurant_name",
            "district",
            "user_rating_mean",
            "review_count",
        ],
    )
}

/// The fixed, ordered list of reports.
pub fn definitions(config: &ReportConfig) -> Vec<ReportDefinition> {
    let mut reports = vec![
        ReportDefinition::new(
            "collection_counts",
            SqlReport::new(
                "SELECT 'targets', COUNT(*) FROM targets \
                 UNION ALL SELECT 'reviews', COUNT(*) FROM reviews \
                 UNION ALL SELECT 'profiles', COUNT(*) FROM profiles",
                &["collection", "count"],
            ),
        ),
        ReportDefinition::new(
            "restaurant_review_count",
            SqlReport::new(
                "SELECT restaurant_url, MAX(restaurant_name), MAX(district), COUNT(*) AS n \
                 FROM reviews GROUP BY restaurant_url ORDER BY n DESC, restaurant_url",
                &["restaurant_url", "restaurant_name", "district", "review_count"],
            ),
        ),
        ReportDefinition::new("missing_report", MissingValueAudit::new(&config.missing_fields)),
        ReportDefinition::new(
            "duplicate_reviews",
            SqlReport::new(
                "SELECT restaurant_url, user_name, review_time, COUNT(*) AS n, \
                        GROUP_CONCAT(review_id, '|') \
                 FROM reviews \
                 WHERE user_name IS NOT NULL AND review_time IS NOT NULL \
                 GROUP BY restaurant_url, user_name, review_time, COALESCE(review_text, '') \
                 HAVING COUNT(*) > 1 \
                 ORDER BY n DESC, restaurant_url",
                &[
                    "restaurant_url",
                    "user_name",
                    "review_time",
                    "duplicate_count",
                    "review_ids",
                ],
            ),
        ),
        ReportDefinition::new(
            "rating_distribution",
            SqlReport::new(
                "SELECT rating, COUNT(*) FROM reviews GROUP BY rating ORDER BY rating",
                &["rating", "count"],
            ),
        ),
        ReportDefinition::new(
            "rating_bias",
            SqlReport::new(
                "SELECT bucket, COUNT(*) FROM ( \
                     SELECT CASE WHEN rating < 4 THEN 'low' \
                                 WHEN rating < 8 THEN 'medium' \
                                 ELSE 'high' END AS bucket \
                     FROM reviews WHERE rating IS NOT NULL) \
                 GROUP BY bucket \
                 ORDER BY CASE bucket WHEN 'high' THEN 1 WHEN 'medium' THEN 2 ELSE 3 END",
                &["rating_group", "count"],
            ),
        ),
        ReportDefinition::new(
            "category_over_threshold",
            SqlReport::new(
                "SELECT category, COUNT(*) AS n FROM profiles \
                 WHERE criteria_average > ? AND category IS NOT NULL AND category <> '' \
                 GROUP BY category ORDER BY n DESC, category",
                &["category", "restaurant_count"],
            )
            .bind(config.category_threshold),
        ),
    ];

    for (criterion, column) in CriteriaScores::COLUMNS {
        // Column names come from a fixed list, never from input
        let sql = format!(
            "SELECT restaurant_url, restaurant_name, district, category, {c} FROM profiles \
             WHERE {c} IS NOT NULL ORDER BY {c} DESC, restaurant_url LIMIT ?",
            c = column
        );
        reports.push(ReportDefinition::new(
            format!("top_{}", criterion),
            SqlReport::new(
                sql,
                &["restaurant_url", "restaurant_name", "district", "category", column],
            )
            .bind(config.top_criteria_limit as i64),
        ));
    }

    reports.push(ReportDefinition::new(
        "high_rating_low_review",
        SqlReport::new(
            "SELECT restaurant_url, MAX(restaurant_name), MAX(district), \
                    AVG(rating) AS mean, COUNT(rating) AS n \
             FROM reviews WHERE rating IS NOT NULL \
             GROUP BY restaurant_url \
             HAVING mean >= ? AND n <= ? \
             ORDER BY mean DESC, restaurant_url",
            &[
                "restaurant_url",
                "restaurant_name",
                "district",
                "user_rating_mean",
                "review_count",
            ],
        )
        .bind(config.high_rating_min)
        .bind(config.low_review_max),
    ));

    reports.push(
        ReportDefinition::new(
            "rating_vs_criteria",
            JoinReport::new(
                rating_aggregates(),
                SqlReport::new(
                    "SELECT restaurant_url, criteria_average FROM profiles \
                     WHERE criteria_average IS NOT NULL",
                    &["restaurant_url", "criteria_average"],
                ),
                "restaurant_url",
            ),
        )
        .then(|table| sort_desc(table, "user_rating_mean")),
    );

    let top_k = config.top_k;
    reports.push(
        ReportDefinition::new("recommended_restaurants", rating_aggregates())
            .then(move |table| rank_recommendations(table, top_k)),
    );

    reports
}

/// Receives finished report tables.
pub trait ReportSink {
    fn write(&mut self, name: &str, table: &Table) -> Result<()>;
}

/// Writes each report as `<dir>/<name>.csv`.
pub struct CsvDirSink {
    dir: PathBuf,
}

impl CsvDirSink {
    /// Create the output directory and check that it accepts files.
    pub fn create(dir: &Path) -> Result<Self, HarvestError> {
        let unwritable = |e: std::io::Error| {
            HarvestError::configuration(format!(
                "report output directory {} is not writable: {}",
                dir.display(),
                e
            ))
        };
        std::fs::create_dir_all(dir).map_err(unwritable)?;
        let probe = dir.join(".harvest-write-check");
        std::fs::write(&probe, b"").map_err(unwritable)?;
        let _ = std::fs::remove_file(&probe);
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", name))
    }
}

impl ReportSink for CsvDirSink {
    fn write(&mut self, name: &str, table: &Table) -> Result<()> {
        let path = self.path_for(name);
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        writer.write_record(&table.columns)?;
        for row in &table.rows {
            writer.write_record(row.iter().map(cell_to_string))?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Outcome of one reporting run.
#[derive(Debug, Default)]
pub struct ReportRun {
    /// Written reports with their row counts.
    pub written: Vec<(String, usize)>,
    pub failed: Vec<(String, String)>,
}

/// Run every definition in order, isolating failures per report.
pub async fn run_reports(
    pool: &SqlitePool,
    definitions: &[ReportDefinition],
    sink: &mut dyn ReportSink,
) -> ReportRun {
    let mut run = ReportRun::default();
    for def in definitions {
        let result = match def.build(pool).await {
            Ok(table) => sink.write(&def.name, &table).map(|()| table.len()),
            Err(e) => Err(e),
        };
        match result {
            Ok(rows) => {
                info!(report = %def.name, rows, "report written");
                run.written.push((def.name.clone(), rows));
            }
            Err(e) => {
                error!(report = %def.name, error = %format!("{:#}", e), "report failed");
                run.failed.push((def.name.clone(), format!("{:#}", e)));
            }
        }
    }
    run
}

/// `harvest report`: regenerate every report as CSV.
pub async fn run_report(config: &Config, output_dir: Option<&Path>) -> Result<ReportRun> {
    let dir = output_dir.unwrap_or(config.report.output_dir.as_path());
    let mut sink = CsvDirSink::create(dir)?;

    let pool = db::connect(config).await?;
    let defs = definitions(&config.report);
    let run = run_reports(&pool, &defs, &mut sink).await;
    pool.close().await;

    println!("report {}", dir.display());
    for (name, rows) in &run.written {
        println!("  {:<28} {:>6} rows", name, rows);
    }
    for (name, reason) in &run.failed {
        println!("  {:<28} FAILED: {}", name, reason);
    }
    println!(
        "{} written, {} failed",
        run.written.len(),
        run.failed.len()
    );

    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitions_are_fixed_and_ordered() {
        let names: Vec<String> = definitions(&ReportConfig::default())
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names.len(), 15);
        assert_eq!(names[0], "collection_counts");
        assert_eq!(names[2], "missing_report");
        assert!(names.contains(&"top_quality".to_string()));
        assert_eq!(names.last().unwrap(), "recommended_restaurants");
    }

    #[test]
    fn csv_sink_writes_header_for_empty_table() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut sink = CsvDirSink::create(&tmp.path().join("out")).unwrap();
        sink.write("empty", &Table::new(["a", "b"])).unwrap();
        let text = std::fs::read_to_string(sink.path_for("empty")).unwrap();
        assert_eq!(text, "a,b\n");
    }
}
