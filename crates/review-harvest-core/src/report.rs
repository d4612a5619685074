//! Report tables and the pure transforms applied to them.
//!
//! A [`Table`] is what every report query produces and what every sink
//! writes: a header plus ordered rows of JSON scalar cells. Postprocessing
//! steps (scoring, ranking, joins, sorting) are plain functions from table
//! to table so they can be tested without a database.

use std::cmp::Ordering;
use std::collections::HashMap;

use anyhow::{bail, Result};
use serde::Serialize;
use serde_json::Value;

use crate::models::round_to;

/// A named-column table of scalar cells.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            bail!(
                "row has {} cells but table has {} columns",
                row.len(),
                self.columns.len()
            );
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        match self.columns.iter().position(|c| c == name) {
            Some(idx) => Ok(idx),
            None => bail!("table has no column '{}'", name),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell by row index and column name.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }
}

/// Render a cell the way it appears in a CSV report.
pub fn cell_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn cell_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// `mean * ln(1 + count)` rounded to 3 decimals.
///
/// The logarithm damps the advantage of heavily reviewed places while
/// still ranking them above equally rated places with fewer reviews.
pub fn recommend_score(mean_rating: f64, rated_count: i64) -> f64 {
    round_to(mean_rating * (rated_count.max(0) as f64).ln_1p(), 3)
}

/// Score, rank and truncate per-restaurant rating aggregates.
///
/// Expects `user_rating_mean` and `review_count` columns. Rows without a
/// numeric mean or with no rated reviews are dropped, not scored as zero.
/// Adds a trailing `recommend_score` column and keeps the top `top_k` rows
/// by score, descending.
pub fn rank_recommendations(table: Table, top_k: usize) -> Result<Table> {
    let mean_idx = table.column_index("user_rating_mean")?;
    let count_idx = table.column_index("review_count")?;

    let mut columns = table.columns.clone();
    columns.push("recommend_score".to_string());

    let mut scored: Vec<(f64, Vec<Value>)> = table
        .rows
        .into_iter()
        .filter_map(|row| {
            let mean = cell_f64(&row[mean_idx])?;
            let count = row[count_idx].as_i64().filter(|c| *c > 0)?;
            let score = recommend_score(mean, count);
            let mut row = row;
            row.push(Value::from(score));
            Some((score, row))
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    scored.truncate(top_k);

    Ok(Table {
        columns,
        rows: scored.into_iter().map(|(_, row)| row).collect(),
    })
}

/// `missing / total` rounded to 4 decimals; zero when there are no records.
pub fn missing_ratio(missing: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    round_to(missing as f64 / total as f64, 4)
}

/// Eager inner join of two fully materialized tables on a shared key column.
///
/// Output columns are the left columns followed by the right columns other
/// than the key. Left row order is preserved; the first right row wins when
/// a key repeats. Rows whose key is null never match.
pub fn inner_join(left: &Table, right: &Table, key: &str) -> Result<Table> {
    let left_key = left.column_index(key)?;
    let right_key = right.column_index(key)?;

    let mut by_key: HashMap<String, &Vec<Value>> = HashMap::new();
    for row in &right.rows {
        if row[right_key].is_null() {
            continue;
        }
        by_key.entry(cell_to_string(&row[right_key])).or_insert(row);
    }

    let mut columns = left.columns.clone();
    columns.extend(
        right
            .columns
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != right_key)
            .map(|(_, c)| c.clone()),
    );

    let mut joined = Table::new(columns);
    for row in &left.rows {
        if row[left_key].is_null() {
            continue;
        }
        if let Some(other) = by_key.get(&cell_to_string(&row[left_key])) {
            let mut out = row.clone();
            out.extend(
                other
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != right_key)
                    .map(|(_, v)| v.clone()),
            );
            joined.push_row(out)?;
        }
    }
    Ok(joined)
}

/// Stable sort by a numeric column, descending, with nulls last.
pub fn sort_desc(mut table: Table, column: &str) -> Result<Table> {
    let idx = table.column_index(column)?;
    table.rows.sort_by(|a, b| match (cell_f64(&a[idx]), cell_f64(&b[idx])) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    Ok(table)
}
