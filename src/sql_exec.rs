//! Generic read-only SQL execution for the browser SQL passthrough
//! (spec.md §4.H `sql_query` / `get_options`).
//!
//! No example in the retrieval pack runs ad hoc SQL against dynamically
//! typed columns, so this follows `sqlx`'s own `Row`/`Column` decoding
//! pattern directly: try each likely Rust type in turn, falling back to
//! the column's text representation. Dates are rendered `YYYY-MM-DD`;
//! integers and floats decode as JSON numbers (always an exact
//! round-trip for those types); anything else — including `NUMERIC`
//! columns sqlx can't map without an extra decimal crate — falls back to
//! its text form, satisfying spec.md §4.H "strings otherwise".

use chrono::NaiveDate;
use sqlx::{Column, PgPool, Row};

/// Validation passed by the caller (`sql_guard::validate_read_only`); this
/// function only executes and shapes the result.
pub async fn execute_to_json(pool: &PgPool, query: &str) -> Result<Vec<serde_json::Value>, sqlx::Error> {
    let rows = sqlx::query(query).fetch_all(pool).await?;
    Ok(rows.iter().map(row_to_json).collect())
}

fn row_to_json(row: &sqlx::postgres::PgRow) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        obj.insert(column.name().to_owned(), cell_to_json(row, index));
    }
    serde_json::Value::Object(obj)
}

fn cell_to_json(row: &sqlx::postgres::PgRow, index: usize) -> serde_json::Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v.map_or(serde_json::Value::Null, |n| serde_json::json!(n));
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(index) {
        return v.map_or(serde_json::Value::Null, |n| serde_json::json!(n));
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v.map_or(serde_json::Value::Null, |n| serde_json::json!(n));
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
        return v.map_or(serde_json::Value::Null, serde_json::Value::Bool);
    }
    if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index) {
        return v.map_or(serde_json::Value::Null, |t| {
            serde_json::json!(t.format("%Y-%m-%d").to_string())
        });
    }
    if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(index) {
        return v.map_or(serde_json::Value::Null, |d| {
            serde_json::json!(d.format("%Y-%m-%d").to_string())
        });
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map_or(serde_json::Value::Null, serde_json::Value::String);
    }
    serde_json::Value::Null
}
