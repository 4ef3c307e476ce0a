//! SQLite row sampling.
//!
//! Samples are ordered by primary key when the table has one and by `rowid`
//! otherwise, so repeated runs over unchanged data return the same rows.

use super::schema_collection::quote_identifier;
use crate::Result;
use crate::config::SamplingConfig;
use crate::error::ProfilerError;
use base64::Engine;
use serde_json::Value as JsonValue;
use sqlx::{Column, Row, SqlitePool};

/// Builds the ORDER BY clause used for sampling.
pub fn order_by_clause(primary_keys: &[String]) -> String {
    if primary_keys.is_empty() {
        return "ORDER BY rowid".to_string();
    }

    let columns: Vec<String> = primary_keys
        .iter()
        .map(|column| quote_identifier(column))
        .collect();
    format!("ORDER BY {}", columns.join(", "))
}

/// Reads up to `config.sample_size` rows of `table` as JSON objects.
pub(crate) async fn sample_rows(
    pool: &SqlitePool,
    table: &str,
    primary_keys: &[String],
    config: &SamplingConfig,
) -> Result<Vec<JsonValue>> {
    if config.sample_size == 0 {
        return Ok(Vec::new());
    }

    let query = format!(
        "SELECT * FROM {} {} LIMIT ?",
        quote_identifier(table),
        order_by_clause(primary_keys)
    );

    let rows = match sqlx::query(&query)
        .bind(i64::from(config.sample_size))
        .fetch_all(pool)
        .await
    {
        Ok(rows) => rows,
        // WITHOUT ROWID tables have no rowid to order by
        Err(e) if primary_keys.is_empty() => {
            tracing::debug!("Ordered sampling of '{}' failed ({}), sampling unordered", table, e);
            let unordered = format!("SELECT * FROM {} LIMIT ?", quote_identifier(table));
            sqlx::query(&unordered)
                .bind(i64::from(config.sample_size))
                .fetch_all(pool)
                .await
                .map_err(|e| sampling_error(table, e))?
        }
        Err(e) => return Err(sampling_error(table, e)),
    };

    Ok(rows.iter().map(row_to_json).collect())
}

fn sampling_error(table: &str, error: sqlx::Error) -> ProfilerError {
    ProfilerError::profiling_failed(format!("Failed to sample data from table '{table}'"), error)
}

/// Converts a row to a JSON object keyed by column name.
fn row_to_json(row: &sqlx::sqlite::SqliteRow) -> JsonValue {
    let map = row
        .columns()
        .iter()
        .map(|column| {
            let name = column.name();
            (name.to_string(), extract_column_value(row, name))
        })
        .collect();
    JsonValue::Object(map)
}

/// Extracts a column value as JSON. SQLite is dynamically typed, so each
/// storage class is tried in turn.
fn extract_column_value(row: &sqlx::sqlite::SqliteRow, column_name: &str) -> JsonValue {
    if let Ok(v) = row.try_get::<Option<i64>, _>(column_name) {
        return v.map_or(JsonValue::Null, |n| JsonValue::Number(n.into()));
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(column_name) {
        return v
            .and_then(serde_json::Number::from_f64)
            .map_or(JsonValue::Null, JsonValue::Number);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(column_name) {
        return v.map_or(JsonValue::Null, JsonValue::String);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(column_name) {
        return v.map_or(JsonValue::Null, |bytes| {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
            JsonValue::String(format!("base64:{encoded}"))
        });
    }

    JsonValue::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_by_primary_key() {
        assert_eq!(order_by_clause(&["id".to_string()]), "ORDER BY \"id\"");
        assert_eq!(
            order_by_clause(&["tenant_id".to_string(), "id".to_string()]),
            "ORDER BY \"tenant_id\", \"id\""
        );
    }

    #[test]
    fn test_order_by_rowid_fallback() {
        assert_eq!(order_by_clause(&[]), "ORDER BY rowid");
    }

    #[test]
    fn test_identifier_escaping() {
        assert_eq!(
            order_by_clause(&["weird\"column".to_string()]),
            "ORDER BY \"weird\"\"column\""
        );
    }
}
